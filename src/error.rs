//! Error types for Strata
//!
//! All modules use `StrataResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Strata operations
pub type StrataResult<T> = Result<T, StrataError>;

/// All errors that can occur in Strata
#[derive(Error, Debug)]
pub enum StrataError {
    // Declaration errors
    #[error("Invalid stackfile {path}: {reason}")]
    Declaration { path: PathBuf, reason: String },

    #[error("Invalid layer name '{name}': {reason}")]
    InvalidLayerName { name: String, reason: String },

    #[error("Layer {layer} depends on unknown layer {dependency}")]
    UnknownDependency { layer: String, dependency: String },

    #[error("Dependency cycle between layers: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    // Import errors
    #[error("Unsupported import scheme '{scheme}' in {spec}")]
    UnsupportedScheme { spec: String, scheme: String },

    #[error("Comparing entries with different names: {left} vs {right}")]
    NameMismatch { left: PathBuf, right: PathBuf },

    #[error("Cannot compare symlink with non-symlink: {left} vs {right}")]
    UnsupportedComparison { left: PathBuf, right: PathBuf },

    #[error("Download failed: {url}: {reason}")]
    Download { url: String, reason: String },

    // OCI errors
    #[error("Invalid OCI layout at {path}: {reason}")]
    OciLayout { path: PathBuf, reason: String },

    #[error("OCI reference not found: {0}")]
    ReferenceNotFound(String),

    #[error("OCI blob not found: {0}")]
    BlobNotFound(String),

    #[error("Image mutation failed for {name}: {reason}")]
    Mutator { name: String, reason: String },

    #[error("Inconsistent bundle at {path}: {reason}")]
    BundleInconsistent { path: PathBuf, reason: String },

    #[error("Invalid OCI document: {0}")]
    OciSpec(#[from] oci_spec::OciSpecError),

    // Build errors
    #[error("Failed to build layer {layer}: {source}")]
    Layer {
        layer: String,
        #[source]
        source: Box<StrataError>,
    },

    #[error("Working tree not found: {0}")]
    TreeNotFound(String),

    #[error("Unsupported platform: {0}. Strata builds images on Linux.")]
    UnsupportedPlatform(String),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    // Process errors
    #[error("Required CLI not found: {name}. {hint}")]
    CliNotFound { name: String, hint: String },

    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{what}: {command} exited with {}{}", code_str(.code), tail_str(.output))]
    SubprocessFailed {
        what: String,
        command: String,
        code: Option<i32>,
        output: String,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

fn code_str(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("exit code {}", c),
        None => "a signal".to_string(),
    }
}

fn tail_str(output: &str) -> String {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("\n{}", trimmed)
    }
}

impl StrataError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error (the process could not be spawned).
    ///
    /// A missing binary is reported as `CliNotFound` so the user gets an
    /// install hint instead of a bare ENOENT.
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        let command = command.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            let name = command
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_string();
            let hint = install_hint(&name).to_string();
            return Self::CliNotFound { name, hint };
        }
        Self::CommandFailed { command, source }
    }

    /// Create a subprocess failure (the process ran and exited non-zero)
    pub fn subprocess(
        what: impl Into<String>,
        command: impl Into<String>,
        code: Option<i32>,
        output: impl Into<String>,
    ) -> Self {
        Self::SubprocessFailed {
            what: what.into(),
            command: command.into(),
            code,
            output: output.into(),
        }
    }

    /// Attach the name of the layer being built
    pub fn in_layer(self, layer: impl Into<String>) -> Self {
        match self {
            already @ Self::Layer { .. } => already,
            other => Self::Layer {
                layer: layer.into(),
                source: Box::new(other),
            },
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Layer { source, .. } => source.hint(),
            Self::CliNotFound { .. } => Some("Run: strata status"),
            Self::UnsupportedScheme { .. } => {
                Some("Imports may be local paths, http(s) URLs or strata://<layer>/<path>")
            }
            Self::DependencyCycle(_) => Some("Check the `from` and strata:// imports of these layers"),
            Self::BundleInconsistent { .. } => Some("Run: strata clean, then rebuild"),
            _ => None,
        }
    }
}

/// Install hint for the external tools strata shells out to
pub fn install_hint(tool: &str) -> &'static str {
    match tool {
        "umoci" => "Install umoci: https://github.com/opencontainers/umoci",
        "skopeo" => "Install skopeo from your distribution's packages",
        "rsync" => "Install rsync, or set build.rsync = false",
        "unshare" | "chroot" | "cp" => "Install util-linux and coreutils",
        "btrfs" => "Install btrfs-progs, or set storage.backend = \"dir\"",
        _ => "Make sure it is installed and on PATH",
    }
}
