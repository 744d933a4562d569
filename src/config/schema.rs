//! Configuration schema for Strata
//!
//! Global configuration lives at `~/.config/strata/config.toml`; a
//! project-local `.strata.toml` can override any key.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// PATH used in image configs that neither declare nor inherit one
pub const DEFAULT_IMAGE_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Build directories
    pub paths: PathsConfig,

    /// Build behaviour
    pub build: BuildSettings,

    /// Working-tree storage
    pub storage: StorageConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Directories used by a build. Relative paths are resolved against the
/// directory strata is invoked from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Build cache and import staging
    pub strata_dir: PathBuf,

    /// OCI image layout output
    pub oci_dir: PathBuf,

    /// Root filesystem trees (working tree and snapshots)
    pub roots_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            strata_dir: PathBuf::from(".strata"),
            oci_dir: PathBuf::from("oci"),
            roots_dir: PathBuf::from("roots"),
        }
    }
}

/// Build behaviour settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSettings {
    /// Stackfile read when `-f` is not given
    pub stackfile: PathBuf,

    /// PATH appended to image configs that have none
    pub default_path: String,

    /// Prefer rsync over cp for directory imports when available
    pub rsync: bool,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            stackfile: PathBuf::from("strata.yaml"),
            default_path: DEFAULT_IMAGE_PATH.to_string(),
            rsync: true,
        }
    }
}

/// Working-tree storage backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Plain directories, snapshots are full copies
    #[default]
    Dir,
    /// btrfs subvolumes, snapshots are copy-on-write
    Btrfs,
}

/// Storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Which backend manages the roots directory
    pub backend: StorageBackend,
}
