//! Import resolution
//!
//! Every import string of a layer is resolved to a local copy under
//! `<strata_dir>/imports/<layer>/`. Unchanged files are not copied again;
//! that directory is what the fingerprint digests and what build commands
//! see at `/strata`.

pub mod compare;
pub mod fetch;

use crate::config::BuildContext;
use crate::error::{StrataError, StrataResult};
use compare::files_differ;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::SystemTime;
use tokio::process::Command;
use tracing::{debug, info};
use url::Url;

/// URL scheme for files taken from another layer's tree
pub const LAYER_SCHEME: &str = "strata";

/// Where an import comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportSource {
    /// Path on the host, relative to the invocation directory
    Local(PathBuf),
    /// `http` or `https` URL, always re-downloaded
    Remote(String),
    /// Path inside a previously built layer's root filesystem
    Layer { layer: String, path: PathBuf },
}

impl ImportSource {
    /// Classify an import string by its URL scheme; strings without one
    /// are host paths
    pub fn parse(spec: &str) -> StrataResult<Self> {
        let url = match Url::parse(spec) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                return Ok(Self::Local(PathBuf::from(spec)))
            }
            Err(e) => {
                return Err(StrataError::Declaration {
                    path: PathBuf::from(spec),
                    reason: format!("invalid import URL: {}", e),
                })
            }
        };

        match url.scheme() {
            "http" | "https" => Ok(Self::Remote(spec.to_string())),
            LAYER_SCHEME => {
                let layer = url.host_str().unwrap_or_default();
                if layer.is_empty() {
                    return Err(StrataError::Declaration {
                        path: PathBuf::from(spec),
                        reason: "strata:// import names no layer".to_string(),
                    });
                }
                Ok(Self::Layer {
                    layer: layer.to_string(),
                    path: PathBuf::from(url.path().trim_start_matches('/')),
                })
            }
            scheme => Err(StrataError::UnsupportedScheme {
                spec: spec.to_string(),
                scheme: scheme.to_string(),
            }),
        }
    }

    /// Layer this import reads from, for dependency ordering
    pub fn layer_dependency(&self) -> Option<&str> {
        match self {
            Self::Layer { layer, .. } => Some(layer),
            _ => None,
        }
    }
}

/// How an import ended up in the cache directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportAction {
    /// File copied because it was new or changed
    Copied,
    /// Existing cached copy was identical
    Reused,
    /// Fetched over the network
    Downloaded,
    /// Directory synchronized with a bulk copy tool
    Synced,
}

/// One resolved import
#[derive(Debug, Clone)]
pub struct ResolvedImport {
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub action: ImportAction,
}

/// Result of importing everything a layer declares
#[derive(Debug, Clone, Default)]
pub struct ImportSummary {
    pub imports: Vec<ResolvedImport>,
    pub copied: usize,
    pub reused: usize,
    pub downloaded: usize,
    pub synced: usize,
}

impl ImportSummary {
    fn record(&mut self, import: ResolvedImport) {
        match import.action {
            ImportAction::Copied => self.copied += 1,
            ImportAction::Reused => self.reused += 1,
            ImportAction::Downloaded => self.downloaded += 1,
            ImportAction::Synced => self.synced += 1,
        }
        self.imports.push(import);
    }
}

/// Resolve all imports of `layer`, stopping at the first failure
pub async fn import(ctx: &BuildContext, layer: &str, specs: &[String]) -> StrataResult<ImportSummary> {
    let dir = ctx.imports_dir(layer);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| StrataError::io(format!("creating {}", dir.display()), e))?;

    let mut summary = ImportSummary::default();
    let mut rsync: Option<bool> = None;

    for spec in specs {
        let resolved = match ImportSource::parse(spec)? {
            ImportSource::Local(path) => {
                import_path(ctx, layer, &path, &dir, &mut rsync).await?
            }
            ImportSource::Layer {
                layer: source_layer,
                path,
            } => {
                let rel = path.strip_prefix("/").unwrap_or(&path);
                let source = ctx.rootfs_dir(&source_layer).join(rel);
                import_path(ctx, layer, &source, &dir, &mut rsync).await?
            }
            ImportSource::Remote(url) => {
                let dest_dir = dir.clone();
                let path = blocking(move || fetch::download(&url, &dest_dir)).await?;
                describe(path, ImportAction::Downloaded)?
            }
        };
        summary.record(resolved);
    }

    debug!(
        "Imports for {}: {} copied, {} reused, {} downloaded, {} synced",
        layer, summary.copied, summary.reused, summary.downloaded, summary.synced
    );
    Ok(summary)
}

async fn import_path(
    ctx: &BuildContext,
    layer: &str,
    source: &Path,
    dest_dir: &Path,
    rsync: &mut Option<bool>,
) -> StrataResult<ResolvedImport> {
    let meta = match tokio::fs::metadata(source).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StrataError::PathNotFound(source.to_path_buf()))
        }
        Err(e) => return Err(StrataError::io(format!("reading {}", source.display()), e)),
    };

    if meta.is_dir() {
        let use_rsync = match *rsync {
            Some(available) => available,
            None => {
                let available = ctx.use_rsync && rsync_available().await;
                *rsync = Some(available);
                available
            }
        };
        let staging = ctx.imports_staging_dir(layer);
        let path = sync_directory(source, dest_dir, &staging, use_rsync).await?;
        return describe(path, ImportAction::Synced);
    }

    let source = source.to_path_buf();
    let dest_dir = dest_dir.to_path_buf();
    blocking(move || import_file(&source, &dest_dir)).await
}

fn entry_name(path: &Path) -> StrataResult<std::ffi::OsString> {
    if let Some(name) = path.file_name() {
        return Ok(name.to_os_string());
    }
    fs::canonicalize(path)
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_os_string()))
        .ok_or_else(|| StrataError::User(format!("Cannot import {}: no file name", path.display())))
}

/// Copy a single file into `dest_dir` unless an identical copy is there
fn import_file(source: &Path, dest_dir: &Path) -> StrataResult<ResolvedImport> {
    let source_meta = fs::metadata(source)
        .map_err(|e| StrataError::io(format!("reading {}", source.display()), e))?;
    let dest = dest_dir.join(entry_name(source)?);

    let needs_copy = match fs::metadata(&dest) {
        Ok(dest_meta) => files_differ(source, &source_meta, &dest, &dest_meta)?,
        Err(_) => true,
    };

    let action = if needs_copy {
        info!("Copying {}", source.display());
        copy_file(source, &dest)?;
        ImportAction::Copied
    } else {
        debug!("Using cached copy of {}", source.display());
        ImportAction::Reused
    };
    describe(dest, action)
}

/// Copy through a temporary sibling so a failed copy leaves the old one intact
fn copy_file(source: &Path, dest: &Path) -> StrataResult<()> {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dest.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4()));

    // fs::copy carries the permission bits over
    fs::copy(source, &tmp).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        StrataError::io(format!("copying {}", source.display()), e)
    })?;
    fs::rename(&tmp, dest).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        StrataError::io(format!("renaming into {}", dest.display()), e)
    })
}

/// Bulk-copy a directory into `dest_dir/<name>` through a staging directory.
///
/// The previous copy seeds `<staging_dir>/<name>` so rsync only transfers
/// changes; the staged copy replaces `<name>` only after the copy tool
/// succeeds. Staging lives outside `dest_dir`, so every entry of
/// `dest_dir` is a real import.
async fn sync_directory(
    source: &Path,
    dest_dir: &Path,
    staging_dir: &Path,
    use_rsync: bool,
) -> StrataResult<PathBuf> {
    let name = entry_name(source)?;
    let dest = dest_dir.join(&name);
    let partial = staging_dir.join(&name);
    tokio::fs::create_dir_all(staging_dir)
        .await
        .map_err(|e| StrataError::io(format!("creating {}", staging_dir.display()), e))?;

    if dest.exists() {
        remove_any(&partial).await?;
        tokio::fs::rename(&dest, &partial)
            .await
            .map_err(|e| StrataError::io(format!("staging {}", dest.display()), e))?;
    }

    let mut cmd = if use_rsync {
        let mut cmd = Command::new("rsync");
        cmd.arg("-a")
            .arg("--delete")
            .arg(format!("{}/", source.display()))
            .arg(format!("{}/", partial.display()));
        cmd
    } else {
        remove_any(&partial).await?;
        let mut cmd = Command::new("cp");
        cmd.arg("-a").arg(source).arg(&partial);
        cmd
    };

    let tool = if use_rsync { "rsync" } else { "cp" };
    debug!("Syncing {} with {}", source.display(), tool);
    let output = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| StrataError::command_failed(format!("{} -a {}", tool, source.display()), e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(StrataError::subprocess(
            format!("importing {}", source.display()),
            tool,
            output.status.code(),
            stderr,
        ));
    }

    tokio::fs::rename(&partial, &dest)
        .await
        .map_err(|e| StrataError::io(format!("renaming into {}", dest.display()), e))?;
    info!("Synced {}", source.display());
    Ok(dest)
}

async fn remove_any(path: &Path) -> StrataResult<()> {
    let result = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(_) => return Ok(()),
    };
    result.map_err(|e| StrataError::io(format!("removing {}", path.display()), e))
}

async fn rsync_available() -> bool {
    Command::new("rsync")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

fn describe(path: PathBuf, action: ImportAction) -> StrataResult<ResolvedImport> {
    let meta = fs::metadata(&path)
        .map_err(|e| StrataError::io(format!("reading {}", path.display()), e))?;
    Ok(ResolvedImport {
        size: meta.len(),
        modified: meta.modified().ok(),
        path,
        action,
    })
}

async fn blocking<T, F>(f: F) -> StrataResult<T>
where
    F: FnOnce() -> StrataResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StrataError::Internal(format!("import task failed: {}", e)))?
}
