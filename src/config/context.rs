//! Resolved build context
//!
//! The configuration with every directory made absolute. Passed by
//! reference into the import resolver, cache, storage and commit code
//! instead of living in global state.

use crate::config::schema::{Config, StorageBackend};
use crate::error::{StrataError, StrataResult};
use std::path::{Path, PathBuf};

/// Reserved name of the single mutable working tree
pub const WORKING_TREE: &str = ".working";

/// Under `imports/`; layer names never start with '.'
const STAGING_DIR: &str = ".staging";

/// Absolute paths and settings for one build invocation
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Cache directory (`imports/`, build cache index)
    pub strata_dir: PathBuf,
    /// OCI layout directory
    pub oci_dir: PathBuf,
    /// Root filesystem trees
    pub roots_dir: PathBuf,
    /// PATH appended to image configs that have none
    pub default_path: String,
    /// Prefer rsync for directory imports
    pub use_rsync: bool,
    /// Working-tree storage backend
    pub storage: StorageBackend,
}

impl BuildContext {
    /// Resolve a configuration against `base` (normally the current directory)
    pub fn from_config(config: &Config, base: &Path) -> Self {
        Self {
            strata_dir: absolutize(base, &config.paths.strata_dir),
            oci_dir: absolutize(base, &config.paths.oci_dir),
            roots_dir: absolutize(base, &config.paths.roots_dir),
            default_path: config.build.default_path.clone(),
            use_rsync: config.build.rsync,
            storage: config.storage.backend,
        }
    }

    /// Resolve a configuration against the current working directory
    pub fn from_current_dir(config: &Config) -> StrataResult<Self> {
        let cwd = std::env::current_dir()
            .map_err(|e| StrataError::io("getting current directory", e))?;
        Ok(Self::from_config(config, &cwd))
    }

    /// Directory holding the resolved imports of one layer
    pub fn imports_dir(&self, layer: &str) -> PathBuf {
        self.strata_dir.join("imports").join(layer)
    }

    /// Scratch space for directory imports of one layer, outside the
    /// directory the fingerprint covers
    pub fn imports_staging_dir(&self, layer: &str) -> PathBuf {
        self.strata_dir.join("imports").join(STAGING_DIR).join(layer)
    }

    /// Bundle directory of a named tree (holds `rootfs/` and bundle metadata)
    pub fn bundle_dir(&self, tree: &str) -> PathBuf {
        self.roots_dir.join(tree)
    }

    /// Root filesystem of a named tree
    pub fn rootfs_dir(&self, tree: &str) -> PathBuf {
        self.bundle_dir(tree).join("rootfs")
    }

    /// Bundle directory of the working tree
    pub fn working_bundle(&self) -> PathBuf {
        self.bundle_dir(WORKING_TREE)
    }
}

fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
