//! Working-tree storage
//!
//! Named trees live under the roots directory: the mutable `.working`
//! tree and one snapshot per built layer. A backend decides how a
//! snapshot is made (full copy or copy-on-write subvolume).

mod btrfs;
mod dir;

pub use crate::config::context::WORKING_TREE;
pub use btrfs::BtrfsStorage;
pub use dir::DirStorage;

use crate::config::schema::StorageBackend;
use crate::config::BuildContext;
use crate::error::StrataResult;
use async_trait::async_trait;
use std::path::PathBuf;

/// Manages named trees under the roots directory
#[async_trait]
pub trait Storage: Send + Sync {
    /// Backend name for display
    fn name(&self) -> &'static str;

    /// Create an empty tree
    async fn create(&self, name: &str) -> StrataResult<()>;

    /// Make `target` a frozen copy of `source`
    async fn snapshot(&self, source: &str, target: &str) -> StrataResult<()>;

    /// Make `target` a writable copy of the snapshot `source`
    async fn restore(&self, source: &str, target: &str) -> StrataResult<()>;

    /// Remove a tree; removing a missing tree succeeds
    async fn delete(&self, name: &str) -> StrataResult<()>;

    /// Release whatever the backend holds on the roots directory
    async fn detach(&self) -> StrataResult<()>;

    /// Path of a named tree
    fn path(&self, name: &str) -> PathBuf;

    fn exists(&self, name: &str) -> bool {
        self.path(name).exists()
    }
}

/// Open the storage backend selected in the configuration
pub fn open_storage(ctx: &BuildContext) -> Box<dyn Storage> {
    match ctx.storage {
        StorageBackend::Dir => Box::new(DirStorage::new(ctx.roots_dir.clone())),
        StorageBackend::Btrfs => Box::new(BtrfsStorage::new(ctx.roots_dir.clone())),
    }
}
