//! btrfs storage: every tree is a subvolume, snapshots are copy-on-write.
//!
//! Requires the roots directory to be on btrfs. Unprivileged deletion
//! needs the filesystem mounted with `user_subvol_rm_allowed`.

use crate::error::{StrataError, StrataResult};
use crate::orchestration::exec;
use crate::storage::Storage;
use async_trait::async_trait;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub struct BtrfsStorage {
    root: PathBuf,
}

impl BtrfsStorage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    async fn btrfs(&self, what: &str, args: &[&str]) -> StrataResult<()> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        exec(what, "btrfs", &args).await?;
        Ok(())
    }

    async fn ensure_root(&self) -> StrataResult<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StrataError::io(format!("creating {}", self.root.display()), e))
    }

    async fn snapshot_as(&self, source: &str, target: &str, readonly: bool) -> StrataResult<()> {
        let from = self.path(source);
        if !from.exists() {
            return Err(StrataError::TreeNotFound(source.to_string()));
        }
        self.delete(target).await?;

        let from = from.display().to_string();
        let to = self.path(target).display().to_string();
        let mut args = vec!["subvolume", "snapshot"];
        if readonly {
            args.push("-r");
        }
        args.push(&from);
        args.push(&to);
        self.btrfs(&format!("snapshotting {} to {}", source, target), &args)
            .await?;
        debug!("Snapshot {} -> {} (readonly: {})", source, target, readonly);
        Ok(())
    }
}

/// Whether `path` is the root of a mount (its device differs from its parent's)
fn is_mount_point(path: &Path) -> bool {
    let Some(parent) = path.parent() else {
        return false;
    };
    match (std::fs::metadata(path), std::fs::metadata(parent)) {
        (Ok(own), Ok(up)) => own.dev() != up.dev(),
        _ => false,
    }
}

#[async_trait]
impl Storage for BtrfsStorage {
    fn name(&self) -> &'static str {
        "btrfs"
    }

    async fn create(&self, name: &str) -> StrataResult<()> {
        self.ensure_root().await?;
        let path = self.path(name).display().to_string();
        self.btrfs(
            &format!("creating subvolume {}", name),
            &["subvolume", "create", &path],
        )
        .await
    }

    async fn snapshot(&self, source: &str, target: &str) -> StrataResult<()> {
        self.snapshot_as(source, target, true).await
    }

    async fn restore(&self, source: &str, target: &str) -> StrataResult<()> {
        self.snapshot_as(source, target, false).await
    }

    async fn delete(&self, name: &str) -> StrataResult<()> {
        let path = self.path(name);
        if !path.exists() {
            return Ok(());
        }
        let path = path.display().to_string();
        self.btrfs(
            &format!("deleting subvolume {}", name),
            &["subvolume", "delete", &path],
        )
        .await
    }

    async fn detach(&self) -> StrataResult<()> {
        if !is_mount_point(&self.root) {
            return Ok(());
        }
        info!("Unmounting {}", self.root.display());
        exec(
            "unmounting roots",
            "umount",
            &[self.root.display().to_string()],
        )
        .await?;
        Ok(())
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn plain_directory_is_not_a_mount_point() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("roots");
        std::fs::create_dir_all(&dir).unwrap();
        assert!(!is_mount_point(&dir));
        assert!(!is_mount_point(&temp.path().join("missing")));
    }

    #[tokio::test]
    async fn delete_and_detach_without_trees_are_noops() {
        let temp = TempDir::new().unwrap();
        let storage = BtrfsStorage::new(temp.path().join("roots"));
        storage.delete(".working").await.unwrap();
        storage.detach().await.unwrap();
    }

    #[tokio::test]
    async fn snapshot_of_missing_tree_fails() {
        let temp = TempDir::new().unwrap();
        let storage = BtrfsStorage::new(temp.path().to_path_buf());
        let err = storage.snapshot(".working", "base").await.unwrap_err();
        assert!(matches!(err, StrataError::TreeNotFound(_)));
    }
}
