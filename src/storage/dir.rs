//! Plain-directory storage: snapshots are full copies

use crate::error::{StrataError, StrataResult};
use crate::orchestration::exec;
use crate::storage::Storage;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;

pub struct DirStorage {
    root: PathBuf,
}

impl DirStorage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    async fn copy(&self, source: &str, target: &str) -> StrataResult<()> {
        let from = self.path(source);
        if !from.exists() {
            return Err(StrataError::TreeNotFound(source.to_string()));
        }
        self.delete(target).await?;

        let args = vec![
            "-a".to_string(),
            "--reflink=auto".to_string(),
            from.display().to_string(),
            self.path(target).display().to_string(),
        ];
        exec(&format!("copying tree {} to {}", source, target), "cp", &args).await?;
        debug!("Copied tree {} -> {}", source, target);
        Ok(())
    }
}

#[async_trait]
impl Storage for DirStorage {
    fn name(&self) -> &'static str {
        "dir"
    }

    async fn create(&self, name: &str) -> StrataResult<()> {
        let path = self.path(name);
        fs::create_dir_all(&path)
            .await
            .map_err(|e| StrataError::io(format!("creating {}", path.display()), e))
    }

    async fn snapshot(&self, source: &str, target: &str) -> StrataResult<()> {
        self.copy(source, target).await
    }

    async fn restore(&self, source: &str, target: &str) -> StrataResult<()> {
        self.copy(source, target).await
    }

    async fn delete(&self, name: &str) -> StrataResult<()> {
        let path = self.path(name);
        match fs::remove_dir_all(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StrataError::io(format!("removing {}", path.display()), e)),
        }
    }

    async fn detach(&self) -> StrataResult<()> {
        Ok(())
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}
