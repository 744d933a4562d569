//! Build cache
//!
//! Maps a layer fingerprint to what building it produced: the manifest
//! descriptor committed to the OCI layout, or the build-only marker for
//! layers that only exist as a snapshot.
//!
//! Persisted as `<strata_dir>/build-cache.json`. Entries are overwritten,
//! never merged; removing the strata directory resets the cache.

pub mod fingerprint;

pub use fingerprint::Fingerprint;

use crate::error::{StrataError, StrataResult};
use crate::layer::LayerDeclaration;
use crate::oci::Descriptor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

pub const CACHE_FILE: &str = "build-cache.json";
const CACHE_VERSION: u32 = 1;

/// What a cached layer build produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CachedOutput {
    /// Committed image manifest
    Image { descriptor: Descriptor },
    /// Build-only layer, snapshot without an OCI reference
    BuildOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub layer: String,
    pub output: CachedOutput,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    #[serde(default)]
    entries: BTreeMap<Fingerprint, CacheEntry>,
}

impl Default for CacheFile {
    fn default() -> Self {
        Self {
            version: CACHE_VERSION,
            entries: BTreeMap::new(),
        }
    }
}

/// On-disk build cache
#[derive(Debug)]
pub struct BuildCache {
    path: PathBuf,
    file: CacheFile,
}

impl BuildCache {
    /// Load the cache of a strata directory; a missing file is an empty cache
    pub async fn open(strata_dir: &Path) -> StrataResult<Self> {
        let path = strata_dir.join(CACHE_FILE);
        let file = match fs::read(&path).await {
            Ok(data) => {
                let file: CacheFile = serde_json::from_slice(&data)?;
                if file.version != CACHE_VERSION {
                    info!(
                        "Build cache version {} is not {}, starting empty",
                        file.version, CACHE_VERSION
                    );
                    CacheFile::default()
                } else {
                    file
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CacheFile::default(),
            Err(e) => return Err(StrataError::io(format!("reading {}", path.display()), e)),
        };
        debug!("Build cache has {} entries", file.entries.len());
        Ok(Self { path, file })
    }

    /// Remove the whole strata directory (imports and cache index)
    pub async fn discard(strata_dir: &Path) -> StrataResult<()> {
        match fs::remove_dir_all(strata_dir).await {
            Ok(()) => {
                info!("Discarded build cache at {}", strata_dir.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StrataError::io(
                format!("removing {}", strata_dir.display()),
                e,
            )),
        }
    }

    /// Fingerprint a layer whose imports are already resolved
    pub async fn fingerprint(
        decl: &LayerDeclaration,
        imports_dir: &Path,
        parent: Option<&Fingerprint>,
    ) -> StrataResult<Fingerprint> {
        let decl = decl.clone();
        let imports_dir = imports_dir.to_path_buf();
        let parent = parent.cloned();
        tokio::task::spawn_blocking(move || {
            fingerprint::compute(&decl, &imports_dir, parent.as_ref())
        })
        .await
        .map_err(|e| StrataError::Internal(format!("fingerprint task failed: {}", e)))?
    }

    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<&CachedOutput> {
        self.file.entries.get(fingerprint).map(|e| &e.output)
    }

    /// Record a build result and persist the cache
    pub async fn put(
        &mut self,
        layer: &str,
        fingerprint: Fingerprint,
        output: CachedOutput,
    ) -> StrataResult<()> {
        self.file.entries.insert(
            fingerprint,
            CacheEntry {
                layer: layer.to_string(),
                output,
                created: Utc::now(),
            },
        );
        self.persist().await
    }

    pub fn entries(&self) -> impl Iterator<Item = (&Fingerprint, &CacheEntry)> {
        self.file.entries.iter()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self) -> StrataResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StrataError::io(format!("creating {}", parent.display()), e))?;
        }
        let data = serde_json::to_vec_pretty(&self.file)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, data)
            .await
            .map_err(|e| StrataError::io(format!("writing {}", tmp.display()), e))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StrataError::io(format!("renaming into {}", self.path.display()), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::MediaType;
    use tempfile::TempDir;

    fn descriptor() -> Descriptor {
        Descriptor::new(MediaType::ImageManifest, 42, "sha256:abc")
    }

    fn fp(s: &str) -> Fingerprint {
        serde_json::from_value(serde_json::json!(s)).unwrap()
    }

    #[tokio::test]
    async fn missing_cache_is_empty() {
        let temp = TempDir::new().unwrap();
        let cache = BuildCache::open(temp.path()).await.unwrap();
        assert!(cache.lookup(&fp("x")).is_none());
        assert_eq!(cache.entries().count(), 0);
    }

    #[tokio::test]
    async fn put_persists_and_reloads() {
        let temp = TempDir::new().unwrap();
        let mut cache = BuildCache::open(temp.path()).await.unwrap();
        cache
            .put(
                "a",
                fp("one"),
                CachedOutput::Image {
                    descriptor: descriptor(),
                },
            )
            .await
            .unwrap();
        cache.put("b", fp("two"), CachedOutput::BuildOnly).await.unwrap();

        let reloaded = BuildCache::open(temp.path()).await.unwrap();
        assert_eq!(
            reloaded.lookup(&fp("one")),
            Some(&CachedOutput::Image {
                descriptor: descriptor()
            })
        );
        assert_eq!(reloaded.lookup(&fp("two")), Some(&CachedOutput::BuildOnly));
    }

    #[tokio::test]
    async fn put_overwrites() {
        let temp = TempDir::new().unwrap();
        let mut cache = BuildCache::open(temp.path()).await.unwrap();
        cache.put("a", fp("one"), CachedOutput::BuildOnly).await.unwrap();
        cache
            .put(
                "a",
                fp("one"),
                CachedOutput::Image {
                    descriptor: descriptor(),
                },
            )
            .await
            .unwrap();
        assert!(matches!(
            cache.lookup(&fp("one")),
            Some(CachedOutput::Image { .. })
        ));
    }

    #[tokio::test]
    async fn corrupt_cache_is_an_error() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(CACHE_FILE), "not json").unwrap();
        assert!(BuildCache::open(temp.path()).await.is_err());
    }

    #[tokio::test]
    async fn discard_removes_directory() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join(".strata");
        let mut cache = BuildCache::open(&dir).await.unwrap();
        cache.put("a", fp("one"), CachedOutput::BuildOnly).await.unwrap();

        BuildCache::discard(&dir).await.unwrap();
        assert!(!dir.exists());
        BuildCache::discard(&dir).await.unwrap();
    }
}
