//! OCI image layout on disk
//!
//! ```text
//! <oci_dir>/
//!   oci-layout
//!   index.json
//!   blobs/sha256/<hex>
//! ```
//!
//! Named references are `index.json` entries annotated with
//! `org.opencontainers.image.ref.name`; at most one entry per name.

use crate::error::{StrataError, StrataResult};
use crate::oci::types::{
    Descriptor, DescriptorExt, ImageIndex, ImageIndexBuilder, MediaType, ANNOTATION_REF_NAME,
    SCHEMA_VERSION,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const OCI_LAYOUT_FILE: &str = "oci-layout";
const OCI_LAYOUT_CONTENT: &str = r#"{"imageLayoutVersion":"1.0.0"}"#;
const INDEX_FILE: &str = "index.json";

/// Handle on an OCI image layout directory
#[derive(Debug, Clone)]
pub struct OciLayout {
    root: PathBuf,
}

impl OciLayout {
    /// Create an empty layout; fails if one already exists
    pub fn create(root: &Path) -> StrataResult<Self> {
        if root.join(OCI_LAYOUT_FILE).exists() {
            return Err(StrataError::OciLayout {
                path: root.to_path_buf(),
                reason: "layout already exists".to_string(),
            });
        }
        fs::create_dir_all(root.join("blobs").join("sha256"))
            .map_err(|e| StrataError::io(format!("creating {}", root.display()), e))?;
        write_atomic(&root.join(OCI_LAYOUT_FILE), OCI_LAYOUT_CONTENT.as_bytes())?;

        let layout = Self {
            root: root.to_path_buf(),
        };
        layout.write_index(&empty_index()?)?;
        debug!("Created OCI layout at {}", root.display());
        Ok(layout)
    }

    /// Open an existing layout
    pub fn open(root: &Path) -> StrataResult<Self> {
        if !root.join(OCI_LAYOUT_FILE).is_file() {
            return Err(StrataError::OciLayout {
                path: root.to_path_buf(),
                reason: "missing oci-layout file".to_string(),
            });
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Whether `root` holds a layout
    pub fn exists(root: &Path) -> bool {
        root.join(OCI_LAYOUT_FILE).is_file()
    }

    /// Open the layout, creating it when absent
    pub fn open_or_create(root: &Path) -> StrataResult<Self> {
        if Self::exists(root) {
            Self::open(root)
        } else {
            Self::create(root)
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the blob for a `sha256:<hex>` digest
    pub fn blob_path(&self, digest: &str) -> StrataResult<PathBuf> {
        let (algorithm, hex) = digest
            .split_once(':')
            .ok_or_else(|| StrataError::BlobNotFound(digest.to_string()))?;
        Ok(self.root.join("blobs").join(algorithm).join(hex))
    }

    pub fn blob_exists(&self, digest: &str) -> bool {
        self.blob_path(digest).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Store a blob, returning a descriptor for it
    pub fn put_blob(&self, media_type: MediaType, data: &[u8]) -> StrataResult<Descriptor> {
        let digest = format!("sha256:{}", hex::encode(Sha256::digest(data)));
        let path = self.blob_path(&digest)?;
        if !path.exists() {
            write_atomic(&path, data)?;
        }
        Ok(Descriptor::new(media_type, data.len() as i64, digest))
    }

    /// Serialize and store a JSON blob
    pub fn put_json<T: Serialize>(&self, media_type: MediaType, value: &T) -> StrataResult<Descriptor> {
        let data = serde_json::to_vec(value)?;
        self.put_blob(media_type, &data)
    }

    pub fn read_blob(&self, digest: &str) -> StrataResult<Vec<u8>> {
        let path = self.blob_path(digest)?;
        fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StrataError::BlobNotFound(digest.to_string())
            } else {
                StrataError::io(format!("reading blob {}", digest), e)
            }
        })
    }

    pub fn read_json<T: DeserializeOwned>(&self, digest: &str) -> StrataResult<T> {
        let data = self.read_blob(digest)?;
        Ok(serde_json::from_slice(&data)?)
    }

    pub fn read_index(&self) -> StrataResult<ImageIndex> {
        let path = self.root.join(INDEX_FILE);
        let data = fs::read(&path)
            .map_err(|e| StrataError::io(format!("reading {}", path.display()), e))?;
        serde_json::from_slice(&data).map_err(|e| StrataError::OciLayout {
            path: self.root.clone(),
            reason: format!("invalid index.json: {}", e),
        })
    }

    fn write_index(&self, index: &ImageIndex) -> StrataResult<()> {
        let data = serde_json::to_vec_pretty(index)?;
        write_atomic(&self.root.join(INDEX_FILE), &data)
    }

    /// Descriptor currently referenced by `name`
    pub fn resolve_reference(&self, name: &str) -> StrataResult<Descriptor> {
        self.read_index()?
            .manifests()
            .iter()
            .find(|d| d.ref_name() == Some(name))
            .cloned()
            .ok_or_else(|| StrataError::ReferenceNotFound(name.to_string()))
    }

    /// Point `name` at `descriptor`, replacing any previous entry
    pub fn update_reference(&self, name: &str, descriptor: &Descriptor) -> StrataResult<()> {
        let mut index = self.read_index()?;
        let mut manifests = index.manifests().clone();
        manifests.retain(|d| d.ref_name() != Some(name));

        let mut entry = descriptor.clone();
        let mut annotations = entry.annotations().clone().unwrap_or_default();
        annotations.insert(ANNOTATION_REF_NAME.to_string(), name.to_string());
        entry.set_annotations(Some(annotations));
        manifests.push(entry);
        index.set_manifests(manifests);

        self.write_index(&index)?;
        debug!("Reference {} -> {}", name, descriptor.digest());
        Ok(())
    }

    /// Drop the entry for `name`; returns whether one existed
    pub fn remove_reference(&self, name: &str) -> StrataResult<bool> {
        let mut index = self.read_index()?;
        let mut manifests = index.manifests().clone();
        let before = manifests.len();
        manifests.retain(|d| d.ref_name() != Some(name));
        if manifests.len() == before {
            return Ok(false);
        }
        index.set_manifests(manifests);
        self.write_index(&index)?;
        debug!("Reference {} removed", name);
        Ok(true)
    }

    /// All named references, in index order
    pub fn list_references(&self) -> StrataResult<Vec<(String, Descriptor)>> {
        Ok(self
            .read_index()?
            .manifests()
            .iter()
            .filter_map(|d| d.ref_name().map(|n| (n.to_string(), d.clone())))
            .collect())
    }
}

fn empty_index() -> StrataResult<ImageIndex> {
    Ok(ImageIndexBuilder::default()
        .schema_version(SCHEMA_VERSION)
        .media_type(MediaType::ImageIndex)
        .manifests(Vec::<Descriptor>::new())
        .build()?)
}

/// Write a file by way of a temporary sibling and a rename
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> StrataResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| StrataError::io(format!("creating {}", parent.display()), e))?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    fs::write(&tmp, data).map_err(|e| StrataError::io(format!("writing {}", tmp.display()), e))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        StrataError::io(format!("renaming into {}", path.display()), e)
    })
}
