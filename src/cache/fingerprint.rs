//! Layer fingerprints
//!
//! A fingerprint is the SHA256 of everything that determines a layer's
//! output: the declaration itself, the fingerprint of the layer it is
//! built on, and the content of its resolved imports. Same inputs give
//! the same fingerprint; any change gives a different one.

use crate::error::{StrataError, StrataResult};
use crate::layer::LayerDeclaration;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use walkdir::WalkDir;

/// Hex SHA256 identifying a layer's inputs
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for display
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Compute the fingerprint of a layer.
///
/// `imports_dir` must already hold the layer's resolved imports; a
/// missing directory hashes as empty.
pub fn compute(
    decl: &LayerDeclaration,
    imports_dir: &Path,
    parent: Option<&Fingerprint>,
) -> StrataResult<Fingerprint> {
    let mut hasher = Sha256::new();

    hasher.update(b"declaration\0");
    hasher.update(serde_json::to_vec(decl)?);

    hasher.update(b"\0parent\0");
    if let Some(parent) = parent {
        hasher.update(parent.as_str().as_bytes());
    }

    hasher.update(b"\0imports\0");
    hasher.update(hash_import_dir(imports_dir)?.as_bytes());

    Ok(Fingerprint(hex::encode(hasher.finalize())))
}

/// Digest of a directory tree: relative path, kind, permission bits and
/// content (or link target) of every entry, in sorted order.
pub fn hash_import_dir(dir: &Path) -> StrataResult<String> {
    let mut hasher = Sha256::new();
    if !dir.exists() {
        return Ok(hex::encode(hasher.finalize()));
    }

    let walker = WalkDir::new(dir)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            StrataError::io(
                format!("walking {}", path.display()),
                e.into_io_error()
                    .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "filesystem loop")),
            )
        })?;
        let path = entry.path();
        let rel = path.strip_prefix(dir).unwrap_or(path);
        let meta = entry
            .metadata()
            .map_err(|e| StrataError::Internal(format!("stat {}: {}", path.display(), e)))?;

        hasher.update(rel.as_os_str().as_encoded_bytes());
        hasher.update(b"\0");

        let file_type = entry.file_type();
        let kind: &[u8] = if file_type.is_symlink() {
            b"l"
        } else if file_type.is_dir() {
            b"d"
        } else {
            b"f"
        };
        hasher.update(kind);
        hasher.update((meta.permissions().mode() & 0o7777).to_le_bytes());

        if file_type.is_symlink() {
            let target = fs::read_link(path)
                .map_err(|e| StrataError::io(format!("reading link {}", path.display()), e))?;
            hasher.update(target.as_os_str().as_encoded_bytes());
        } else if file_type.is_file() {
            let mut file = fs::File::open(path)
                .map_err(|e| StrataError::io(format!("opening {}", path.display()), e))?;
            let mut content = Sha256::new();
            io::copy(&mut file, &mut content)
                .map_err(|e| StrataError::io(format!("hashing {}", path.display()), e))?;
            hasher.update(content.finalize());
        }
        hasher.update(b"\0");
    }

    Ok(hex::encode(hasher.finalize()))
}
