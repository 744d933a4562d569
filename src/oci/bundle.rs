//! Bundle metadata beside a working tree's `rootfs/`
//!
//! `umoci.json` records the descriptor path the tree was last unpacked or
//! committed against; `<digest>.mtree` is the manifest used to compute the
//! next diff. Both must follow every commit or the next repack diffs
//! against the wrong base.

use crate::error::{StrataError, StrataResult};
use crate::oci::layout::write_atomic;
use crate::oci::types::{Descriptor, DescriptorPath};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const BUNDLE_META_FILE: &str = "umoci.json";
const BUNDLE_META_VERSION: &str = "2";
const MTREE_EXTENSION: &str = "mtree";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleMeta {
    #[serde(rename = "umoci_version")]
    pub version: String,
    pub from_descriptor_path: DescriptorPath,
}

/// Record `path` as the descriptor the bundle was committed against
pub fn write_bundle_meta(bundle: &Path, path: &DescriptorPath) -> StrataResult<()> {
    let meta = BundleMeta {
        version: BUNDLE_META_VERSION.to_string(),
        from_descriptor_path: path.clone(),
    };
    let data = serde_json::to_vec(&meta)?;
    write_atomic(&bundle.join(BUNDLE_META_FILE), &data)
}

pub fn read_bundle_meta(bundle: &Path) -> StrataResult<BundleMeta> {
    let path = bundle.join(BUNDLE_META_FILE);
    let data = fs::read(&path).map_err(|e| StrataError::io(format!("reading {}", path.display()), e))?;
    serde_json::from_slice(&data).map_err(|e| StrataError::BundleInconsistent {
        path: bundle.to_path_buf(),
        reason: format!("invalid {}: {}", BUNDLE_META_FILE, e),
    })
}

/// File name of the mtree manifest for a descriptor
pub fn mtree_name(descriptor: &Descriptor) -> String {
    format!("{}.{}", descriptor.digest().replace(':', "_"), MTREE_EXTENSION)
}

/// All `*.mtree` files in a bundle directory
pub fn mtree_files(bundle: &Path) -> StrataResult<Vec<PathBuf>> {
    let entries = fs::read_dir(bundle)
        .map_err(|e| StrataError::io(format!("listing {}", bundle.display()), e))?;

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StrataError::io(format!("listing {}", bundle.display()), e))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some(MTREE_EXTENSION) {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

/// Rename the bundle's single mtree file after `descriptor`.
///
/// Returns `false` when the bundle carries no mtree file at all.
pub fn update_bundle_mtree(bundle: &Path, descriptor: &Descriptor) -> StrataResult<bool> {
    let mut found = mtree_files(bundle)?;
    let current = match found.len() {
        0 => {
            warn!("No mtree file in {}, skipping rename", bundle.display());
            return Ok(false);
        }
        1 => found.remove(0),
        n => {
            return Err(StrataError::BundleInconsistent {
                path: bundle.to_path_buf(),
                reason: format!("expected one mtree file, found {}", n),
            })
        }
    };

    let target = bundle.join(mtree_name(descriptor));
    if current != target {
        fs::rename(&current, &target)
            .map_err(|e| StrataError::io(format!("renaming {}", current.display()), e))?;
        debug!("mtree {} -> {}", current.display(), target.display());
    }
    Ok(true)
}
