//! OCI image-spec documents
//!
//! Documents are the `oci_spec::image` types. This module adds the
//! descriptor path umoci records beside a bundle, host platform naming,
//! and the reference-name lookup the layout code needs.

use crate::error::StrataResult;
use serde::{Deserialize, Serialize};

pub use oci_spec::image::{
    Arch, Config as ImageConfig, Descriptor, History, HistoryBuilder, ImageConfiguration,
    ImageConfigurationBuilder, ImageIndex, ImageIndexBuilder, ImageManifest,
    ImageManifestBuilder, MediaType, Os, Platform, PlatformBuilder, RootFs,
};

/// `schemaVersion` of index and manifest documents
pub const SCHEMA_VERSION: u32 = 2;

/// Annotation carrying a reference name on an index entry
pub const ANNOTATION_REF_NAME: &str = "org.opencontainers.image.ref.name";

/// Lookups on descriptors that `oci_spec` leaves to callers
pub trait DescriptorExt {
    /// Reference name annotation, if any
    fn ref_name(&self) -> Option<&str>;
}

impl DescriptorExt for Descriptor {
    fn ref_name(&self) -> Option<&str> {
        self.annotations()
            .as_ref()
            .and_then(|a| a.get(ANNOTATION_REF_NAME))
            .map(String::as_str)
    }
}

/// Path of descriptors from an index entry down to a manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorPath {
    pub walk: Vec<Descriptor>,
}

impl DescriptorPath {
    pub fn new(root: Descriptor) -> Self {
        Self { walk: vec![root] }
    }

    /// First descriptor in the walk (the one referenced from `index.json`)
    pub fn root(&self) -> Option<&Descriptor> {
        self.walk.first()
    }

    /// Last descriptor in the walk (the manifest itself)
    pub fn descriptor(&self) -> Option<&Descriptor> {
        self.walk.last()
    }
}

/// Host architecture in OCI naming
pub fn host_architecture() -> Arch {
    let name = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "powerpc64" => "ppc64le",
        "loongarch64" => "loong64",
        other => other,
    };
    Arch::from(name)
}

/// Host OS in OCI naming
pub fn host_os() -> Os {
    Os::from(std::env::consts::OS)
}

/// Platform of an image configuration, for its index entry
pub fn platform_of(image: &ImageConfiguration) -> StrataResult<Platform> {
    Ok(PlatformBuilder::default()
        .architecture(image.architecture().clone())
        .os(image.os().clone())
        .build()?)
}
