//! Image mutation sessions
//!
//! A `Mutator` loads the manifest and config a reference points at, lets
//! the caller replace the config, meta and history, and writes new config
//! and manifest blobs on `commit`. Dropping a mutator without committing
//! leaves the layout untouched.

use crate::error::{StrataError, StrataResult};
use crate::oci::layout::OciLayout;
use crate::oci::types::{
    platform_of, Arch, Descriptor, DescriptorPath, History, ImageConfig, ImageConfiguration,
    ImageManifest, MediaType, Os,
};
use std::collections::HashMap;
use tracing::debug;

/// Non-config image metadata
#[derive(Debug, Clone, PartialEq)]
pub struct ImageMeta {
    pub created: Option<String>,
    pub author: Option<String>,
    pub architecture: Arch,
    pub os: Os,
}

/// An open mutation session on one named reference
pub struct Mutator<'a> {
    layout: &'a OciLayout,
    name: String,
    source: Descriptor,
    manifest: ImageManifest,
    image: ImageConfiguration,
}

impl<'a> Mutator<'a> {
    /// Load the image currently referenced by `name`
    pub fn open(layout: &'a OciLayout, name: &str) -> StrataResult<Self> {
        let source = layout.resolve_reference(name)?;
        let manifest: ImageManifest =
            layout
                .read_json(source.digest())
                .map_err(|e| StrataError::Mutator {
                    name: name.to_string(),
                    reason: format!("reading manifest: {}", e),
                })?;
        let image: ImageConfiguration = layout
            .read_json(manifest.config().digest())
            .map_err(|e| StrataError::Mutator {
                name: name.to_string(),
                reason: format!("reading config: {}", e),
            })?;

        Ok(Self {
            layout,
            name: name.to_string(),
            source,
            manifest,
            image,
        })
    }

    /// Current execution config (empty if the image has none)
    pub fn config(&self) -> ImageConfig {
        self.image.config().clone().unwrap_or_default()
    }

    pub fn meta(&self) -> ImageMeta {
        ImageMeta {
            created: self.image.created().clone(),
            author: self.image.author().clone(),
            architecture: self.image.architecture().clone(),
            os: self.image.os().clone(),
        }
    }

    pub fn annotations(&self) -> Option<&HashMap<String, String>> {
        self.manifest.annotations().as_ref()
    }

    /// Replace config and meta, optionally replacing annotations, and append
    /// a history entry
    pub fn set(
        &mut self,
        config: ImageConfig,
        meta: ImageMeta,
        annotations: Option<HashMap<String, String>>,
        history: History,
    ) {
        self.image.set_config(Some(config));
        self.image.set_created(meta.created);
        self.image.set_author(meta.author);
        self.image.set_architecture(meta.architecture);
        self.image.set_os(meta.os);
        if let Some(annotations) = annotations {
            self.manifest.set_annotations(Some(annotations));
        }

        let mut entries = self.image.history().clone();
        entries.push(history);
        self.image.set_history(entries);
    }

    /// Write config and manifest blobs and return the new descriptor path.
    ///
    /// The index entry's platform follows the committed meta. The
    /// reference itself is not moved; callers update it explicitly.
    pub fn commit(self) -> StrataResult<DescriptorPath> {
        let mut manifest = self.manifest;
        manifest.set_config(self.layout.put_json(MediaType::ImageConfig, &self.image)?);

        let mut descriptor = self.layout.put_json(MediaType::ImageManifest, &manifest)?;
        descriptor.set_platform(Some(platform_of(&self.image)?));

        debug!(
            "Committed {}: {} -> {}",
            self.name,
            self.source.digest(),
            descriptor.digest()
        );
        Ok(DescriptorPath::new(descriptor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::types::{
        HistoryBuilder, ImageConfigurationBuilder, ImageManifestBuilder, RootFs, SCHEMA_VERSION,
    };
    use tempfile::TempDir;

    fn seed(layout: &OciLayout, name: &str) -> Descriptor {
        let image = ImageConfigurationBuilder::default()
            .architecture(Arch::from("arm64"))
            .os(Os::Linux)
            .rootfs(RootFs::default())
            .build()
            .unwrap();
        let config = layout.put_json(MediaType::ImageConfig, &image).unwrap();
        let manifest = ImageManifestBuilder::default()
            .schema_version(SCHEMA_VERSION)
            .media_type(MediaType::ImageManifest)
            .config(config)
            .layers(Vec::<Descriptor>::new())
            .build()
            .unwrap();
        let desc = layout.put_json(MediaType::ImageManifest, &manifest).unwrap();
        layout.update_reference(name, &desc).unwrap();
        desc
    }

    fn history(created_by: &str) -> History {
        HistoryBuilder::default()
            .created_by(created_by)
            .empty_layer(true)
            .build()
            .unwrap()
    }

    #[test]
    fn commit_writes_new_manifest() {
        let temp = TempDir::new().unwrap();
        let layout = OciLayout::open_or_create(temp.path()).unwrap();
        let original = seed(&layout, "base");

        let mut mutator = Mutator::open(&layout, "base").unwrap();
        let mut config = mutator.config();
        config.set_env(Some(vec!["FOO=bar".to_string()]));
        let meta = mutator.meta();
        mutator.set(config, meta, None, history("test"));
        let path = mutator.commit().unwrap();
        let new = path.root().unwrap();
        assert_ne!(new.digest(), original.digest());

        // reference unchanged until the caller moves it
        assert_eq!(
            layout.resolve_reference("base").unwrap().digest(),
            original.digest()
        );

        let manifest: ImageManifest = layout.read_json(new.digest()).unwrap();
        let image: ImageConfiguration = layout.read_json(manifest.config().digest()).unwrap();
        assert_eq!(
            image.config().clone().unwrap().env(),
            &Some(vec!["FOO=bar".to_string()])
        );
        assert_eq!(image.history().len(), 1);
    }

    #[test]
    fn platform_follows_new_meta() {
        let temp = TempDir::new().unwrap();
        let layout = OciLayout::open_or_create(temp.path()).unwrap();
        seed(&layout, "base");

        let mut mutator = Mutator::open(&layout, "base").unwrap();
        let mut meta = mutator.meta();
        assert_eq!(meta.architecture, Arch::from("arm64"));
        meta.architecture = Arch::from("amd64");
        mutator.set(ImageConfig::default(), meta, None, history("test"));

        let path = mutator.commit().unwrap();
        let platform = path.root().unwrap().platform().clone().unwrap();
        assert_eq!(platform.architecture(), &Arch::from("amd64"));
        assert_eq!(platform.os(), &Os::Linux);
    }

    #[test]
    fn dropped_mutator_leaves_layout_alone() {
        let temp = TempDir::new().unwrap();
        let layout = OciLayout::open_or_create(temp.path()).unwrap();
        seed(&layout, "base");
        let before = std::fs::read_dir(temp.path().join("blobs/sha256")).unwrap().count();

        {
            let mut mutator = Mutator::open(&layout, "base").unwrap();
            let meta = mutator.meta();
            mutator.set(ImageConfig::default(), meta, None, History::default());
        }

        let after = std::fs::read_dir(temp.path().join("blobs/sha256")).unwrap().count();
        assert_eq!(before, after);
    }

    #[test]
    fn open_unknown_reference_fails() {
        let temp = TempDir::new().unwrap();
        let layout = OciLayout::open_or_create(temp.path()).unwrap();
        assert!(Mutator::open(&layout, "nope").is_err());
    }
}
