//! OCI image layout access
//!
//! Reading and writing the layout, per-reference mutation sessions, and
//! the bundle metadata kept beside an unpacked tree.

pub mod bundle;
mod layout;
mod mutator;
pub mod types;

pub use layout::OciLayout;
pub use mutator::{ImageMeta, Mutator};
pub use types::{
    Descriptor, DescriptorExt, DescriptorPath, History, ImageConfig, ImageConfiguration,
    ImageManifest, MediaType,
};
