//! Layer declarations
//!
//! Parsing the stackfile into immutable declarations, ordering them by
//! dependency, and folding a declaration into an image config.

pub mod compose;
pub mod manifest;
pub mod resolve;

pub use compose::apply_layer_config;
pub use manifest::{CommandSpec, ImageRef, LayerBase, LayerDeclaration, Stackfile, Transport};
pub use resolve::dependency_order;
