//! Strata - incremental OCI image builder
//!
//! Builds a stack of named, dependent layers into an OCI image layout,
//! reusing earlier results through a content-aware build cache and a
//! deduplicating import directory.

pub mod build;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod import;
pub mod layer;
pub mod oci;
pub mod orchestration;
pub mod storage;
pub mod ui;

pub use error::{StrataError, StrataResult};
