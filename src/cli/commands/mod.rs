//! CLI command implementations

pub mod build;
pub mod clean;
pub mod config;
pub mod inspect;
pub mod status;

pub use build::execute as build;
pub use clean::execute as clean;
pub use config::execute as config;
pub use inspect::execute as inspect;
pub use status::execute as status;
