//! Runtime factory
//!
//! Provides platform detection and runtime instantiation.

use crate::error::{StrataError, StrataResult};
use crate::orchestration::native::NativeRuntime;
use crate::orchestration::runtime::BuildRuntime;

/// Detected platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Linux - namespaces, chroot and umoci are available
    Linux,
    /// Anything else
    Unsupported,
}

impl Platform {
    /// Detect the current platform
    pub fn detect() -> Self {
        match std::env::consts::OS {
            "linux" => Platform::Linux,
            _ => Platform::Unsupported,
        }
    }

    /// Get a human-readable platform name
    pub fn name(&self) -> &'static str {
        match self {
            Platform::Linux => "Linux",
            Platform::Unsupported => "Unsupported",
        }
    }
}

/// Create the build runtime for the current platform
pub fn create_runtime() -> StrataResult<Box<dyn BuildRuntime>> {
    match Platform::detect() {
        Platform::Linux => Ok(Box::new(NativeRuntime::new())),
        Platform::Unsupported => Err(StrataError::UnsupportedPlatform(
            std::env::consts::OS.to_string(),
        )),
    }
}
