//! Build runtime abstraction

use crate::config::BuildContext;
use crate::error::StrataResult;
use crate::layer::{LayerBase, LayerDeclaration};
use async_trait::async_trait;
use std::path::Path;

/// Receives build command output line by line
pub type OutputSink<'a> = dyn Fn(String) + Send + Sync + 'a;

/// Executes the external parts of a layer build
///
/// The orchestrator owns sequencing, caching and storage; a runtime only
/// turns a prepared working tree into the next state.
#[async_trait]
pub trait BuildRuntime: Send + Sync {
    /// Populate an empty working tree from an upstream image or scratch.
    ///
    /// On return `bundle` holds `rootfs/` plus bundle metadata, and the
    /// layout reference `name` points at the base manifest.
    async fn acquire_base(
        &self,
        ctx: &BuildContext,
        name: &str,
        base: &LayerBase,
        bundle: &Path,
    ) -> StrataResult<()>;

    /// Run a layer's commands inside the working tree's root filesystem.
    ///
    /// Resolved imports are visible at `/strata`. When a command fails and
    /// `on_failure` is set, that command runs in the same root before the
    /// error is returned.
    async fn run(
        &self,
        ctx: &BuildContext,
        decl: &LayerDeclaration,
        bundle: &Path,
        on_failure: Option<&str>,
        on_output: &OutputSink<'_>,
    ) -> StrataResult<()>;

    /// Diff the working tree against its bundle metadata and write the
    /// result as a new layer, pointing reference `name` at it
    async fn repack(&self, ctx: &BuildContext, name: &str, bundle: &Path) -> StrataResult<()>;

    /// Get the human-readable runtime name for display
    fn runtime_name(&self) -> &'static str;
}
