//! Layer commit
//!
//! Turns the working tree of a freshly built layer into a named image
//! in the OCI layout, keeps the bundle metadata in step with what was
//! committed, and snapshots the tree for layers built on top of it.

use crate::cache::CachedOutput;
use crate::config::BuildContext;
use crate::error::{StrataError, StrataResult};
use crate::layer::{apply_layer_config, LayerDeclaration};
use crate::oci::types::{host_architecture, host_os, HistoryBuilder};
use crate::oci::{bundle, Mutator, OciLayout};
use crate::orchestration::BuildRuntime;
use crate::storage::{Storage, WORKING_TREE};
use chrono::{SecondsFormat, Utc};
use tracing::{debug, info};

/// `created_by` of the history entry each commit appends
pub const HISTORY_CREATED_BY: &str = "strata build";

/// Everything a commit writes to
pub struct LayerCommit<'a> {
    pub ctx: &'a BuildContext,
    pub layout: &'a OciLayout,
    pub storage: &'a dyn Storage,
    pub runtime: &'a dyn BuildRuntime,
}

impl LayerCommit<'_> {
    /// Commit the working tree as `decl`; build-only layers are only snapshotted
    pub async fn run(&self, decl: &LayerDeclaration) -> StrataResult<CachedOutput> {
        let name = decl.name.as_str();

        if decl.build_only {
            self.snapshot(name).await?;
            // Base acquisition tags the base image under the layer's name
            if self.layout.remove_reference(name)? {
                debug!("Dropped base reference of build-only layer {}", name);
            }
            debug!("{} is build-only, snapshot taken", name);
            return Ok(CachedOutput::BuildOnly);
        }

        let bundle_dir = self.storage.path(WORKING_TREE);
        self.runtime.repack(self.ctx, name, &bundle_dir).await?;

        let mut mutator = Mutator::open(self.layout, name)?;
        let mut config = mutator.config();
        apply_layer_config(&mut config, decl, &self.ctx.default_path)?;

        let created = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
        let mut meta = mutator.meta();
        meta.created = Some(created.clone());
        meta.architecture = host_architecture();
        meta.os = host_os();

        let history = HistoryBuilder::default()
            .created(created)
            .created_by(HISTORY_CREATED_BY)
            .empty_layer(true)
            .build()?;
        mutator.set(config, meta, None, history);

        let path = mutator.commit()?;
        let Some(descriptor) = path.root().cloned() else {
            return Err(StrataError::Mutator {
                name: name.to_string(),
                reason: "commit produced an empty descriptor path".to_string(),
            });
        };
        self.layout.update_reference(name, &descriptor)?;

        bundle::update_bundle_mtree(&bundle_dir, &descriptor)?;
        bundle::write_bundle_meta(&bundle_dir, &path)?;

        self.snapshot(name).await?;
        info!("Committed {} as {}", name, descriptor.digest());
        Ok(CachedOutput::Image { descriptor })
    }

    async fn snapshot(&self, name: &str) -> StrataResult<()> {
        self.storage.delete(name).await?;
        self.storage.snapshot(WORKING_TREE, name).await
    }
}
