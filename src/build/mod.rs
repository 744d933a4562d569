//! Build orchestration
//!
//! Builds a stackfile's layers in dependency order. For each layer:
//!
//! 1. resolve imports into the strata directory
//! 2. fingerprint declaration, parent and imports
//! 3. on a usable cache hit, point the layer's reference at the cached
//!    manifest and move on
//! 4. otherwise prepare `.working` from the base, run the commands,
//!    commit (or just snapshot build-only layers) and record the result
//!
//! Whatever happens, `.working` is removed at the end and storage is
//! detached unless asked to stay.

pub mod commit;

pub use commit::LayerCommit;

use crate::cache::{BuildCache, CachedOutput, Fingerprint};
use crate::config::BuildContext;
use crate::error::{StrataError, StrataResult};
use crate::import::{self, ImportSummary};
use crate::layer::{dependency_order, LayerBase, LayerDeclaration, Stackfile};
use crate::oci::{Descriptor, OciLayout};
use crate::orchestration::BuildRuntime;
use crate::storage::{Storage, WORKING_TREE};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Flags controlling one build
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Throw away the build cache and imports before building
    pub no_cache: bool,
    /// Command to run in the tree when a layer's commands fail
    pub on_run_failure: Option<String>,
    /// Keep storage attached after the build
    pub leave_unladen: bool,
}

/// Progress notifications
#[derive(Debug)]
pub enum BuildEvent<'a> {
    LayerStarted {
        layer: &'a str,
        index: usize,
        total: usize,
    },
    ImportsResolved {
        layer: &'a str,
        summary: &'a ImportSummary,
    },
    CacheChecked {
        layer: &'a str,
        fingerprint: &'a Fingerprint,
        hit: bool,
    },
    ReferenceUpdated {
        layer: &'a str,
        descriptor: &'a Descriptor,
    },
    TreePrepared {
        layer: &'a str,
    },
    CommandOutput {
        layer: &'a str,
        line: &'a str,
    },
    CommandsRun {
        layer: &'a str,
    },
    Committed {
        layer: &'a str,
        output: &'a CachedOutput,
    },
    CacheUpdated {
        layer: &'a str,
    },
    LayerDone {
        layer: &'a str,
        outcome: LayerOutcome,
    },
}

/// Receives build progress
pub type BuildObserver<'a> = dyn Fn(&BuildEvent<'_>) + Send + Sync + 'a;

/// How a layer was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerOutcome {
    /// Taken from the build cache
    Cached,
    /// Built and committed to the layout
    Built,
    /// Built as a snapshot only
    BuiltOnly,
}

#[derive(Debug, Clone)]
pub struct LayerReport {
    pub name: String,
    pub outcome: LayerOutcome,
    pub fingerprint: Fingerprint,
    pub descriptor: Option<Descriptor>,
}

/// Result of a whole build, layers in build order
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub layers: Vec<LayerReport>,
}

impl BuildReport {
    pub fn get(&self, name: &str) -> Option<&LayerReport> {
        self.layers.iter().find(|l| l.name == name)
    }

    pub fn count(&self, outcome: LayerOutcome) -> usize {
        self.layers.iter().filter(|l| l.outcome == outcome).count()
    }
}

/// Drives a build against one storage backend and runtime
pub struct Builder<'a> {
    ctx: &'a BuildContext,
    storage: &'a dyn Storage,
    runtime: &'a dyn BuildRuntime,
}

impl<'a> Builder<'a> {
    pub fn new(ctx: &'a BuildContext, storage: &'a dyn Storage, runtime: &'a dyn BuildRuntime) -> Self {
        Self {
            ctx,
            storage,
            runtime,
        }
    }

    /// Build every layer of `stack`
    pub async fn build(
        &self,
        stack: &Stackfile,
        options: &BuildOptions,
        observer: &BuildObserver<'_>,
    ) -> StrataResult<BuildReport> {
        let result = self.build_stack(stack, options, observer).await;
        let cleanup = self.cleanup(options).await;

        match (result, cleanup) {
            (Ok(report), Ok(())) => Ok(report),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(cleanup_err)) => {
                warn!("Cleanup after failed build also failed: {}", cleanup_err);
                Err(e)
            }
        }
    }

    async fn build_stack(
        &self,
        stack: &Stackfile,
        options: &BuildOptions,
        observer: &BuildObserver<'_>,
    ) -> StrataResult<BuildReport> {
        let order = dependency_order(stack)?;

        if options.no_cache {
            BuildCache::discard(&self.ctx.strata_dir).await?;
        }

        let layout = OciLayout::open_or_create(&self.ctx.oci_dir)?;
        let mut cache = BuildCache::open(&self.ctx.strata_dir).await?;
        let mut fingerprints: HashMap<String, Fingerprint> = HashMap::new();
        let mut report = BuildReport::default();
        let total = order.len();

        for (index, decl) in order.iter().enumerate() {
            let name = decl.name.as_str();
            observer(&BuildEvent::LayerStarted {
                layer: name,
                index,
                total,
            });

            let layer_report = self
                .build_layer(decl, &layout, &mut cache, &fingerprints, options, observer)
                .await
                .map_err(|e| e.in_layer(name))?;

            observer(&BuildEvent::LayerDone {
                layer: name,
                outcome: layer_report.outcome,
            });
            fingerprints.insert(decl.name.clone(), layer_report.fingerprint.clone());
            report.layers.push(layer_report);
        }

        Ok(report)
    }

    async fn build_layer(
        &self,
        decl: &LayerDeclaration,
        layout: &OciLayout,
        cache: &mut BuildCache,
        fingerprints: &HashMap<String, Fingerprint>,
        options: &BuildOptions,
        observer: &BuildObserver<'_>,
    ) -> StrataResult<LayerReport> {
        let name = decl.name.as_str();

        let summary = import::import(self.ctx, name, &decl.import).await?;
        observer(&BuildEvent::ImportsResolved {
            layer: name,
            summary: &summary,
        });

        let parent = match &decl.from {
            LayerBase::Built(tag) => fingerprints.get(tag),
            LayerBase::Scratch | LayerBase::Image(_) => None,
        };
        let fingerprint =
            BuildCache::fingerprint(decl, &self.ctx.imports_dir(name), parent).await?;

        let hit = cache
            .lookup(&fingerprint)
            .filter(|output| self.hit_usable(name, layout, output))
            .cloned();
        observer(&BuildEvent::CacheChecked {
            layer: name,
            fingerprint: &fingerprint,
            hit: hit.is_some(),
        });

        match hit {
            Some(CachedOutput::Image { descriptor }) => {
                layout.update_reference(name, &descriptor)?;
                observer(&BuildEvent::ReferenceUpdated {
                    layer: name,
                    descriptor: &descriptor,
                });
                info!("Found cached layer {}", name);
                Ok(LayerReport {
                    name: name.to_string(),
                    outcome: LayerOutcome::Cached,
                    fingerprint,
                    descriptor: Some(descriptor),
                })
            }
            Some(CachedOutput::BuildOnly) => {
                info!("Found cached build-only layer {}", name);
                Ok(LayerReport {
                    name: name.to_string(),
                    outcome: LayerOutcome::Cached,
                    fingerprint,
                    descriptor: None,
                })
            }
            None => {
                let output = self.build_fresh(decl, layout, options, observer).await?;
                cache.put(name, fingerprint.clone(), output.clone()).await?;
                observer(&BuildEvent::CacheUpdated { layer: name });

                Ok(match output {
                    CachedOutput::Image { descriptor } => LayerReport {
                        name: name.to_string(),
                        outcome: LayerOutcome::Built,
                        fingerprint,
                        descriptor: Some(descriptor),
                    },
                    CachedOutput::BuildOnly => LayerReport {
                        name: name.to_string(),
                        outcome: LayerOutcome::BuiltOnly,
                        fingerprint,
                        descriptor: None,
                    },
                })
            }
        }
    }

    /// A cache entry is only usable if what it points at still exists
    fn hit_usable(&self, name: &str, layout: &OciLayout, output: &CachedOutput) -> bool {
        if !self.storage.exists(name) {
            debug!("Cache entry for {} has no snapshot, rebuilding", name);
            return false;
        }
        match output {
            CachedOutput::Image { descriptor } if !layout.blob_exists(descriptor.digest()) => {
                debug!("Cached manifest of {} is gone from the layout, rebuilding", name);
                false
            }
            _ => true,
        }
    }

    async fn build_fresh(
        &self,
        decl: &LayerDeclaration,
        layout: &OciLayout,
        options: &BuildOptions,
        observer: &BuildObserver<'_>,
    ) -> StrataResult<CachedOutput> {
        let name = decl.name.as_str();
        info!("Building layer {}", name);

        self.storage.delete(WORKING_TREE).await?;
        let bundle = self.storage.path(WORKING_TREE);
        match &decl.from {
            LayerBase::Built(tag) => {
                if !self.storage.exists(tag) {
                    return Err(StrataError::TreeNotFound(tag.clone()));
                }
                self.storage.restore(tag, WORKING_TREE).await?;
            }
            base @ (LayerBase::Scratch | LayerBase::Image(_)) => {
                self.storage.create(WORKING_TREE).await?;
                self.runtime
                    .acquire_base(self.ctx, name, base, &bundle)
                    .await?;
            }
        }
        observer(&BuildEvent::TreePrepared { layer: name });

        let sink = |line: String| {
            observer(&BuildEvent::CommandOutput {
                layer: name,
                line: &line,
            })
        };
        self.runtime
            .run(
                self.ctx,
                decl,
                &bundle,
                options.on_run_failure.as_deref(),
                &sink,
            )
            .await?;
        observer(&BuildEvent::CommandsRun { layer: name });

        let commit = LayerCommit {
            ctx: self.ctx,
            layout,
            storage: self.storage,
            runtime: self.runtime,
        };
        let output = commit.run(decl).await?;
        observer(&BuildEvent::Committed {
            layer: name,
            output: &output,
        });
        Ok(output)
    }

    async fn cleanup(&self, options: &BuildOptions) -> StrataResult<()> {
        self.storage.delete(WORKING_TREE).await?;
        if options.leave_unladen {
            debug!("Leaving storage attached");
            return Ok(());
        }
        self.storage.detach().await
    }
}
