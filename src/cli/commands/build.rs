//! Build command - build every layer of a stackfile

use crate::build::{BuildEvent, BuildOptions, Builder, LayerOutcome};
use crate::cache::CachedOutput;
use crate::cli::args::BuildArgs;
use crate::config::{BuildContext, Config};
use crate::error::StrataResult;
use crate::layer::manifest::parse_substitution;
use crate::layer::Stackfile;
use crate::orchestration::create_runtime;
use crate::storage::open_storage;
use crate::ui::{self, LayerProgress, UiContext};

/// Execute the build command
pub async fn execute(args: BuildArgs, config: &Config) -> StrataResult<()> {
    let ui_ctx = UiContext::detect();
    let ctx = BuildContext::from_current_dir(config)?;

    let substitutions = args
        .substitute
        .iter()
        .map(|arg| parse_substitution(arg))
        .collect::<StrataResult<Vec<_>>>()?;
    let path = args
        .stackfile
        .unwrap_or_else(|| config.build.stackfile.clone());
    let stack = Stackfile::from_file(&path, &substitutions).await?;

    let runtime = create_runtime()?;
    let storage = open_storage(&ctx);
    let options = BuildOptions {
        no_cache: args.no_cache,
        on_run_failure: args.on_run_failure,
        leave_unladen: args.leave_unladen,
    };

    ui::intro(&ui_ctx, &format!("strata build {}", path.display()));
    ui::remark(
        &ui_ctx,
        &format!(
            "{} layers, {} storage, {} runtime",
            stack.layers.len(),
            storage.name(),
            runtime.runtime_name()
        ),
    );

    let progress = LayerProgress::new(&ui_ctx, stack.layers.len());
    let observer = |event: &BuildEvent<'_>| render(&progress, event);

    let builder = Builder::new(&ctx, storage.as_ref(), runtime.as_ref());
    let result = builder.build(&stack, &options, &observer).await;
    progress.finish();
    let report = result?;

    let built = report.count(LayerOutcome::Built) + report.count(LayerOutcome::BuiltOnly);
    let cached = report.count(LayerOutcome::Cached);
    ui::outro_success(
        &ui_ctx,
        &format!("{} built, {} cached, layout at {}", built, cached, ctx.oci_dir.display()),
    );
    Ok(())
}

fn render(progress: &LayerProgress, event: &BuildEvent<'_>) {
    match event {
        BuildEvent::LayerStarted {
            layer,
            index,
            total,
        } => progress.layer_started(layer, *index, *total),
        BuildEvent::ImportsResolved { summary, .. } if !summary.imports.is_empty() => {
            progress.note(&format!(
                "imports: {} copied, {} reused, {} downloaded, {} synced",
                summary.copied, summary.reused, summary.downloaded, summary.synced
            ))
        }
        BuildEvent::CacheChecked { fingerprint, hit, .. } => {
            let verdict = if *hit { "cache hit" } else { "cache miss" };
            progress.note(&format!("{} {}", verdict, fingerprint.short()))
        }
        BuildEvent::TreePrepared { .. } => progress.note("running commands"),
        BuildEvent::CommandOutput { line, .. } => progress.output(line),
        BuildEvent::Committed {
            output: CachedOutput::Image { descriptor },
            ..
        } => progress.note(&format!("committed {}", descriptor.digest())),
        BuildEvent::LayerDone { layer, outcome } => {
            let detail = match outcome {
                LayerOutcome::Cached => "cached",
                LayerOutcome::Built => "built",
                LayerOutcome::BuiltOnly => "built, build-only",
            };
            progress.layer_done(layer, detail)
        }
        _ => {}
    }
}
