//! Inspect command - list the images in the OCI layout

use crate::cli::args::InspectArgs;
use crate::config::{BuildContext, Config};
use crate::error::{StrataError, StrataResult};
use crate::oci::{Descriptor, ImageConfiguration, ImageManifest, OciLayout};
use crate::ui::{self, UiContext};
use console::style;
use serde::Serialize;

#[derive(Serialize)]
struct ImageInfo {
    name: String,
    descriptor: Descriptor,
    manifest: ImageManifest,
    config: ImageConfiguration,
}

/// Execute the inspect command
pub async fn execute(args: InspectArgs, config: &Config) -> StrataResult<()> {
    let ui_ctx = UiContext::detect();
    let ctx = BuildContext::from_current_dir(config)?;

    if !OciLayout::exists(&ctx.oci_dir) {
        if args.name.is_some() {
            return Err(StrataError::OciLayout {
                path: ctx.oci_dir.clone(),
                reason: "no layout here yet".to_string(),
            });
        }
        ui::step_warn_hint(
            &ui_ctx,
            &format!("No OCI layout at {}", ctx.oci_dir.display()),
            "Run: strata build",
        );
        return Ok(());
    }
    let layout = OciLayout::open(&ctx.oci_dir)?;

    let references = match &args.name {
        Some(name) => vec![(name.clone(), layout.resolve_reference(name)?)],
        None => layout.list_references()?,
    };

    let images = references
        .into_iter()
        .map(|(name, descriptor)| load_image(&layout, name, descriptor))
        .collect::<StrataResult<Vec<_>>>()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&images)?);
        return Ok(());
    }

    if images.is_empty() {
        println!("No images in {}", ctx.oci_dir.display());
        return Ok(());
    }

    for image in &images {
        print_image(&ui_ctx, image);
    }
    Ok(())
}

fn load_image(layout: &OciLayout, name: String, descriptor: Descriptor) -> StrataResult<ImageInfo> {
    let manifest: ImageManifest = layout.read_json(descriptor.digest())?;
    let config: ImageConfiguration = layout.read_json(manifest.config().digest())?;
    Ok(ImageInfo {
        name,
        descriptor,
        manifest,
        config,
    })
}

fn print_image(ui_ctx: &UiContext, image: &ImageInfo) {
    ui::section(ui_ctx, &image.name);
    ui::key_value(ui_ctx, "digest", image.descriptor.digest());
    ui::key_value(
        ui_ctx,
        "platform",
        &format!("{}/{}", image.config.os(), image.config.architecture()),
    );
    if let Some(created) = image.config.created() {
        ui::key_value(ui_ctx, "created", created);
    }

    let layers = image.manifest.layers();
    let size: i64 = layers.iter().map(|l| l.size()).sum();
    ui::key_value(
        ui_ctx,
        "layers",
        &format!("{} ({} bytes)", layers.len(), size),
    );

    let Some(exec) = image.config.config() else {
        return;
    };
    if let Some(entrypoint) = exec.entrypoint() {
        ui::key_value(ui_ctx, "entrypoint", &shell_words::join(entrypoint));
    }
    if let Some(cmd) = exec.cmd() {
        ui::key_value(ui_ctx, "cmd", &shell_words::join(cmd));
    }
    if let Some(dir) = exec.working_dir() {
        ui::key_value(ui_ctx, "working dir", dir);
    }
    for env in exec.env().iter().flatten() {
        println!("  {} {}", style("env").dim(), env);
    }
    let mut labels: Vec<_> = exec.labels().iter().flatten().collect();
    labels.sort();
    for (key, value) in labels {
        println!("  {} {}={}", style("label").dim(), key, value);
    }
    for volume in exec.volumes().iter().flatten() {
        println!("  {} {}", style("volume").dim(), volume);
    }
}
