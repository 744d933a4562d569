//! Status command - check the build tools and show build state

use crate::cache::BuildCache;
use crate::config::schema::StorageBackend;
use crate::config::{BuildContext, Config};
use crate::error::{install_hint, StrataResult};
use crate::oci::OciLayout;
use crate::orchestration::userns::is_root;
use crate::orchestration::Platform;
use console::{style, Emoji};
use std::process::Stdio;
use tokio::process::Command;

static CHECK: Emoji<'_, '_> = Emoji("✓ ", "[OK] ");
static CROSS: Emoji<'_, '_> = Emoji("✗ ", "[FAIL] ");
static WARN: Emoji<'_, '_> = Emoji("⚠ ", "[WARN] ");

/// Execute the status command
pub async fn execute(config: &Config) -> StrataResult<()> {
    println!("{}", style("Strata System Status").bold().cyan());
    println!();

    let mut all_ok = true;
    let platform = Platform::detect();

    println!("{}", style("Platform:").bold());
    if platform == Platform::Unsupported {
        println!(
            "  {} {} - strata builds images on Linux only",
            CROSS,
            style(std::env::consts::OS).red()
        );
        all_ok = false;
    } else {
        println!("  {} Detected: {}", CHECK, platform.name());
    }
    if is_root() {
        println!("  {} Running as root", CHECK);
    } else {
        println!("  {} Unprivileged, builds run in a user namespace", CHECK);
    }

    println!();
    println!("{}", style("Build tools:").bold());
    all_ok &= check_cli("umoci", true).await;
    all_ok &= check_cli("skopeo", true).await;
    if !is_root() {
        all_ok &= check_cli("unshare", true).await;
    }
    if config.build.rsync {
        check_cli("rsync", false).await;
    }
    if config.storage.backend == StorageBackend::Btrfs {
        all_ok &= check_cli("btrfs", true).await;
    }

    let ctx = BuildContext::from_current_dir(config)?;
    println!();
    println!("{}", style("Build state:").bold());
    println!("  Storage: {:?}", config.storage.backend);
    if OciLayout::exists(&ctx.oci_dir) {
        let images = OciLayout::open(&ctx.oci_dir)?.list_references()?.len();
        println!("  {} Layout: {} ({} images)", CHECK, ctx.oci_dir.display(), images);
    } else {
        println!("  {} Layout: {} (not built yet)", WARN, ctx.oci_dir.display());
    }
    match BuildCache::open(&ctx.strata_dir).await {
        Ok(cache) => println!(
            "  {} Cache: {} ({} entries)",
            CHECK,
            cache.path().display(),
            cache.entries().count()
        ),
        Err(e) => {
            println!("  {} Cache: {}", CROSS, e);
            all_ok = false;
        }
    }

    println!();
    if all_ok {
        println!("{}", style("All critical checks passed").green().bold());
    } else {
        println!(
            "{}",
            style("Some checks failed - see above for details").yellow().bold()
        );
    }

    Ok(())
}

/// Print the tool's version line; `required` tools count as failures when missing
async fn check_cli(name: &str, required: bool) -> bool {
    let result = Command::new(name)
        .arg("--version")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await;

    match result {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout);
            let first_line = version.lines().next().unwrap_or("unknown");
            println!("  {} {} - {}", CHECK, style(name).green(), first_line.trim());
            true
        }
        _ if required => {
            println!(
                "  {} {} - Not found. {}",
                CROSS,
                style(name).red(),
                install_hint(name)
            );
            false
        }
        _ => {
            println!(
                "  {} {} - Not found. {}",
                WARN,
                style(name).yellow(),
                install_hint(name)
            );
            true
        }
    }
}
