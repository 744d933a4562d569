//! Clean command - remove everything a build produced

use crate::cache::BuildCache;
use crate::cli::args::CleanArgs;
use crate::config::{BuildContext, Config};
use crate::error::{StrataError, StrataResult};
use crate::storage::{open_storage, Storage};
use crate::ui::{self, TaskSpinner, UiContext};
use std::path::Path;
use tokio::fs;
use tracing::debug;

/// Execute the clean command
pub async fn execute(args: CleanArgs, config: &Config) -> StrataResult<()> {
    let ui_ctx = UiContext::detect().with_auto_yes(args.yes);
    let ctx = BuildContext::from_current_dir(config)?;

    let mut targets = vec![ctx.roots_dir.as_path(), ctx.oci_dir.as_path()];
    if !args.keep_cache {
        targets.push(ctx.strata_dir.as_path());
    }
    let existing: Vec<&Path> = targets.into_iter().filter(|p| p.exists()).collect();
    if existing.is_empty() {
        ui::step_info(&ui_ctx, "Nothing to clean");
        return Ok(());
    }

    for path in &existing {
        ui::remark(&ui_ctx, &path.display().to_string());
    }
    if !ui::confirm(&ui_ctx, "Remove these directories?", false).await? {
        ui::step_warn_hint(&ui_ctx, "Nothing removed", "Pass --yes to skip the prompt");
        return Ok(());
    }

    let mut spinner = TaskSpinner::new(&ui_ctx);
    spinner.start("Removing build output...");

    let storage = open_storage(&ctx);
    let result = clean_all(&ctx, storage.as_ref(), args.keep_cache).await;
    match &result {
        Ok(()) => spinner.stop("Build output removed"),
        Err(_) => spinner.stop_error("Clean failed"),
    }
    result
}

async fn clean_all(ctx: &BuildContext, storage: &dyn Storage, keep_cache: bool) -> StrataResult<()> {
    remove_trees(&ctx.roots_dir, storage).await?;
    remove_dir(&ctx.oci_dir).await?;
    if !keep_cache {
        BuildCache::discard(&ctx.strata_dir).await?;
    }
    Ok(())
}

/// Trees go through storage so subvolumes are deleted properly
async fn remove_trees(roots_dir: &Path, storage: &dyn Storage) -> StrataResult<()> {
    if !roots_dir.exists() {
        return Ok(());
    }

    let mut entries = fs::read_dir(roots_dir)
        .await
        .map_err(|e| StrataError::io(format!("reading {}", roots_dir.display()), e))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StrataError::io(format!("reading {}", roots_dir.display()), e))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        debug!("Deleting tree {}", name);
        storage.delete(&name).await?;
    }

    storage.detach().await?;
    remove_dir(roots_dir).await
}

async fn remove_dir(path: &Path) -> StrataResult<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StrataError::io(format!("removing {}", path.display()), e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DirStorage;
    use tempfile::TempDir;

    #[tokio::test]
    async fn clean_removes_everything_but_kept_cache() {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.paths.strata_dir = temp.path().join(".strata");
        config.paths.oci_dir = temp.path().join("oci");
        config.paths.roots_dir = temp.path().join("roots");
        let ctx = BuildContext::from_config(&config, temp.path());

        std::fs::create_dir_all(ctx.rootfs_dir("base")).unwrap();
        std::fs::create_dir_all(ctx.rootfs_dir(".working")).unwrap();
        std::fs::create_dir_all(&ctx.oci_dir).unwrap();
        std::fs::create_dir_all(ctx.imports_dir("base")).unwrap();

        let storage = DirStorage::new(ctx.roots_dir.clone());
        clean_all(&ctx, &storage, true).await.unwrap();
        assert!(!ctx.roots_dir.exists());
        assert!(!ctx.oci_dir.exists());
        assert!(ctx.strata_dir.exists());

        clean_all(&ctx, &storage, false).await.unwrap();
        assert!(!ctx.strata_dir.exists());
    }
}
