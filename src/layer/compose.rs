//! Image config composition
//!
//! Folds a layer declaration into the image config inherited from its
//! base. The result depends only on the inherited config and the
//! declaration, so rebuilding a layer yields the same config.

use crate::error::StrataResult;
use crate::layer::manifest::LayerDeclaration;
use crate::oci::ImageConfig;

/// Apply a declaration to an inherited image config.
///
/// Environment entries are appended in key order, and a `PATH` entry
/// using `default_path` is added when none exists afterwards.
/// `full_command` replaces the entrypoint and clears `cmd`; otherwise
/// `cmd` and `entrypoint` each override when declared.
pub fn apply_layer_config(
    config: &mut ImageConfig,
    decl: &LayerDeclaration,
    default_path: &str,
) -> StrataResult<()> {
    let mut env = config.env().clone().unwrap_or_default();
    merge_env(&mut env, decl, default_path);
    config.set_env(Some(env));

    if let Some(cmd) = &decl.cmd {
        config.set_cmd(Some(cmd.argv()?));
    }
    if let Some(entrypoint) = &decl.entrypoint {
        config.set_entrypoint(Some(entrypoint.argv()?));
    }
    if let Some(full) = &decl.full_command {
        config.set_cmd(None);
        config.set_entrypoint(Some(full.argv()?));
    }

    if !decl.volumes.is_empty() {
        let mut volumes = config.volumes().clone().unwrap_or_default();
        for volume in &decl.volumes {
            if !volumes.contains(volume) {
                volumes.push(volume.clone());
            }
        }
        config.set_volumes(Some(volumes));
    }

    if !decl.labels.is_empty() {
        let mut labels = config.labels().clone().unwrap_or_default();
        labels.extend(decl.labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        config.set_labels(Some(labels));
    }

    if !decl.working_dir.is_empty() {
        config.set_working_dir(Some(decl.working_dir.clone()));
    }

    Ok(())
}

fn merge_env(env: &mut Vec<String>, decl: &LayerDeclaration, default_path: &str) {
    env.extend(decl.environment.iter().map(|(k, v)| format!("{}={}", k, v)));

    if !env.iter().any(|e| e.starts_with("PATH=")) {
        env.push(format!("PATH={}", default_path));
    }
}
