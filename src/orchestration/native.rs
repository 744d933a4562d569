//! Native build runtime for Linux
//!
//! Shells out to the standard image tooling:
//! - `skopeo copy` to fetch upstream images into the layout
//! - `umoci new|unpack|repack` to create, unpack and diff trees
//! - `unshare` + `chroot` to run layer commands in the tree
//!
//! Unprivileged builds run the tree-owning steps in a user namespace.

use crate::config::BuildContext;
use crate::error::{StrataError, StrataResult};
use crate::layer::{LayerBase, LayerDeclaration};
use crate::oci::OciLayout;
use crate::orchestration::runtime::{BuildRuntime, OutputSink};
use crate::orchestration::userns::{is_root, maybe_in_userns};
use crate::orchestration::{exec, stream_child_output};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Mount point of the layer's imports inside the root filesystem
pub const IMPORTS_MOUNT: &str = "strata";

/// Runs inside the new mount namespace: bind the imports and the usual
/// pseudo filesystems into the root, then chroot into it.
const ENTER_ROOT_SCRIPT: &str = r#"set -e
root="$1"
imports="$2"
shift 2
mount --bind "$imports" "$root/strata"
if [ -d "$root/proc" ]; then mount -t proc proc "$root/proc"; fi
if [ -d "$root/dev" ]; then mount --rbind /dev "$root/dev"; fi
if [ -f "$root/etc/resolv.conf" ] && [ -f /etc/resolv.conf ]; then
    mount --bind /etc/resolv.conf "$root/etc/resolv.conf"
fi
exec chroot "$root" "$@"
"#;

/// Build runtime using host tools directly
pub struct NativeRuntime;

impl NativeRuntime {
    /// Create a new native runtime
    pub fn new() -> Self {
        Self
    }

    /// `<layout>:<tag>` image argument understood by umoci and skopeo's oci transport
    fn image_arg(ctx: &BuildContext, name: &str) -> String {
        format!("{}:{}", ctx.oci_dir.display(), name)
    }

    async fn unpack(&self, ctx: &BuildContext, name: &str, bundle: &Path) -> StrataResult<()> {
        let mut args = vec!["unpack".to_string()];
        if !is_root() {
            args.push("--rootless".to_string());
        }
        args.push("--image".to_string());
        args.push(Self::image_arg(ctx, name));
        args.push(bundle.display().to_string());

        exec("unpacking base image", "umoci", &args).await?;
        Ok(())
    }

    /// Environment the layer commands see
    fn run_env(ctx: &BuildContext, decl: &LayerDeclaration) -> BTreeMap<String, String> {
        let mut env = decl.environment.clone();
        env.entry("PATH".to_string())
            .or_insert_with(|| ctx.default_path.clone());
        env.entry("HOME".to_string())
            .or_insert_with(|| "/root".to_string());
        env
    }

    /// `unshare` arguments that enter `rootfs` and exec `command` there
    fn enter_args(rootfs: &Path, imports: &Path, command: &[&str]) -> Vec<String> {
        let mut args = Vec::new();
        if !is_root() {
            args.push("--user".to_string());
            args.push("--map-root-user".to_string());
        }
        args.extend(
            ["--mount", "--pid", "--fork", "--", "/bin/sh", "-c", ENTER_ROOT_SCRIPT, "strata-enter"]
                .map(String::from),
        );
        args.push(rootfs.display().to_string());
        args.push(imports.display().to_string());
        args.extend(command.iter().map(|s| s.to_string()));
        args
    }

    async fn run_script(
        &self,
        ctx: &BuildContext,
        decl: &LayerDeclaration,
        rootfs: &Path,
        imports: &Path,
        on_output: &OutputSink<'_>,
    ) -> StrataResult<()> {
        let script = format!("{}\n", decl.run.join("\n"));
        let args = Self::enter_args(rootfs, imports, &["/bin/sh", "-xe"]);
        debug!("Running {} command(s) for {}", decl.run.len(), decl.name);

        let mut child = Command::new("unshare")
            .args(&args)
            .env_clear()
            .envs(Self::run_env(ctx, decl))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| StrataError::command_failed("unshare --mount --pid --fork", e))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(script.as_bytes())
                .await
                .map_err(|e| StrataError::io("writing build script", e))?;
        }

        let output = stream_child_output(&mut child, on_output).await;
        let status = child
            .wait()
            .await
            .map_err(|e| StrataError::io("waiting for build commands", e))?;

        if status.success() {
            Ok(())
        } else {
            Err(StrataError::subprocess(
                "running layer commands",
                decl.run.join(" && "),
                status.code(),
                output,
            ))
        }
    }

    /// Run the failure hook attached to the terminal
    async fn run_failure_hook(
        &self,
        ctx: &BuildContext,
        decl: &LayerDeclaration,
        rootfs: &Path,
        imports: &Path,
        command: &str,
    ) -> StrataResult<()> {
        info!("Running failure command in {}: {}", decl.name, command);
        let args = Self::enter_args(rootfs, imports, &["/bin/sh", "-c", command]);

        let status = Command::new("unshare")
            .args(&args)
            .env_clear()
            .envs(Self::run_env(ctx, decl))
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| StrataError::command_failed("unshare --mount --pid --fork", e))?;

        if !status.success() {
            warn!("Failure command exited with {:?}", status.code());
        }
        Ok(())
    }
}

/// Await `script`; when it fails and a failure command is set, run `hook`
/// with that command before handing back the script's error
/// Remove a mountpoint the run created; a leftover is logged, not fatal
async fn remove_mountpoint(mountpoint: &Path) -> bool {
    match tokio::fs::remove_dir(mountpoint).await {
        Ok(()) => true,
        Err(e) => {
            warn!(
                "Could not remove {}, it stays in the layer: {}",
                mountpoint.display(),
                e
            );
            false
        }
    }
}

async fn run_with_failure_hook<S, H, F>(
    script: S,
    on_failure: Option<&str>,
    hook: H,
) -> StrataResult<()>
where
    S: Future<Output = StrataResult<()>>,
    H: FnOnce(String) -> F,
    F: Future<Output = StrataResult<()>>,
{
    let result = script.await;
    if result.is_err() {
        if let Some(command) = on_failure {
            if let Err(e) = hook(command.to_string()).await {
                warn!("Failure command could not run: {}", e);
            }
        }
    }
    result
}

impl Default for NativeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BuildRuntime for NativeRuntime {
    async fn acquire_base(
        &self,
        ctx: &BuildContext,
        name: &str,
        base: &LayerBase,
        bundle: &Path,
    ) -> StrataResult<()> {
        let layout = OciLayout::open_or_create(&ctx.oci_dir)?;

        match base {
            LayerBase::Scratch => {
                layout.remove_reference(name)?;
                let args = vec!["new".to_string(), "--image".to_string(), Self::image_arg(ctx, name)];
                exec("creating empty image", "umoci", &args).await?;
            }
            LayerBase::Image(image) => {
                info!("Fetching base image {}", image.url);
                let args = vec![
                    "copy".to_string(),
                    image.skopeo_source(),
                    format!("oci:{}", Self::image_arg(ctx, name)),
                ];
                exec("fetching base image", "skopeo", &args).await?;
            }
            LayerBase::Built(tag) => {
                return Err(StrataError::Internal(format!(
                    "layer {} is restored from the {} snapshot, not acquired",
                    name, tag
                )));
            }
        }

        self.unpack(ctx, name, bundle).await
    }

    async fn run(
        &self,
        ctx: &BuildContext,
        decl: &LayerDeclaration,
        bundle: &Path,
        on_failure: Option<&str>,
        on_output: &OutputSink<'_>,
    ) -> StrataResult<()> {
        if decl.run.is_empty() {
            return Ok(());
        }

        let rootfs = bundle.join("rootfs");
        let imports = ctx.imports_dir(&decl.name);
        tokio::fs::create_dir_all(&imports)
            .await
            .map_err(|e| StrataError::io(format!("creating {}", imports.display()), e))?;

        let mountpoint = rootfs.join(IMPORTS_MOUNT);
        let created_mountpoint = !mountpoint.exists();
        if created_mountpoint {
            tokio::fs::create_dir_all(&mountpoint)
                .await
                .map_err(|e| StrataError::io(format!("creating {}", mountpoint.display()), e))?;
        }

        let (root, imported) = (rootfs.as_path(), imports.as_path());
        let result = run_with_failure_hook(
            self.run_script(ctx, decl, root, imported, on_output),
            on_failure,
            |command| async move {
                self.run_failure_hook(ctx, decl, root, imported, &command)
                    .await
            },
        )
        .await;

        if created_mountpoint {
            remove_mountpoint(&mountpoint).await;
        }

        result
    }

    async fn repack(&self, ctx: &BuildContext, name: &str, bundle: &Path) -> StrataResult<()> {
        let args = vec![
            "repack".to_string(),
            "--refresh-bundle".to_string(),
            "--image".to_string(),
            Self::image_arg(ctx, name),
            bundle.display().to_string(),
        ];
        let (program, args) = maybe_in_userns("umoci", args);
        exec("layer generation failed", &program, &args).await?;
        Ok(())
    }

    fn runtime_name(&self) -> &'static str {
        "Native (umoci + unshare)"
    }
}
