//! Build runtimes
//!
//! Everything that executes external tooling on behalf of a build:
//! - acquiring a base image into the working tree (skopeo, umoci)
//! - running layer commands inside the tree (unshare + chroot)
//! - repacking the tree into a new OCI layer (umoci)

mod factory;
mod native;
mod runtime;
pub mod userns;

pub use factory::{create_runtime, Platform};
pub use native::NativeRuntime;
pub use runtime::{BuildRuntime, OutputSink};

use crate::error::{StrataError, StrataResult};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

/// Max number of output lines to include in build error messages.
const BUILD_ERROR_TAIL_LINES: usize = 50;

/// Extract the useful tail of build output for error diagnostics.
pub(crate) fn build_error_output(stdout: &str, stderr: &str) -> String {
    let lines: Vec<&str> = stdout.lines().chain(stderr.lines()).collect();
    tail_lines(&lines)
}

fn tail_lines<S: AsRef<str>>(lines: &[S]) -> String {
    let start = lines.len().saturating_sub(BUILD_ERROR_TAIL_LINES);
    lines[start..]
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Run a program to completion, failing on non-zero exit.
///
/// `what` names the step for the error message; stdout is returned.
pub(crate) async fn exec(what: &str, program: &str, args: &[String]) -> StrataResult<String> {
    let command_line = format!("{} {}", program, args.join(" "));
    debug!("Executing: {}", command_line);

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| StrataError::command_failed(&command_line, e))?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    if output.status.success() {
        Ok(stdout)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(StrataError::subprocess(
            what,
            command_line,
            output.status.code(),
            build_error_output(&stdout, &stderr),
        ))
    }
}

/// Stream stdout+stderr from a child process, calling `on_output` for each line.
///
/// Returns the tail of the collected output for error reporting. This is a
/// standalone async function (not behind `async_trait`) to avoid lifetime
/// issues with the `dyn Fn` callback.
pub(crate) async fn stream_child_output(
    child: &mut tokio::process::Child,
    on_output: &OutputSink<'_>,
) -> String {
    let mut all_output = Vec::new();

    let mut stderr_reader = child.stderr.take().map(|s| BufReader::new(s).lines());
    let mut stdout_reader = child.stdout.take().map(|s| BufReader::new(s).lines());
    let mut stderr_done = stderr_reader.is_none();
    let mut stdout_done = stdout_reader.is_none();

    while !stderr_done || !stdout_done {
        tokio::select! {
            line = next_line(&mut stderr_reader), if !stderr_done => {
                match line {
                    Some(line) => {
                        on_output(line.clone());
                        all_output.push(line);
                    }
                    None => stderr_done = true,
                }
            }
            line = next_line(&mut stdout_reader), if !stdout_done => {
                match line {
                    Some(line) => {
                        on_output(line.clone());
                        all_output.push(line);
                    }
                    None => stdout_done = true,
                }
            }
        }
    }

    tail_lines(&all_output)
}

async fn next_line<R>(reader: &mut Option<tokio::io::Lines<BufReader<R>>>) -> Option<String>
where
    R: tokio::io::AsyncRead + Unpin,
{
    match reader {
        Some(lines) => lines.next_line().await.ok().flatten(),
        None => None,
    }
}
