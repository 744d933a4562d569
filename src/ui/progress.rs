//! Progress indicators with CI fallback

use super::context::UiContext;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Longest command-output line shown next to the layer bar
const MESSAGE_WIDTH: usize = 60;

/// A task spinner with CI fallback
pub struct TaskSpinner {
    spinner: Option<cliclack::ProgressBar>,
    interactive: bool,
}

impl TaskSpinner {
    pub fn new(ctx: &UiContext) -> Self {
        Self {
            spinner: None,
            interactive: ctx.use_fancy_output(),
        }
    }

    pub fn start(&mut self, message: &str) {
        if self.interactive {
            let spinner = cliclack::spinner();
            spinner.start(message);
            self.spinner = Some(spinner);
        } else {
            println!("{} {}", style("...").dim(), message);
        }
    }

    pub fn stop(&mut self, message: &str) {
        match self.spinner.take() {
            Some(spinner) => spinner.stop(message),
            None => println!("{} {}", style("[OK]").green(), message),
        }
    }

    pub fn stop_error(&mut self, message: &str) {
        match self.spinner.take() {
            Some(spinner) => spinner.error(message),
            None => println!("{} {}", style("[FAIL]").red(), message),
        }
    }
}

/// Progress over the layers of a build.
///
/// On a terminal this is an indicatif bar (one tick per layer) whose
/// message follows the running command's output. In CI every line is
/// printed as is.
pub struct LayerProgress {
    bar: Option<ProgressBar>,
}

impl LayerProgress {
    pub fn new(ctx: &UiContext, total: usize) -> Self {
        let bar = ctx.use_fancy_output().then(|| {
            let bar = ProgressBar::new(total as u64);
            let style = ProgressStyle::with_template(
                "  {spinner:.cyan} {prefix:.bold}  {bar:20.cyan/dim} {pos}/{len} {msg:.dim}  {elapsed:.dim}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
            .progress_chars("━╸─");
            bar.set_style(style);
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        });
        Self { bar }
    }

    pub fn layer_started(&self, layer: &str, index: usize, total: usize) {
        match &self.bar {
            Some(bar) => {
                bar.set_prefix(layer.to_string());
                bar.set_message("");
            }
            None => println!("[{}/{}] {}", index + 1, total, layer),
        }
    }

    /// A line of output from the layer's commands
    pub fn output(&self, line: &str) {
        let trimmed = line.trim_end();
        match &self.bar {
            Some(bar) if !trimmed.trim().is_empty() => bar.set_message(truncate(trimmed.trim())),
            Some(_) => {}
            None => println!("    {}", trimmed),
        }
    }

    /// Status change within the current layer
    pub fn note(&self, message: &str) {
        match &self.bar {
            Some(bar) => bar.set_message(message.to_string()),
            None => println!("  {} {}", style("-").dim(), message),
        }
    }

    pub fn layer_done(&self, layer: &str, detail: &str) {
        match &self.bar {
            Some(bar) => {
                bar.println(format!(
                    "  {} {} {}",
                    style("✓").green(),
                    layer,
                    style(format!("({})", detail)).dim()
                ));
                bar.inc(1);
            }
            None => println!("  {} {} ({})", style("[OK]").green(), layer, detail),
        }
    }

    pub fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.disable_steady_tick();
            bar.finish_and_clear();
        }
    }
}

fn truncate(line: &str) -> String {
    if line.chars().count() <= MESSAGE_WIDTH {
        return line.to_string();
    }
    let head: String = line.chars().take(MESSAGE_WIDTH - 3).collect();
    format!("{}...", head)
}
