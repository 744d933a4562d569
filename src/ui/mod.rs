//! Terminal output
//!
//! `cliclack` and `indicatif` when a person is watching, plain tagged
//! lines when output is piped or running in CI.
//!
//! ```rust,ignore
//! use strata::ui::{self, UiContext};
//!
//! let ctx = UiContext::detect();
//! ui::intro(&ctx, "strata build");
//! ui::step_ok_detail(&ctx, "base", "cached");
//! ui::outro_success(&ctx, "2 layers built");
//! ```

mod context;
mod output;
mod progress;
mod prompts;
mod theme;

pub use context::UiContext;
pub use output::{
    intro, key_value, key_value_status, outro_success, outro_warn, remark, section,
    step_error_detail, step_info, step_ok, step_ok_detail, step_warn_hint,
};
pub use progress::{LayerProgress, TaskSpinner};
pub use prompts::confirm;
pub use theme::{init_theme, StrataTheme};
