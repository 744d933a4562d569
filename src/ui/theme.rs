//! cliclack theme

use cliclack::ThemeState;
use console::Style;

/// Cyan bars while active, green once submitted
#[derive(Debug, Clone, Default)]
pub struct StrataTheme;

impl cliclack::Theme for StrataTheme {
    fn bar_color(&self, state: &ThemeState) -> Style {
        match state {
            ThemeState::Active => Style::new().cyan(),
            ThemeState::Error(_) => Style::new().red(),
            ThemeState::Cancel => Style::new().dim(),
            ThemeState::Submit => Style::new().cyan().dim(),
        }
    }

    fn state_symbol_color(&self, state: &ThemeState) -> Style {
        match state {
            ThemeState::Active | ThemeState::Submit => Style::new().green(),
            ThemeState::Error(_) => Style::new().red(),
            ThemeState::Cancel => Style::new().dim(),
        }
    }
}

pub fn init_theme() {
    cliclack::set_theme(StrataTheme);
}
