//! # Output Configuration
//!
//! Color and symbol handling for CLI output. Colors follow the `--color`
//! flag first, then the environment:
//!
//! - `NO_COLOR` disables colors when set (https://no-color.org/)
//! - `CLICOLOR=0` disables colors
//! - `CLICOLOR_FORCE=1` forces colors even when stdout is not a TTY
//! - `TERM=dumb` disables colors
//!
//! ```rust,ignore
//! use vmr_flow::output::{OutputConfig, Marker};
//!
//! let out = OutputConfig::from_env_and_flag("auto");
//! println!("{}", out.line(Marker::Success, "runtime synchronized"));
//! ```

use console::style;
use std::env;

#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// Whether colors and symbols should be used.
    pub use_color: bool,
}

/// Kind of a status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Success,
    Info,
    Warning,
    Conflict,
}

impl OutputConfig {
    /// `color_flag` is the value of `--color`: "always", "never" or "auto".
    pub fn from_env_and_flag(color_flag: &str) -> Self {
        let use_color = match color_flag.to_lowercase().as_str() {
            "always" => true,
            "never" => false,
            _ => Self::detect_color_support(),
        };
        Self { use_color }
    }

    fn detect_color_support() -> bool {
        // Presence alone disables colors, even when empty.
        if env::var_os("NO_COLOR").is_some() {
            return false;
        }
        if env::var("CLICOLOR").is_ok_and(|v| v == "0") {
            return false;
        }
        if env::var("CLICOLOR_FORCE").is_ok_and(|v| v != "0" && !v.is_empty()) {
            return true;
        }
        if env::var("TERM").is_ok_and(|v| v == "dumb") {
            return false;
        }
        console::Term::stdout().features().colors_supported()
    }

    #[cfg(test)]
    pub fn with_color() -> Self {
        Self { use_color: true }
    }

    #[cfg(test)]
    pub fn without_color() -> Self {
        Self { use_color: false }
    }

    /// A status line prefixed by a symbol, or a bracketed tag without colors.
    pub fn line(&self, marker: Marker, text: &str) -> String {
        if !self.use_color {
            let tag = match marker {
                Marker::Success => "[OK]",
                Marker::Info => "[INFO]",
                Marker::Warning => "[WARN]",
                Marker::Conflict => "[CONFLICT]",
            };
            return format!("{} {}", tag, text);
        }
        let symbol = match marker {
            Marker::Success => style("✔").green(),
            Marker::Info => style("•").cyan(),
            Marker::Warning => style("!").yellow(),
            Marker::Conflict => style("✘").red(),
        };
        format!("{} {}", symbol.force_styling(true), text)
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self::from_env_and_flag("auto")
    }
}

/// `emoji` with colors enabled, `plain` otherwise.
pub fn emoji<'a>(config: &OutputConfig, emoji_str: &'a str, plain: &'a str) -> &'a str {
    if config.use_color {
        emoji_str
    } else {
        plain
    }
}
