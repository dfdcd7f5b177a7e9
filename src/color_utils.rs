//! Color and styling utilities with support for NO_COLOR and TERM environment variables.
//!
//! Colored output is gated on:
//! - the `--no-color` CLI flag
//! - the `NO_COLOR` environment variable (https://no-color.org/)
//! - the `PIPIT_NO_COLOR` environment variable (application-specific)
//! - `TERM=dumb`
//! - TTY detection for stderr (log messages go to stderr)

use colored::ColoredString;
use std::io::{stderr, IsTerminal};
use std::sync::OnceLock;

static COLOR_CONFIG: OnceLock<ColorConfig> = OnceLock::new();

fn should_disable_colors_from_env() -> bool {
    !std::env::var("NO_COLOR").unwrap_or_default().is_empty()
        || !std::env::var("PIPIT_NO_COLOR").unwrap_or_default().is_empty()
        || std::env::var("TERM").unwrap_or_default() == "dumb"
        || !stderr().is_terminal()
}

#[derive(Debug, Clone)]
struct ColorConfig {
    colors_enabled: bool,
}

/// Initialize the color configuration with the CLI flag state.
/// Call once at application startup after parsing CLI arguments.
pub fn init_color_config(no_color_flag: bool) {
    let config = ColorConfig {
        colors_enabled: !no_color_flag && !should_disable_colors_from_env(),
    };
    COLOR_CONFIG.set(config).unwrap_or_else(|_| {
        eprintln!("Warning: Color configuration already initialized");
    });
}

fn colors_enabled() -> bool {
    COLOR_CONFIG
        .get()
        .map(|config| config.colors_enabled)
        .unwrap_or_else(|| !should_disable_colors_from_env())
}

/// Apply color to a string only if colors are enabled for stderr output
pub fn maybe_color_stderr<F>(text: &str, color_fn: F) -> String
where
    F: FnOnce(&str) -> ColoredString,
{
    if colors_enabled() {
        color_fn(text).to_string()
    } else {
        text.to_string()
    }
}

/// Semantic color functions for different message types
pub mod colors {
    use super::maybe_color_stderr;
    use colored::Colorize;

    pub fn error_level(text: &str) -> String {
        maybe_color_stderr(text, |s| s.red().bold())
    }

    pub fn warning_level(text: &str) -> String {
        maybe_color_stderr(text, |s| s.yellow())
    }

    pub fn info_level(text: &str) -> String {
        maybe_color_stderr(text, |s| s.green())
    }
}

/// Semantic symbols for different operation types and states
pub mod symbols {
    use super::colors_enabled;

    pub fn checking() -> &'static str {
        if colors_enabled() {
            "🔍"
        } else {
            ""
        }
    }

    pub fn completed_successfully() -> &'static str {
        if colors_enabled() {
            "✅"
        } else {
            "[OK]"
        }
    }

    pub fn operation_failed() -> &'static str {
        if colors_enabled() {
            "❌"
        } else {
            "[FAILED]"
        }
    }

    pub fn warning() -> &'static str {
        if colors_enabled() {
            "⚠️  "
        } else {
            "[WARN] "
        }
    }

    pub fn downloading() -> &'static str {
        if colors_enabled() {
            "📥"
        } else {
            "[FETCH]"
        }
    }

    pub fn uploading() -> &'static str {
        if colors_enabled() {
            "📤"
        } else {
            "[UPLOAD]"
        }
    }

    pub fn save_file() -> &'static str {
        if colors_enabled() {
            "💾"
        } else {
            "[SAVE]"
        }
    }
}
