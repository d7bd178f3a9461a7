//! Shared result printing.

use colored::Colorize;
use serde::Serialize;

use crate::OutputFormat;

/// Print `value` as pretty JSON, or as its debug form in text mode.
///
/// Commands normally handle text output themselves and only call this for
/// JSON.
pub fn print<T: Serialize + std::fmt::Debug>(value: &T, format: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("{}: cannot serialize output: {}", "Error".red().bold(), e),
        },
        OutputFormat::Text => println!("{:#?}", value),
    }
}

/// A `label: value` line in the text layout.
pub fn field(label: &str, value: impl std::fmt::Display) {
    println!("  {}: {}", label.cyan(), value);
}

/// Format milliseconds for display.
pub fn format_ms(ms: f64) -> String {
    if ms >= 1000.0 {
        format!("{:.2} s", ms / 1000.0)
    } else {
        format!("{:.1} ms", ms)
    }
}
