//! Terminal output helpers shared by the commands.

use std::time::Duration;

use anyhow::Result;
use console::{style, Emoji};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;

pub static CHECK: Emoji<'_, '_> = Emoji("✔ ", "[ok] ");
pub static CROSS: Emoji<'_, '_> = Emoji("✘ ", "[!!] ");
pub static WARN_ICON: Emoji<'_, '_> = Emoji("⚠ ", "[??] ");

/// Pretty JSON on stdout.
pub fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Section header on stderr.
pub fn header(title: &str) {
    eprintln!();
    eprintln!("{}", style(title).bold().cyan());
    eprintln!("{}", style("─".repeat(40)).dim());
}

pub fn pass(msg: &str) {
    eprintln!("  {} {}", CHECK, style(msg).green());
}

pub fn fail(msg: &str) {
    eprintln!("  {} {}", CROSS, style(msg).red());
}

pub fn warn(msg: &str) {
    eprintln!("  {} {}", WARN_ICON, style(msg).yellow());
}

/// Bar over `len` items. Hidden when stderr is not a terminal or when JSON
/// output was requested.
pub fn progress(len: u64, json: bool) -> ProgressBar {
    if json || !console::user_attended_stderr() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len);
    if let Ok(bar_style) = ProgressStyle::default_bar().template("{spinner:.cyan} [{bar:30.cyan/dim}] {pos}/{len} {msg}") {
        pb.set_style(bar_style.progress_chars("=> "));
    }
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Format number with comma separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
    }

    #[test]
    fn test_progress_hidden_for_json() {
        assert!(progress(10, true).is_hidden());
    }
}
