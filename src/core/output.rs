//! Compact output rendering helpers for operator-facing progress.
//!
//! Every check is printed the moment it is recorded; nothing is buffered
//! until the end of the run.

use crate::core::session::{CheckResult, CheckStatus, SessionStatus, ValidationSession};
use colored::Colorize;

/// Collapse newlines/extra whitespace and bound length for terminal display.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

/// Render up to `max_items` messages with compact formatting.
pub fn preview_messages(messages: &[String], max_items: usize, max_chars: usize) -> String {
    if messages.is_empty() {
        return String::new();
    }
    let shown = messages
        .iter()
        .take(max_items)
        .map(|m| compact_line(m, max_chars))
        .collect::<Vec<_>>()
        .join(" | ");
    if messages.len() > max_items {
        format!("{} (+{} more)", shown, messages.len() - max_items)
    } else {
        shown
    }
}

pub fn print_stage(title: &str) {
    println!();
    println!("{} {}", "▸".bright_cyan(), title.bright_white().bold());
}

pub fn print_check(result: &CheckResult, verbose: bool) {
    let glyph = match result.status {
        CheckStatus::Pass => "✓".bright_green(),
        CheckStatus::Warn => "⚠".bright_yellow(),
        CheckStatus::Fail => "✗".bright_red(),
        CheckStatus::Info => "ℹ".bright_blue(),
    };
    println!("  {} [{}] {}", glyph, result.name, result.message);
    if let Some(detail) = &result.detail {
        if verbose {
            for line in detail.lines() {
                println!("      {}", line);
            }
        } else {
            println!("      {}", compact_line(detail, 160));
        }
    }
}

pub fn print_banner(session: &ValidationSession) {
    let counts = session.counts();
    let status = session.status();
    let label = match status {
        SessionStatus::Passed => status.as_str().bright_green().bold(),
        SessionStatus::PassedWithWarnings => status.as_str().bright_yellow().bold(),
        SessionStatus::Failed => status.as_str().bright_red().bold(),
        SessionStatus::Cancelled => status.as_str().bright_magenta().bold(),
    };
    println!();
    println!("===================================================================");
    println!("  DESTROY GATE RESULT: {}", label);
    println!("===================================================================");
    println!("  session:  {}", session.id);
    println!("  target:   {}", session.target_label());
    println!(
        "  checks:   pass={} warn={} fail={} info={}",
        counts.pass, counts.warn, counts.fail, counts.info
    );
    let fails: Vec<String> = session
        .checks()
        .iter()
        .filter(|c| c.status == CheckStatus::Fail)
        .map(|c| format!("{}: {}", c.name, c.message))
        .collect();
    if !fails.is_empty() {
        println!("  failures: {}", preview_messages(&fails, 3, 110));
    }
    println!("  exit:     {}", session.exit_code());
    println!("===================================================================");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_line_truncates_and_collapses() {
        assert_eq!(compact_line("a\n  b   c", 10), "a b c");
        assert_eq!(compact_line("abcdefghij", 4), "abcd...");
    }

    #[test]
    fn preview_messages_reports_overflow() {
        let msgs = vec!["one".to_string(), "two".to_string(), "three".to_string()];
        assert_eq!(preview_messages(&msgs, 2, 20), "one | two (+1 more)");
        assert_eq!(preview_messages(&[], 2, 20), "");
    }
}
