// src/utils/log.rs

//! Console report helpers for run summaries.
//!
//! Diagnostics go through the `log` facade; these helpers print the
//! human-facing banners and summaries of each pipeline run.

use std::sync::OnceLock;

use chrono::Local;

/// Console verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "debug" | "trace" => LogLevel::Debug,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

static LOG_LEVEL: OnceLock<LogLevel> = OnceLock::new();

/// Set the console level once; later calls are ignored.
pub fn init(level: &str) {
    let _ = LOG_LEVEL.set(LogLevel::parse(level));
}

fn should_log(level: LogLevel) -> bool {
    level >= LOG_LEVEL.get().copied().unwrap_or(LogLevel::Info)
}

fn format_line(level: LogLevel, message: &str) -> String {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    format!("[{}] [{}] {}", timestamp, level.as_str(), message)
}

pub fn warn(message: &str) {
    if should_log(LogLevel::Warn) {
        eprintln!("{}", format_line(LogLevel::Warn, message));
    }
}

pub fn error(message: &str) {
    if should_log(LogLevel::Error) {
        eprintln!("{}", format_line(LogLevel::Error, message));
    }
}

/// Always shown.
pub fn success(message: &str) {
    println!("{}", format_line(LogLevel::Info, message));
}

pub fn step(step_num: usize, total: usize, message: &str) {
    if should_log(LogLevel::Info) {
        let msg = format!("[STEP {}/{}] {}", step_num, total, message);
        println!("{}", format_line(LogLevel::Info, &msg));
    }
}

pub fn header(title: &str) {
    if should_log(LogLevel::Info) {
        let border = "═".repeat(60);
        println!("{}", format_line(LogLevel::Info, &border));
        println!("{}", format_line(LogLevel::Info, &format!("  {}", title)));
        println!("{}", format_line(LogLevel::Info, &border));
    }
}

/// Indented detail line
pub fn sub_item(message: &str) {
    if should_log(LogLevel::Info) {
        println!("{}", format_line(LogLevel::Info, &format!("    {}", message)));
    }
}

pub fn summary(title: &str, items: &[(&str, String)]) {
    if should_log(LogLevel::Info) {
        println!();
        println!(
            "{}",
            format_line(LogLevel::Info, &format!("[SUMMARY] {}", title))
        );
        for (key, value) in items {
            let line = format!("    {}: {}", key, value);
            println!("{}", format_line(LogLevel::Info, &line));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!(LogLevel::parse("debug"), LogLevel::Debug);
        assert_eq!(LogLevel::parse("WARNING"), LogLevel::Warn);
        assert_eq!(LogLevel::parse("unknown"), LogLevel::Info);
    }

    #[test]
    fn test_format_line_carries_level() {
        let line = format_line(LogLevel::Warn, "slow host");
        assert!(line.ends_with("[WARN] slow host"));
    }
}
