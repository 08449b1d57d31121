//! Terminal and JSON reporting for `depot`.
//!
//! Text output is one status line per outcome, with a symbol colored by
//! [`Status`]. Failures and warnings go to stderr; results go to stdout so
//! they can be piped.

use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

use depot_lib::check::CheckResult;
use depot_lib::platform::PlatformKey;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

/// Outcome a status line reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
  Passed,
  Failed,
  Warning,
  Note,
}

impl Status {
  pub fn symbol(self) -> &'static str {
    match self {
      Status::Passed => "✓",
      Status::Failed => "✗",
      Status::Warning => "⚠",
      Status::Note => "•",
    }
  }

  fn stream(self) -> Stream {
    match self {
      Status::Failed | Status::Warning => Stream::Stderr,
      Status::Passed | Status::Note => Stream::Stdout,
    }
  }

  fn paint(self, text: &str) -> String {
    let stream = self.stream();
    match self {
      Status::Passed => text.if_supports_color(stream, |s| s.green()).to_string(),
      Status::Failed => text.if_supports_color(stream, |s| s.red()).to_string(),
      Status::Warning => text.if_supports_color(stream, |s| s.yellow()).to_string(),
      Status::Note => text.if_supports_color(stream, |s| s.blue()).to_string(),
    }
  }
}

/// Print `message` behind the status symbol.
///
/// Failure and warning messages are colored along with their symbol.
pub fn print_status(status: Status, message: &str) {
  let symbol = status.paint(status.symbol());
  match status.stream() {
    Stream::Stderr => eprintln!("{} {}", symbol, status.paint(message)),
    _ => println!("{} {}", symbol, message),
  }
}

/// An indented `label: value` line under a status line.
pub fn print_field(label: &str, value: &str) {
  println!("  {}: {}", label.if_supports_color(Stream::Stdout, |s| s.dimmed()), value);
}

pub fn print_platform_header(platform: PlatformKey) {
  println!("{}:", platform.if_supports_color(Stream::Stdout, |s| s.bold()));
}

/// `clippy`, `fmt (cached)`, `test (exit code 100)` or `audit (did not run)`.
pub fn check_summary(result: &CheckResult) -> String {
  match (result.passed, result.exit_code) {
    (true, _) if result.cached => format!("{} (cached)", result.check),
    (true, _) => result.check.to_string(),
    (false, Some(code)) => format!("{} (exit code {})", result.check, code),
    (false, None) => format!("{} (did not run)", result.check),
  }
}

/// One check's status line; a failed check is followed by its diagnostics.
pub fn print_check(result: &CheckResult) {
  let status = if result.passed { Status::Passed } else { Status::Failed };
  println!("  {} {}", status.paint(status.symbol()), check_summary(result));
  if !result.passed {
    for line in result.diagnostics.lines() {
      println!("      {}", line.if_supports_color(Stream::Stdout, |s| s.dimmed()));
    }
  }
}

/// Wall-clock time of a run: `850ms`, `12.4s` or `3m 07s`.
pub fn format_elapsed(elapsed: Duration) -> String {
  let secs = elapsed.as_secs();
  if secs >= 60 {
    format!("{}m {:02}s", secs / 60, secs % 60)
  } else if secs > 0 {
    format!("{:.1}s", elapsed.as_secs_f64())
  } else {
    format!("{}ms", elapsed.as_millis())
  }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}
