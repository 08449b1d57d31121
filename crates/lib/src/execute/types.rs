//! Types for command execution.
//!
//! This module defines the invocation description handed to a [`Runner`],
//! the captured output it returns, and the error type for failures to run.
//!
//! [`Runner`]: super::Runner

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum ExecuteError {
  /// The program could not be started at all.
  #[error("failed to spawn {program}: {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },

  /// Command exited unsuccessfully where success was required.
  #[error("command failed with exit code {code:?}: {cmd}\n{diagnostics}")]
  CmdFailed {
    cmd: String,
    code: Option<i32>,
    diagnostics: String,
  },

  /// I/O error while preparing the command.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// A fully composed command: program, arguments, extra environment and
/// working directory.
///
/// The environment here is layered on top of the runner's base environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
  pub program: String,
  pub args: Vec<String>,
  pub env: BTreeMap<String, String>,
  pub cwd: PathBuf,
}

impl Invocation {
  pub fn new(program: &str, cwd: impl Into<PathBuf>) -> Self {
    Self {
      program: program.to_string(),
      args: Vec::new(),
      env: BTreeMap::new(),
      cwd: cwd.into(),
    }
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(arg.into());
    self
  }

  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }

  pub fn env(mut self, key: &str, value: impl Into<String>) -> Self {
    self.env.insert(key.to_string(), value.into());
    self
  }

  /// The command line as a single string, for logs and diagnostics.
  pub fn command_line(&self) -> String {
    let mut line = self.program.clone();
    for arg in &self.args {
      line.push(' ');
      if arg.contains(char::is_whitespace) {
        line.push_str(&format!("{:?}", arg));
      } else {
        line.push_str(arg);
      }
    }
    line
  }
}

impl fmt::Display for Invocation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.command_line())
  }
}

/// Output captured from a finished command, decoded as UTF-8 (lossily).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CmdOutput {
  pub code: Option<i32>,
  pub stdout: String,
  pub stderr: String,
}

impl CmdOutput {
  pub fn success(&self) -> bool {
    self.code == Some(0)
  }

  /// Combined stdout and stderr, for reporting.
  pub fn diagnostics(&self) -> String {
    match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
      (true, true) => String::new(),
      (false, true) => self.stdout.clone(),
      (true, false) => self.stderr.clone(),
      (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
    }
  }

  /// Turn a non-zero exit into [`ExecuteError::CmdFailed`].
  pub fn require_success(self, invocation: &Invocation) -> Result<Self, ExecuteError> {
    if self.success() {
      return Ok(self);
    }
    Err(ExecuteError::CmdFailed {
      cmd: invocation.command_line(),
      code: self.code,
      diagnostics: self.diagnostics(),
    })
  }
}
