//! Process runner.
//!
//! Spawns commands with a minimal, reproducible environment: the parent
//! environment is cleared and only the variables the Rust toolchain and
//! native build scripts need to locate their tools are passed through.

use std::future::Future;

use tokio::process::Command;
use tracing::debug;

use crate::consts::SOURCE_DATE_EPOCH;

use super::types::{CmdOutput, ExecuteError, Invocation};

/// Variables copied from the parent environment into every command.
///
/// Without these cargo and rustup cannot find the toolchain or registry, and
/// `-sys` build scripts cannot find the C toolchain or system libraries.
/// An invocation's own environment overrides them.
pub const PASSTHROUGH_ENV: &[&str] = &[
  "PATH",
  "HOME",
  "USER",
  "TMPDIR",
  "CARGO_HOME",
  "RUSTUP_HOME",
  "RUSTUP_TOOLCHAIN",
  "RUSTC_WRAPPER",
  "SSL_CERT_FILE",
  "PKG_CONFIG_PATH",
  "PKG_CONFIG_SYSROOT_DIR",
  "CC",
  "CXX",
  "AR",
  "CPATH",
  "LIBRARY_PATH",
  "LD_LIBRARY_PATH",
  "SDKROOT",
  "MACOSX_DEPLOYMENT_TARGET",
];

/// Seam between the pipeline and the processes it spawns.
///
/// Every step runs its commands through a `Runner`, so tests can substitute a
/// recording double for the real toolchain.
pub trait Runner: Send + Sync + 'static {
  fn run(&self, invocation: &Invocation) -> impl Future<Output = Result<CmdOutput, ExecuteError>> + Send;
}

/// Runs invocations as real child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
  pub fn new() -> Self {
    Self
  }
}

impl Runner for ProcessRunner {
  async fn run(&self, invocation: &Invocation) -> Result<CmdOutput, ExecuteError> {
    let mut command = Command::new(&invocation.program);
    command
      .args(&invocation.args)
      .current_dir(&invocation.cwd)
      .env_clear()
      .env("LANG", "C")
      .env("LC_ALL", "C")
      .env("SOURCE_DATE_EPOCH", SOURCE_DATE_EPOCH)
      .env("CARGO_TERM_COLOR", "never")
      .kill_on_drop(true);

    for key in PASSTHROUGH_ENV {
      if let Some(value) = std::env::var_os(key) {
        command.env(key, value);
      }
    }

    for (key, value) in &invocation.env {
      command.env(key, value);
    }

    debug!(cmd = %invocation, cwd = ?invocation.cwd, "spawning process");

    let output = command.output().await.map_err(|source| ExecuteError::Spawn {
      program: invocation.program.clone(),
      source,
    })?;

    let result = CmdOutput {
      code: output.status.code(),
      stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
      stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };

    if !result.success() {
      debug!(cmd = %invocation, code = ?result.code, stderr = %result.stderr, "command exited unsuccessfully");
    }

    Ok(result)
  }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
  use super::*;
  use serial_test::serial;
  use tempfile::TempDir;

  #[tokio::test]
  async fn captures_stdout() {
    let temp = TempDir::new().unwrap();
    let inv = Invocation::new("/bin/sh", temp.path()).args(["-c", "echo hello"]);

    let out = ProcessRunner::new().run(&inv).await.unwrap();

    assert!(out.success());
    assert_eq!(out.stdout, "hello\n");
  }

  #[tokio::test]
  async fn environment_is_reproducible() {
    let temp = TempDir::new().unwrap();
    let inv = Invocation::new("/bin/sh", temp.path())
      .args(["-c", "echo \"$SOURCE_DATE_EPOCH:$LC_ALL:$MY_VAR\""])
      .env("MY_VAR", "set");

    let out = ProcessRunner::new().run(&inv).await.unwrap();

    assert_eq!(out.stdout.trim(), "315532800:C:set");
  }

  fn echo(var: &str, inv_env: Option<&str>) -> String {
    let temp = TempDir::new().unwrap();
    let script = format!("echo \"${var}\"");
    let mut inv = Invocation::new("/bin/sh", temp.path()).args(["-c", script.as_str()]);
    if let Some(value) = inv_env {
      inv = inv.env(var, value);
    }
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(ProcessRunner::new().run(&inv)).unwrap().stdout.trim().to_string()
  }

  #[test]
  #[serial]
  fn native_build_variables_pass_through() {
    temp_env::with_vars(
      [
        ("PKG_CONFIG_PATH", Some("/opt/openssl/lib/pkgconfig")),
        ("CC", Some("clang")),
      ],
      || {
        assert_eq!(echo("PKG_CONFIG_PATH", None), "/opt/openssl/lib/pkgconfig");
        assert_eq!(echo("CC", None), "clang");
      },
    );
  }

  #[test]
  #[serial]
  fn unlisted_variables_are_cleared_and_invocation_env_wins() {
    temp_env::with_vars(
      [
        ("DEPOT_TEST_LEAK", Some("leaked")),
        ("PKG_CONFIG_PATH", Some("/usr/lib/pkgconfig")),
      ],
      || {
        assert_eq!(echo("DEPOT_TEST_LEAK", None), "");
        assert_eq!(echo("PKG_CONFIG_PATH", Some("/opt/openssl/lib/pkgconfig")), "/opt/openssl/lib/pkgconfig");
      },
    );
  }

  #[tokio::test]
  async fn non_zero_exit_is_not_an_error() {
    let temp = TempDir::new().unwrap();
    let inv = Invocation::new("/bin/sh", temp.path()).args(["-c", "echo oops >&2; exit 3"]);

    let out = ProcessRunner::new().run(&inv).await.unwrap();

    assert_eq!(out.code, Some(3));
    assert_eq!(out.stderr, "oops\n");
  }

  #[tokio::test]
  async fn missing_program_is_spawn_error() {
    let temp = TempDir::new().unwrap();
    let inv = Invocation::new("depot-definitely-missing-program", temp.path());

    let err = ProcessRunner::new().run(&inv).await.unwrap_err();

    assert!(matches!(err, ExecuteError::Spawn { .. }));
  }
}
