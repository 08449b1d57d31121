//! The `depot` command.
//!
//! A thin surface over `depot-lib`: every subcommand loads the package at
//! `--root`, runs part of the pipeline and reports the outcome.

mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use depot_lib::check::CheckKind;

use crate::cmd::PlatformArgs;
use crate::output::{OutputFormat, Status, print_status};

#[derive(Parser)]
#[command(name = "depot", version, about = "Reproducible build, check and docs pipeline for a Rust package")]
struct Cli {
  /// Package root (the directory holding Cargo.toml)
  #[arg(long, global = true, default_value = ".")]
  root: PathBuf,

  /// Enable debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Output format
  #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build the package's executables
  Build {
    #[command(flatten)]
    platforms: PlatformArgs,
  },

  /// Run checks and report pass/fail per check
  Check {
    /// Run only this check (repeatable): test, clippy, doc-lint, fmt, audit
    #[arg(long = "only", value_name = "CHECK")]
    only: Vec<CheckKind>,

    #[command(flatten)]
    platforms: PlatformArgs,
  },

  /// Build the documentation archive
  Docs {
    /// Directory the archive is written to [default: <root>/dist]
    #[arg(long, value_name = "DIR")]
    out_dir: Option<PathBuf>,

    #[command(flatten)]
    platforms: PlatformArgs,
  },

  /// Enter the development environment
  Shell {
    /// Print the environment as shell exports instead of entering it
    #[arg(long)]
    print: bool,

    /// Shell to run [default: $SHELL]
    #[arg(long, value_name = "PATH")]
    shell: Option<PathBuf>,
  },

  /// Print the package version from its manifest
  Version,

  /// Show host platform, store and check information
  Info,
}

fn main() -> ExitCode {
  let cli = match Cli::try_parse() {
    Ok(cli) => cli,
    Err(e) => {
      let _ = e.print();
      return if e.use_stderr() {
        ExitCode::FAILURE
      } else {
        ExitCode::SUCCESS
      };
    }
  };

  let default_level = if cli.verbose { "debug" } else { "warn" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let root = cli.root;
  let output = cli.output;

  let result = match cli.command {
    Commands::Build { platforms } => cmd::cmd_build(&root, &platforms, output),
    Commands::Check { only, platforms } => cmd::cmd_check(&root, &only, &platforms, output),
    Commands::Docs { out_dir, platforms } => cmd::cmd_docs(&root, out_dir, &platforms, output),
    Commands::Shell { print, shell } => cmd::cmd_shell(&root, print, shell.as_deref(), output),
    Commands::Version => cmd::cmd_version(&root, output),
    Commands::Info => cmd::cmd_info(&root, output),
  };

  match result {
    Ok(code) => code,
    Err(e) => {
      print_status(Status::Failed, &format!("{:#}", e));
      ExitCode::FAILURE
    }
  }
}
