//! Command execution.
//!
//! Every external command the pipeline runs goes through this module:
//! - [`Invocation`]: what to run, where, with which extra environment
//! - [`Runner`]: the seam that runs it ([`ProcessRunner`] for real processes)
//! - [`CargoInvocation`] / [`CargoArgs`]: cargo commands with shared arguments

pub mod cargo;
pub mod runner;
pub mod types;

pub use cargo::{CargoArgs, CargoInvocation};
pub use runner::{ProcessRunner, Runner};
pub use types::{CmdOutput, ExecuteError, Invocation};
