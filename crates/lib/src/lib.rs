//! depot-lib: dependency-cached build and release pipeline for Cargo packages
//!
//! The pipeline builds a package's external dependencies once and reuses
//! that layer across:
//! - `check`: tests, lint, documentation lint, formatting and security audit
//! - `package`: the release executables
//! - `docs` + `archive`: a versioned documentation archive
//!
//! Every artifact is content-addressed in the [`store`], and the steps are
//! scheduled as a DAG by [`pipeline`].

pub mod archive;
pub mod check;
pub mod config;
pub mod consts;
pub mod deps;
pub mod devenv;
pub mod docs;
pub mod execute;
pub mod matrix;
pub mod package;
pub mod pipeline;
pub mod platform;
pub mod settings;
pub mod source;
pub mod store;
pub mod util;
pub mod version;
