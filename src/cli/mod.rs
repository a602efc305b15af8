//! Command-line interface
//!
//! JSON responses on stdout, JSON errors on stderr, structured logs on stderr.

pub mod args;
pub mod commands;
pub mod errors;
pub mod io;
pub mod signal;

pub use args::{Cli, Command};
pub use commands::{run, run_command, run_command_with};
pub use errors::{CliError, CliErrorCode, CliResult};
