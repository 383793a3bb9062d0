//! CLI module for qindex
//!
//! - explain: compile a request against a schema file
//! - query: run a request against a JSON fixture held in memory

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{explain, query, run_command, Fixture};
pub use errors::{CliError, CliResult};
pub use io::{read_request, write_error, write_response};
