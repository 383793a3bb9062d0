//! qindex CLI entry point
//!
//! Parses arguments, installs logging and dispatches to `cli::run_command`.
//! Failures are reported as a JSON error object and a non-zero exit code.

use qindex::cli::{self, Cli};
use qindex::observability::init_logging;

#[tokio::main]
async fn main() {
    let args = Cli::parse_args();
    init_logging(&args.log);

    if let Err(e) = cli::run_command(args.command, args.config.as_deref()).await {
        if cli::write_error(e.code(), &e.to_string()).is_err() {
            eprintln!("{}", e);
        }
        std::process::exit(1);
    }
}
