//! Main entry point for the bulkseal CLI app

use std::process::ExitCode;

use bulkseal::{cli, cli_runner};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let args = cli::run();
    init_logging(args.verbose);

    match cli_runner::run_cli_app(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
