//! Main entry point for the zipforge CLI app

use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use zipforge::{cli, cli_runner};

fn main() -> ExitCode {
    let args = cli::run();
    setup_logging(args.verbose);

    match cli_runner::run_cli_app(&args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr; `RUST_LOG` wins over `-v`.
fn setup_logging(verbose: u8) {
    let default = match verbose {
        0 => "zipforge=info,warn",
        1 => "zipforge=debug,warn",
        _ => "zipforge=trace,info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
