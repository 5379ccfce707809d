use std::error::Error as _;

use clap::Parser;

mod app;
mod commands;
mod error;
mod logging;

use commands::cli;

#[tokio::main]
async fn main() {
    let args = cli::Args::parse();

    let code = match app::run_app(args).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(target: "pkgpilot.cli", error = %e, "command failed");
            eprintln!("error: {e}");
            let mut source = e.source();
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }
            e.exit_code()
        }
    };
    std::process::exit(code);
}
