use std::path::{Path, PathBuf};

use pkgpilot_core::api::{load, AppConfig, WorkerCommand};
use pkgpilot_core::config::CONFIG_FILE_NAME;

use crate::commands::cli::{Args, Commands};
use crate::commands::{query, run, worker};
use crate::error::CliError;
use crate::logging::{self, Role};

/// Explicit path, else `./pkgpilot.toml` (handled by the loader), else the
/// file in the user config directory when it exists.
pub fn config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if Path::new(CONFIG_FILE_NAME).exists() {
        return None;
    }
    dirs::config_dir()
        .map(|dir| dir.join("pkgpilot").join(CONFIG_FILE_NAME))
        .filter(|path| path.exists())
}

pub async fn run_app(args: Args) -> Result<i32, CliError> {
    let config_path = config_path(args.config.as_deref());
    let cfg = load(config_path.as_deref())?;

    let role = match args.command {
        Commands::Worker(_) => Role::Worker,
        _ => Role::Controller,
    };
    let _guard = logging::init(&cfg.logging, args.log_level.as_deref(), role)?;

    match args.command {
        Commands::Run(run_args) => {
            let command = worker_command(&cfg, config_path.as_deref())?;
            run::run(run_args, cfg, command).await
        }
        Commands::Render(bundle_args) => run::render(bundle_args, &cfg),
        Commands::Query(query_args) => {
            let command = worker_command(&cfg, config_path.as_deref())?;
            query::run(query_args, cfg, command).await
        }
        Commands::Worker(worker_args) => worker::run(worker_args.command, cfg).await,
    }
}

/// Workers load the same configuration file as the controller.
fn worker_command(cfg: &AppConfig, config_path: Option<&Path>) -> Result<WorkerCommand, CliError> {
    let mut command = WorkerCommand::resolve(cfg)?;
    if let Some(path) = config_path {
        command = command.leading_arg("--config").leading_arg(path);
    }
    Ok(command)
}
