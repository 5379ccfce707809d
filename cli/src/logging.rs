use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use pkgpilot_core::api::LoggingConfig;

use crate::error::CliError;

/// Which side of the process boundary this process is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Controller,
    /// Stdout carries protocol frames, so everything goes to stderr.
    Worker,
}

/// Installs the global subscriber. `RUST_LOG` wins over the configured
/// level. The returned guard must live until exit to flush the log file.
pub fn init(
    cfg: &LoggingConfig,
    level_override: Option<&str>,
    role: Role,
) -> Result<Option<WorkerGuard>, CliError> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(v) if !v.trim().is_empty() => EnvFilter::new(v),
        _ => EnvFilter::try_new(level_override.unwrap_or(&cfg.level))
            .map_err(|e| CliError::Logging(e.to_string()))?,
    };

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_ansi(role == Role::Controller);

    let (file_layer, guard) = match (&cfg.file, role) {
        (Some(file), Role::Controller) => {
            let path = Path::new(file);
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| CliError::Logging(format!("not a file path: {file}")))?;
            std::fs::create_dir_all(dir).map_err(|e| CliError::Logging(e.to_string()))?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| CliError::Logging(e.to_string()))?;
    Ok(guard)
}
