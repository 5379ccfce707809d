use std::path::Path;

use super::types::AppConfig;
use crate::error::ConfigError;

pub const CONFIG_FILE_NAME: &str = "pkgpilot.toml";

/// Loads `pkgpilot.toml` from the working directory (defaults when absent)
/// and applies `PKGPILOT_*` environment overrides.
pub fn load_default() -> Result<AppConfig, ConfigError> {
    let path = Path::new(CONFIG_FILE_NAME);
    let cfg = if path.exists() {
        load_from(path)?
    } else {
        AppConfig::default()
    };
    apply_env_overrides(cfg)
}

/// Loads `path` when given, otherwise the default location, with
/// `PKGPILOT_*` overrides applied either way.
pub fn load(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    match path {
        Some(path) => apply_env_overrides(load_from(path)?),
        None => load_default(),
    }
}

pub fn load_from(path: &Path) -> Result<AppConfig, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let cfg = toml::from_str::<AppConfig>(&s).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })?;
    validate(&cfg)?;
    Ok(cfg)
}

fn apply_env_overrides(mut cfg: AppConfig) -> Result<AppConfig, ConfigError> {
    if let Ok(v) = std::env::var("PKGPILOT_WORKER_BIN") {
        if !v.trim().is_empty() {
            cfg.runner.worker_bin = Some(v);
        }
    }
    if let Ok(v) = std::env::var("PKGPILOT_TOOL_PROGRAM") {
        if !v.trim().is_empty() {
            cfg.worker.tool_program = v;
        }
    }
    if let Ok(v) = std::env::var("PKGPILOT_TOOL_ENV_PREFIX") {
        if !v.trim().is_empty() {
            cfg.worker.tool_env_prefix = v;
        }
    }
    if let Ok(v) = std::env::var("PKGPILOT_LOG") {
        if !v.trim().is_empty() {
            cfg.logging.level = v;
        }
    }
    validate(&cfg)?;
    Ok(cfg)
}

fn validate(cfg: &AppConfig) -> Result<(), ConfigError> {
    if cfg.worker.tool_env_prefix.trim().is_empty() {
        return Err(ConfigError::Validation(
            "worker.tool_env_prefix must not be empty".into(),
        ));
    }
    if cfg.worker.tool_program.trim().is_empty() {
        return Err(ConfigError::Validation(
            "worker.tool_program must not be empty".into(),
        ));
    }
    if cfg.server.request_timeout_ms == 0 || cfg.runner.invocation_timeout_ms == 0 {
        return Err(ConfigError::Validation("timeouts must be non-zero".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            "[worker]\ntool_program = \"/opt/conan/bin/conan\"\n\n[server]\nrequest_timeout_ms = 1500\n",
        )
        .unwrap();

        let cfg = load_from(&path).unwrap();
        assert_eq!(cfg.worker.tool_program, "/opt/conan/bin/conan");
        assert_eq!(cfg.worker.tool_env_prefix, "CONAN_");
        assert_eq!(cfg.server.request_timeout_ms, 1500);
        assert_eq!(cfg.server.shutdown_timeout_ms, 5_000);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn empty_prefix_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[worker]\ntool_env_prefix = \"\"\n").unwrap();
        assert!(matches!(load_from(&path), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn malformed_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[worker\n").unwrap();
        match load_from(&path) {
            Err(ConfigError::Parse { path: p, .. }) => assert!(p.ends_with(CONFIG_FILE_NAME)),
            other => panic!("unexpected {other:?}"),
        }
    }
}
