use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub runner: RunnerConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Settings applied inside worker processes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Executable of the wrapped package manager.
    #[serde(default = "default_tool_program")]
    pub tool_program: String,

    /// Environment namespace owned by the wrapped tool. Ambient variables
    /// with this prefix never reach an invocation.
    #[serde(default = "default_tool_env_prefix")]
    pub tool_env_prefix: String,

    /// Variables the harness injects into every invocation.
    #[serde(default = "default_injected_env")]
    pub injected_env: BTreeMap<String, String>,
}

fn default_tool_program() -> String {
    "conan".to_string()
}

fn default_tool_env_prefix() -> String {
    "CONAN_".to_string()
}

fn default_injected_env() -> BTreeMap<String, String> {
    [
        ("CONAN_NON_INTERACTIVE".to_string(), "1".to_string()),
        ("CONAN_COLOR_DISPLAY".to_string(), "0".to_string()),
    ]
    .into_iter()
    .collect()
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            tool_program: default_tool_program(),
            tool_env_prefix: default_tool_env_prefix(),
            injected_env: default_injected_env(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Worker executable; defaults to the current executable.
    #[serde(default)]
    pub worker_bin: Option<String>,

    /// Upper bound for one invocation before the controller gives up.
    #[serde(default = "default_invocation_timeout_ms")]
    pub invocation_timeout_ms: u64,

    /// How long to keep reading after the worker exits.
    #[serde(default = "default_drain_grace_ms")]
    pub drain_grace_ms: u64,

    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
}

fn default_invocation_timeout_ms() -> u64 {
    600_000
}

fn default_drain_grace_ms() -> u64 {
    500
}

fn default_kill_grace_ms() -> u64 {
    2_000
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            worker_bin: None,
            invocation_timeout_ms: default_invocation_timeout_ms(),
            drain_grace_ms: default_drain_grace_ms(),
            kill_grace_ms: default_kill_grace_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file for the controller. Workers always log to stderr.
    #[serde(default)]
    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}
