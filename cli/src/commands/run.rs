use std::io::Write;
use std::time::Duration;

use serde_json::Value;

use pkgpilot_core::api::{
    AppConfig, OneShotRunner, Outcome, ParameterBundle, ReplyHandler, WorkerCommand,
};

use super::cli::{BundleArgs, RunArgs};
use crate::error::{exit_code, CliError};

pub fn split_pair(flag: &'static str, raw: &str) -> Result<(String, String), CliError> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(CliError::InvalidPair {
            flag,
            value: raw.to_string(),
        }),
    }
}

impl BundleArgs {
    pub fn to_bundle(&self) -> Result<ParameterBundle, CliError> {
        let mut bundle = ParameterBundle::new(self.operation.clone())
            .args(self.args.iter().cloned())
            .timed(self.timed);
        if let Some(recipe) = &self.recipe {
            bundle = bundle.recipe(recipe);
        }
        if let Some(cwd) = &self.cwd {
            bundle = bundle.cwd(cwd);
        }
        for raw in &self.env {
            let (key, value) = split_pair("--env", raw)?;
            bundle = bundle.env(key, value);
        }
        for key in &self.unset {
            bundle = bundle.unset(key.clone());
        }
        for raw in &self.named {
            let (key, value) = split_pair("--set", raw)?;
            let merged = match bundle.named.remove(&key) {
                None => Value::String(value),
                Some(Value::Array(mut items)) => {
                    items.push(Value::String(value));
                    Value::Array(items)
                }
                Some(previous) => Value::Array(vec![previous, Value::String(value)]),
            };
            bundle.named.insert(key, merged);
        }
        Ok(bundle)
    }
}

/// Mirrors worker output onto this process's streams.
pub struct ConsoleHandler {
    json: bool,
    outcome: Option<Outcome>,
}

impl ConsoleHandler {
    pub fn new(json: bool) -> Self {
        Self {
            json,
            outcome: None,
        }
    }
}

impl ReplyHandler for ConsoleHandler {
    fn on_stdout(&mut self, text: &str) {
        // Keep stdout machine-readable in JSON mode.
        if self.json {
            eprintln!("{text}");
        } else {
            println!("{text}");
        }
    }

    fn on_stderr(&mut self, text: &str) {
        eprintln!("{text}");
    }

    fn on_log(&mut self, text: &str) {
        eprintln!("{text}");
    }

    fn on_complete(&mut self, outcome: &Outcome) {
        self.outcome = Some(outcome.clone());
    }
}

pub fn print_outcome(outcome: &Outcome, json: bool) {
    let mut stdout = std::io::stdout().lock();
    match outcome {
        Outcome::Success(payload) => {
            if json {
                let _ = writeln!(stdout, "{}", outcome_json(outcome));
            } else if !payload.is_null() {
                let text = serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string());
                let _ = writeln!(stdout, "{text}");
            }
        }
        Outcome::Failure(report) => {
            if json {
                let _ = writeln!(stdout, "{}", outcome_json(outcome));
            }
            eprintln!("error: {report}");
            for line in &report.stack {
                eprintln!("  {line}");
            }
        }
        other => {
            if json {
                let _ = writeln!(stdout, "{}", outcome_json(outcome));
            }
            eprintln!("error: {}", other.describe());
        }
    }
}

pub fn outcome_json(outcome: &Outcome) -> Value {
    match outcome {
        Outcome::Success(payload) => serde_json::json!({ "status": "success", "result": payload }),
        Outcome::Failure(report) => serde_json::json!({ "status": "failure", "error": report }),
        Outcome::Cancelled => serde_json::json!({ "status": "cancelled" }),
        other => serde_json::json!({ "status": "transport_failure", "error": other.describe() }),
    }
}

pub fn outcome_exit_code(outcome: &Outcome) -> i32 {
    match outcome {
        Outcome::Success(_) => exit_code::SUCCESS,
        Outcome::Failure(_) => exit_code::FAILURE,
        _ => exit_code::TRANSPORT,
    }
}

pub async fn run(args: RunArgs, mut cfg: AppConfig, command: WorkerCommand) -> Result<i32, CliError> {
    if let Some(ms) = args.timeout_ms {
        cfg.runner.invocation_timeout_ms = ms.max(1);
    }
    let bundle = args.bundle.to_bundle()?;
    tracing::debug!(target: "pkgpilot.cli", command_line = %bundle.render_command_line(&cfg.worker.tool_program), "running");

    let runner = OneShotRunner::new(cfg.runner.clone(), command);
    let mut handler = ConsoleHandler::new(args.json);
    let interrupted = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    let report = runner.run_until(&bundle, &mut handler, interrupted).await?;

    print_outcome(&report.outcome, args.json);
    if report.violations > 0 {
        tracing::warn!(target: "pkgpilot.cli", violations = report.violations, "worker broke the message protocol");
    }
    if report.timed_out {
        eprintln!(
            "error: timed out after {}",
            humanize(Duration::from_millis(cfg.runner.invocation_timeout_ms))
        );
        return Ok(exit_code::TIMEOUT);
    }
    Ok(outcome_exit_code(&report.outcome))
}

pub fn render(args: BundleArgs, cfg: &AppConfig) -> Result<i32, CliError> {
    let bundle = args.to_bundle()?;
    println!("{}", bundle.render_command_line(&cfg.worker.tool_program));
    Ok(exit_code::SUCCESS)
}

fn humanize(d: Duration) -> String {
    if d.as_millis() < 1000 {
        format!("{}ms", d.as_millis())
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}
