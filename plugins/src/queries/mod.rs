//! Handlers for the persistent query worker. Each reads its arguments from
//! the request parameters and answers with a single value.

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use pkgpilot_core::api::{InvocationContext, Operation, OperationError};

pub struct PingQuery;

#[async_trait]
impl Operation for PingQuery {
    fn name(&self) -> &str {
        "ping"
    }

    async fn invoke(&self, _ctx: &mut InvocationContext) -> Result<Value, OperationError> {
        Ok(json!("pong"))
    }
}

/// Returns its parameters, repeated keys as lists.
pub struct EchoQuery;

#[async_trait]
impl Operation for EchoQuery {
    fn name(&self) -> &str {
        "echo"
    }

    async fn invoke(&self, ctx: &mut InvocationContext) -> Result<Value, OperationError> {
        Ok(json!(ctx.bundle().named))
    }
}

/// `get_env?key=A&key=B`: the values those variables have for a request.
pub struct GetEnvQuery;

#[async_trait]
impl Operation for GetEnvQuery {
    fn name(&self) -> &str {
        "get_env"
    }

    async fn invoke(&self, ctx: &mut InvocationContext) -> Result<Value, OperationError> {
        let keys = ctx.bundle().named_list("key");
        if keys.is_empty() {
            return Err(OperationError::MissingArgument("key".into()));
        }
        let vars: serde_json::Map<String, Value> = keys
            .into_iter()
            .map(|k| {
                let v = json!(ctx.env().get(&k));
                (k, v)
            })
            .collect();
        Ok(Value::Object(vars))
    }
}

/// Version string reported by the wrapped tool.
pub struct ToolVersionQuery {
    program: String,
}

impl ToolVersionQuery {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Operation for ToolVersionQuery {
    fn name(&self) -> &str {
        "tool_version"
    }

    async fn invoke(&self, ctx: &mut InvocationContext) -> Result<Value, OperationError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--version").kill_on_drop(true);
        ctx.env().apply_to(&mut cmd);

        let output = cmd.output().await.map_err(|source| OperationError::ToolSpawn {
            program: self.program.clone(),
            source,
        })?;
        if !output.status.success() {
            return Err(OperationError::ToolExit {
                program: self.program.clone(),
                code: output.status.code().unwrap_or(-1),
            });
        }
        let text = String::from_utf8_lossy(&output.stdout);
        let version = text
            .split_whitespace()
            .find(|w| w.chars().next().is_some_and(|c| c.is_ascii_digit()))
            .unwrap_or_else(|| text.trim());
        Ok(json!(version))
    }
}
