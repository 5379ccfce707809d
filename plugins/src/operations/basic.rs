use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use pkgpilot_core::api::{InvocationContext, Operation, OperationError};

/// Writes its arguments to stdout, one per line, and returns them.
pub struct EchoOperation;

#[async_trait]
impl Operation for EchoOperation {
    fn name(&self) -> &str {
        "echo"
    }

    async fn invoke(&self, ctx: &mut InvocationContext) -> Result<Value, OperationError> {
        let args = ctx.bundle().args.clone();
        for arg in &args {
            ctx.stdout().line(arg).map_err(anyhow::Error::from)?;
        }
        if let Some(text) = ctx.bundle().named_str("stderr").map(str::to_string) {
            ctx.stderr().line(&text).map_err(anyhow::Error::from)?;
        }
        Ok(json!(args))
    }
}

/// Reports the environment the invocation sees. With arguments, only those
/// variables are returned.
pub struct EnvOperation;

#[async_trait]
impl Operation for EnvOperation {
    fn name(&self) -> &str {
        "env"
    }

    async fn invoke(&self, ctx: &mut InvocationContext) -> Result<Value, OperationError> {
        let keys = &ctx.bundle().args;
        let vars: serde_json::Map<String, Value> = if keys.is_empty() {
            ctx.env()
                .iter()
                .map(|(k, v)| (k.to_string(), json!(v)))
                .collect()
        } else {
            keys.iter()
                .map(|k| (k.clone(), json!(ctx.env().get(k))))
                .collect()
        };
        Ok(Value::Object(vars))
    }
}

/// Always fails, after writing a line to stderr.
pub struct FailOperation;

#[async_trait]
impl Operation for FailOperation {
    fn name(&self) -> &str {
        "fail"
    }

    async fn invoke(&self, ctx: &mut InvocationContext) -> Result<Value, OperationError> {
        let message = ctx
            .bundle()
            .named_str("message")
            .unwrap_or("requested failure")
            .to_string();
        ctx.stderr().line(&message).map_err(anyhow::Error::from)?;
        Err(anyhow::anyhow!(message)
            .context("fail operation")
            .into())
    }
}

pub struct PanicOperation;

#[async_trait]
impl Operation for PanicOperation {
    fn name(&self) -> &str {
        "panic"
    }

    async fn invoke(&self, ctx: &mut InvocationContext) -> Result<Value, OperationError> {
        let message = ctx
            .bundle()
            .named_str("message")
            .unwrap_or("requested panic")
            .to_string();
        ctx.stdout().write_text("before panic").map_err(anyhow::Error::from)?;
        panic!("{message}");
    }
}

/// Sleeps for `ms` milliseconds, logging a heartbeat every second.
pub struct SleepOperation;

#[async_trait]
impl Operation for SleepOperation {
    fn name(&self) -> &str {
        "sleep"
    }

    async fn invoke(&self, ctx: &mut InvocationContext) -> Result<Value, OperationError> {
        let ms: u64 = ctx
            .require_named("ms")?
            .parse()
            .map_err(|e| OperationError::invalid("ms", format!("{e}")))?;
        let mut remaining = Duration::from_millis(ms);
        let beat = Duration::from_secs(1);
        while !remaining.is_zero() {
            let step = remaining.min(beat);
            tokio::time::sleep(step).await;
            remaining -= step;
            ctx.log().info(&format!("{}ms left", remaining.as_millis()));
        }
        Ok(json!({ "slept_ms": ms }))
    }
}
