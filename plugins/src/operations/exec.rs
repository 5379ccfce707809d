use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use pkgpilot_core::api::{InvocationContext, Operation, OperationError, OutputStream, ParameterBundle};

/// Subcommands of the wrapped tool that run as one-shot invocations.
pub const TOOL_SUBCOMMANDS: &[&str] = &[
    "build",
    "create",
    "export",
    "export-pkg",
    "info",
    "inspect",
    "install",
    "package",
    "remove",
    "search",
    "source",
    "test",
    "upload",
];

/// Runs an external program with the invocation's environment and working
/// directory, streaming its stdout and stderr line by line.
pub struct ExecOperation {
    name: String,
    target: Target,
}

enum Target {
    /// `<program> <operation> [recipe] [args...]`, the same line
    /// [`ParameterBundle::render_command_line`] prints.
    Tool { program: String },
    /// Program taken from the `program` argument, run with the bundle's args.
    Any,
}

impl ExecOperation {
    pub fn tool(program: impl Into<String>, subcommand: impl Into<String>) -> Self {
        Self {
            name: subcommand.into(),
            target: Target::Tool {
                program: program.into(),
            },
        }
    }

    pub fn exec() -> Self {
        Self {
            name: "exec".to_string(),
            target: Target::Any,
        }
    }

    fn argv(&self, bundle: &ParameterBundle) -> Result<(String, Vec<String>), OperationError> {
        match &self.target {
            Target::Tool { program } => {
                let mut args = vec![bundle.operation.clone()];
                if let Some(recipe) = &bundle.recipe {
                    args.push(recipe.to_string_lossy().into_owned());
                }
                args.extend(bundle.args.iter().cloned());
                Ok((program.clone(), args))
            }
            Target::Any => {
                let program = bundle
                    .named_str("program")
                    .ok_or_else(|| OperationError::MissingArgument("program".into()))?;
                Ok((program.to_string(), bundle.args.clone()))
            }
        }
    }
}

#[async_trait]
impl Operation for ExecOperation {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, ctx: &mut InvocationContext) -> Result<Value, OperationError> {
        let (program, args) = self.argv(ctx.bundle())?;

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        ctx.env().apply_to(&mut cmd);
        if let Some(cwd) = ctx.cwd() {
            cmd.current_dir(cwd);
        }

        ctx.log().info(&format!("running {program} {}", args.join(" ")));
        let mut child = cmd.spawn().map_err(|source| OperationError::ToolSpawn {
            program: program.clone(),
            source,
        })?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (out, err) = ctx.streams();
        let (out_res, err_res) = tokio::join!(forward(stdout, out), forward(stderr, err));
        out_res?;
        err_res?;

        let status = child.wait().await?;
        tracing::debug!(target: "pkgpilot.invocation", %program, ?status, "tool exited");
        match status.code() {
            Some(0) => Ok(json!({ "program": program, "exit_code": 0 })),
            Some(code) => Err(OperationError::ToolExit { program, code }),
            None => Err(OperationError::ToolExit { program, code: -1 }),
        }
    }
}

async fn forward<R>(pipe: Option<R>, stream: &mut OutputStream) -> Result<(), OperationError>
where
    R: AsyncRead + Unpin,
{
    let Some(pipe) = pipe else {
        return Ok(());
    };
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        stream
            .write_text(&String::from_utf8_lossy(&buf))
            .map_err(anyhow::Error::from)?;
    }
    stream.finish().map_err(anyhow::Error::from)?;
    Ok(())
}
