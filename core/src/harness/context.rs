use std::path::Path;

use crate::bundle::ParameterBundle;
use crate::channel::{InvocationLog, MessageSink, OutputStream};
use crate::error::OperationError;
use crate::protocol::StreamKind;

use super::env::InvocationEnv;

/// Everything an invocation body may touch: its parameters, its prepared
/// environment, its output streams and its logger.
pub struct InvocationContext {
    bundle: ParameterBundle,
    env: InvocationEnv,
    stdout: OutputStream,
    stderr: OutputStream,
    log: InvocationLog,
}

impl InvocationContext {
    pub(crate) fn new(bundle: ParameterBundle, env: InvocationEnv, sink: &MessageSink) -> Self {
        let log = InvocationLog::new(sink.clone(), &bundle.operation);
        Self {
            stdout: OutputStream::new(StreamKind::Stdout, sink.clone()),
            stderr: OutputStream::new(StreamKind::Stderr, sink.clone()),
            log,
            bundle,
            env,
        }
    }

    pub fn bundle(&self) -> &ParameterBundle {
        &self.bundle
    }

    pub fn env(&self) -> &InvocationEnv {
        &self.env
    }

    pub fn cwd(&self) -> Option<&Path> {
        self.bundle.cwd.as_deref()
    }

    pub fn stdout(&mut self) -> &mut OutputStream {
        &mut self.stdout
    }

    pub fn stderr(&mut self) -> &mut OutputStream {
        &mut self.stderr
    }

    /// Both streams at once, for bodies that pump a child's stdout and
    /// stderr concurrently.
    pub fn streams(&mut self) -> (&mut OutputStream, &mut OutputStream) {
        (&mut self.stdout, &mut self.stderr)
    }

    pub fn log(&self) -> &InvocationLog {
        &self.log
    }

    pub fn require_named(&self, key: &str) -> Result<&str, OperationError> {
        self.bundle
            .named_str(key)
            .ok_or_else(|| OperationError::MissingArgument(key.to_string()))
    }

    pub(crate) fn finish(&mut self) {
        let _ = self.stdout.finish();
        let _ = self.stderr.finish();
    }
}
