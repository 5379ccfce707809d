use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{OperationError, RegistryError};
use crate::harness::InvocationContext;

/// Reserved request name that stops the persistent query server.
pub const SHUTDOWN_COMMAND: &str = "end";

/// The operation-specific body that runs inside a worker process.
#[async_trait]
pub trait Operation: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(&self, ctx: &mut InvocationContext) -> Result<Value, OperationError>;
}

/// Name → operation table, validated as it is built.
#[derive(Clone, Default)]
pub struct OperationRegistry {
    ops: BTreeMap<String, Arc<dyn Operation>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, op: Arc<dyn Operation>) -> Result<(), RegistryError> {
        let name = op.name().to_string();
        validate_name(&name)?;
        if self.ops.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.ops.insert(name, op);
        Ok(())
    }

    pub fn with(mut self, op: Arc<dyn Operation>) -> Result<Self, RegistryError> {
        self.register(op)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Operation>> {
        self.ops.get(name).cloned()
    }

    /// Like [`get`](Self::get), but a miss yields an operation that fails
    /// with [`OperationError::UnknownOperation`], so callers handle unknown
    /// names the same way as any other failure.
    pub fn resolve(&self, name: &str) -> Arc<dyn Operation> {
        match self.get(name) {
            Some(op) => op,
            None => Arc::new(UnknownOperation(name.to_string())),
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.ops.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

pub fn validate_name(name: &str) -> Result<(), RegistryError> {
    if name == SHUTDOWN_COMMAND {
        return Err(RegistryError::Reserved(name.to_string()));
    }
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'));
    if !valid {
        return Err(RegistryError::InvalidName(name.to_string()));
    }
    Ok(())
}

struct UnknownOperation(String);

#[async_trait]
impl Operation for UnknownOperation {
    fn name(&self) -> &str {
        &self.0
    }

    async fn invoke(&self, _ctx: &mut InvocationContext) -> Result<Value, OperationError> {
        Err(OperationError::UnknownOperation(self.0.clone()))
    }
}
