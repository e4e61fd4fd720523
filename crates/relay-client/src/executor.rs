//! Tool execution boundary.
//!
//! The pipeline treats executors as opaque: a failure is an
//! [`ExecutionError`] that travels back as a normal response.

use async_trait::async_trait;
use relay_core::{ExecutionError, ToolDescriptor, ToolManifest, ToolRequest};
use serde_json::{Value, json};

/// Runs tool requests.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute one request.
    async fn execute(&self, request: &ToolRequest) -> Result<Value, ExecutionError>;

    /// Tools this executor offers.
    fn manifest(&self) -> ToolManifest;
}

/// `noop` and `echo`, enough to exercise a relay end to end.
#[derive(Clone, Copy, Debug, Default)]
pub struct BuiltinExecutor;

#[async_trait]
impl ToolExecutor for BuiltinExecutor {
    async fn execute(&self, request: &ToolRequest) -> Result<Value, ExecutionError> {
        match request.tool_name.as_str() {
            "noop" => Ok(json!({})),
            "echo" => Ok(request.params.clone()),
            other => Err(ExecutionError::unknown_tool(other)),
        }
    }

    fn manifest(&self) -> ToolManifest {
        ToolManifest::new(
            env!("CARGO_PKG_VERSION"),
            vec![
                ToolDescriptor::new("noop", "Does nothing and returns an empty object"),
                ToolDescriptor::new("echo", "Returns its params unchanged"),
            ],
        )
    }
}
