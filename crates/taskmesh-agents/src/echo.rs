use async_trait::async_trait;
use serde_json::Value;
use taskmesh_core::{Agent, AgentDescriptor, TaskRequest, TaskmeshResult};
use tokio_util::sync::CancellationToken;

/// Returns the task payload unchanged. Useful for wiring tests and dry runs.
pub struct EchoAgent;

impl EchoAgent {
    /// Create the agent.
    pub fn new() -> Self {
        Self
    }

    /// Registration defaults for this agent.
    pub fn default_descriptor() -> AgentDescriptor {
        AgentDescriptor::new("echo", ["echo"])
            .with_description("Returns the task payload unchanged.")
            .with_concurrency(4)
            .with_priority(10)
    }
}

impl Default for EchoAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for EchoAgent {
    async fn execute(&self, request: TaskRequest, _cancel: CancellationToken) -> TaskmeshResult<Value> {
        Ok(request.payload)
    }
}
