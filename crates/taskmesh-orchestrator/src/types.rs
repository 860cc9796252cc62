use crate::registry::first_schema_error;
use jsonschema::Validator;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use taskmesh_core::{RetryPolicy, TaskDefinition, TaskError, TaskState};
use tokio::time::Instant;

/// A task inside a task graph: its definition plus runtime state.
#[derive(Debug, Clone)]
pub struct Task {
    /// Unique id within the plan.
    pub id: String,
    /// Capability an agent must declare to run this task.
    pub task_type: String,
    /// Input handed to the agent.
    pub payload: Value,
    /// Ids that must succeed first.
    pub dependencies: Vec<String>,
    /// Higher runs first among ready tasks.
    pub priority: i32,
    /// Agent to try first when it is usable.
    pub preferred_agent: Option<String>,
    /// Per-task timeout override.
    pub timeout_ms: Option<u64>,
    /// Current lifecycle state.
    pub state: TaskState,
    /// Retries consumed so far (0 on the first attempt).
    pub retry_count: u32,
    /// Number of times the task was handed to an agent.
    pub attempts: u32,
    /// Set only once the task Succeeded.
    pub result: Option<Value>,
    /// Set only once the task Failed or was Cancelled.
    pub error: Option<TaskError>,
    /// Agent of the most recent dispatch.
    pub agent: Option<String>,
    /// Earliest instant a retry may be dispatched.
    pub retry_at: Option<Instant>,
    /// Position in the submitted plan; breaks priority ties.
    pub seq: usize,
}

impl Task {
    /// Wrap a plan entry as a fresh Pending task.
    pub fn from_definition(def: TaskDefinition, seq: usize) -> Self {
        Self {
            id: def.id,
            task_type: def.task_type,
            payload: def.payload,
            dependencies: def.dependencies,
            priority: def.priority,
            preferred_agent: def.preferred_agent,
            timeout_ms: def.timeout_ms,
            state: TaskState::Pending,
            retry_count: 0,
            attempts: 0,
            result: None,
            error: None,
            agent: None,
            retry_at: None,
            seq,
        }
    }

    /// Ready and not waiting out a retry backoff.
    pub fn is_dispatchable(&self, now: Instant) -> bool {
        self.state == TaskState::Ready && self.retry_at.map_or(true, |at| at <= now)
    }
}

/// Link between a task and the agent chosen for one execution attempt.
#[derive(Debug, Clone)]
pub struct DispatchRecord {
    /// The dispatched task.
    pub task_id: String,
    /// The agent running it.
    pub agent_id: String,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Effective timeout for this attempt.
    pub timeout: Duration,
    /// Policy of the chosen agent, captured at dispatch.
    pub retry_policy: RetryPolicy,
    /// Output schema of the chosen agent, captured at dispatch.
    pub output_schema: Option<Arc<Validator>>,
    /// When the attempt was spawned.
    pub started: Instant,
}

impl DispatchRecord {
    /// Check a result against the schema the agent was dispatched under.
    ///
    /// Unaffected by the agent being replaced or unregistered mid-flight.
    pub fn check_output(&self, result: &Value) -> Result<(), String> {
        first_schema_error(self.output_schema.as_deref(), result)
    }
}

/// Metrics tracked per agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMetrics {
    /// Attempts started.
    pub dispatched: u32,
    /// Attempts that produced a valid result.
    pub succeeded: u32,
    /// Attempts that failed for any reason, timeouts included.
    pub failed: u32,
    /// Attempts that hit their timeout.
    pub timeouts: u32,
    /// Retries scheduled after a failed attempt.
    pub retries: u32,
    /// Total time spent in finished attempts.
    pub duration_ms: u64,
}

/// Real-time snapshot of one agent's load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    /// The agent.
    pub agent_id: String,
    /// Attempts currently running on it.
    pub in_flight: usize,
    /// Coarse status derived from the last transition.
    pub status: WorkerStatus,
    /// Counters since the monitor was created.
    pub metrics: AgentMetrics,
}

/// Coarse agent status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// Nothing in flight.
    Idle,
    /// At least one attempt in flight.
    Working,
    /// The last attempt on this agent failed.
    Error,
}

/// One entry of the monitor's dispatch log, in dispatch order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchEvent {
    /// Position in the log, from 0.
    pub seq: usize,
    /// The dispatched task.
    pub task_id: String,
    /// The agent it went to.
    pub agent_id: String,
    /// 1-based attempt number.
    pub attempt: u32,
}
