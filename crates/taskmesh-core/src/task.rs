use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry of a submitted plan.
///
/// Plans are produced by an external decomposition step; the orchestrator
/// only validates and executes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Unique id within the plan.
    pub id: String,
    /// Matched against agent capabilities.
    pub task_type: String,
    /// Task input; its shape depends on `task_type`.
    #[serde(default = "empty_payload")]
    pub payload: Value,
    /// Ids of tasks that must succeed before this one may run.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Higher values are dispatched first among ready tasks.
    #[serde(default)]
    pub priority: i32,
    /// Agent to try first, if registered and capable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_agent: Option<String>,
    /// Per-dispatch timeout overriding the agent and scheduler defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

fn empty_payload() -> Value {
    Value::Object(serde_json::Map::new())
}

impl TaskDefinition {
    /// Creates a definition with an empty payload, no dependencies and priority 0.
    pub fn new(id: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task_type: task_type.into(),
            payload: empty_payload(),
            dependencies: Vec::new(),
            priority: 0,
            preferred_agent: None,
            timeout_ms: None,
        }
    }

    /// Set the task input.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Replace the dependency list.
    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Set the dispatch priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Hint which agent should run the task.
    pub fn with_preferred_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.preferred_agent = Some(agent_id.into());
        self
    }

    /// Override the dispatch timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// Lifecycle of a task inside a running plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting on at least one dependency.
    Pending,
    /// All dependencies succeeded; eligible for dispatch.
    Ready,
    /// Handed to an agent; an attempt is in flight.
    Dispatched,
    /// The agent returned a valid result.
    Succeeded,
    /// Attempts exhausted, or no agent could take the task.
    Failed,
    /// Blocked permanently by a failed prerequisite, or the plan was cancelled.
    Cancelled,
}

impl TaskState {
    /// Whether the task can no longer change state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Pending => write!(f, "pending"),
            TaskState::Ready => write!(f, "ready"),
            TaskState::Dispatched => write!(f, "dispatched"),
            TaskState::Succeeded => write!(f, "succeeded"),
            TaskState::Failed => write!(f, "failed"),
            TaskState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Why a task ended up Failed or Cancelled.
///
/// Recorded in the plan result rather than raised, so one failing branch never
/// aborts its siblings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskError {
    /// No registered agent declares the task type, or every capable agent
    /// rejected the payload. Never retried.
    #[error("no capable agent for task type '{task_type}': {reason}")]
    NoCapableAgent {
        /// The unmatched task type.
        task_type: String,
        /// Which agents were considered and why they were skipped.
        reason: String,
    },

    /// The agent returned an error (or panicked).
    #[error("agent '{agent}' failed: {message}")]
    AgentExecution {
        /// The failing agent.
        agent: String,
        /// Error or panic message.
        message: String,
    },

    /// The agent's result did not match its declared output schema.
    #[error("output of agent '{agent}' failed validation: {message}")]
    OutputValidation {
        /// The agent that produced the result.
        agent: String,
        /// First schema error.
        message: String,
    },

    /// The dispatch did not complete within its timeout.
    #[error("agent '{agent}' timed out after {timeout_ms}ms")]
    Timeout {
        /// The agent that timed out.
        agent: String,
        /// The timeout that elapsed.
        timeout_ms: u64,
    },

    /// A transitive prerequisite failed.
    #[error("dependency '{dependency}' did not succeed")]
    DependencyFailed {
        /// The task whose failure started the cascade.
        dependency: String,
    },

    /// The plan was cancelled before the task finished.
    #[error("cancelled: {reason}")]
    Cancelled {
        /// Why the run stopped.
        reason: String,
    },
}

impl TaskError {
    /// Whether the failure is transient and subject to the agent's retry policy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TaskError::AgentExecution { .. }
                | TaskError::OutputValidation { .. }
                | TaskError::Timeout { .. }
        )
    }
}
