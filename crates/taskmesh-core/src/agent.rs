use crate::{TaskmeshError, TaskmeshResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What an agent receives for one execution attempt.
///
/// Agents only ever see the task's own data; all state transitions stay with
/// the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Id of the task in its plan.
    pub task_id: String,
    /// The capability being exercised.
    pub task_type: String,
    /// Task input, already validated against the agent's input schema.
    pub payload: Value,
    /// 1 for the first dispatch, incremented on every retry.
    pub attempt: u32,
}

/// The execution port every worker agent implements.
///
/// Any `Err` returned here is treated as a transient execution failure and is
/// subject to the agent's [`RetryPolicy`].
#[async_trait]
pub trait Agent: Send + Sync {
    /// Execute one attempt of a task.
    ///
    /// `cancel` fires when the plan is cancelled or the dispatch times out.
    /// Agents that cannot stop early may ignore it; their result is discarded.
    async fn execute(&self, request: TaskRequest, cancel: CancellationToken)
        -> TaskmeshResult<Value>;
}

/// Shape of the delay between retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Always `base_delay_ms`.
    Fixed,
    /// `base_delay_ms * 2^retry_count`, capped at `max_delay_ms`.
    #[default]
    Exponential,
}

/// Configures how failed attempts on an agent are retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt; a task runs at most `max_retries + 1` times.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay shape between retries.
    #[serde(default)]
    pub backoff: Backoff,
    /// Base delay in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds (cap for exponential backoff).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    2
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff: Backoff::default(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Retry `max_retries` times with no delay in between.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Fixed,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Delay to wait before the retry that follows `retry_count` earlier retries.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let ms = match self.backoff {
            Backoff::Fixed => self.base_delay_ms,
            Backoff::Exponential => self
                .base_delay_ms
                .saturating_mul(2u64.saturating_pow(retry_count))
                .min(self.max_delay_ms),
        };
        Duration::from_millis(ms)
    }
}

/// Registration document for one agent.
///
/// Defaults are resolved once, when the document is deserialized; the
/// registry treats a registered descriptor as read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Unique agent id.
    pub id: String,
    /// Free-form description, shown by the CLI.
    #[serde(default)]
    pub description: String,
    /// Task types this agent can execute.
    pub capabilities: BTreeSet<String>,
    /// JSON Schema for task payloads. `None` accepts any payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    /// JSON Schema for results. `None` accepts any result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    /// Maximum simultaneous tasks on this agent.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// How failed attempts on this agent are retried.
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    /// Ranking weight among capable agents; higher is preferred.
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Per-dispatch timeout; falls back to the scheduler default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Labels for listing and filtering.
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_concurrency() -> usize {
    1
}

fn default_priority() -> i32 {
    50
}

impl AgentDescriptor {
    /// A descriptor with default concurrency, priority and retry policy.
    pub fn new<I, S>(id: impl Into<String>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            description: String::new(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            input_schema: None,
            output_schema: None,
            concurrency: default_concurrency(),
            retry_policy: RetryPolicy::default(),
            priority: default_priority(),
            timeout_ms: None,
            tags: Vec::new(),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Require payloads to match `schema`.
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    /// Require results to match `schema`.
    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Set the simultaneous task limit.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Set the ranking weight.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the per-dispatch timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Replace the tags.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Whether this agent declares `task_type` as a capability.
    pub fn can_handle(&self, task_type: &str) -> bool {
        self.capabilities.contains(task_type)
    }

    /// Structural checks applied at registration time.
    pub fn validate(&self) -> TaskmeshResult<()> {
        if self.id.trim().is_empty() {
            return Err(TaskmeshError::Registry(
                "agent id must not be empty".to_string(),
            ));
        }
        if self.capabilities.is_empty() {
            return Err(TaskmeshError::Registry(format!(
                "agent '{}' declares no capabilities",
                self.id
            )));
        }
        if self.concurrency == 0 {
            return Err(TaskmeshError::Registry(format!(
                "agent '{}' has a concurrency limit of 0",
                self.id
            )));
        }
        Ok(())
    }
}
