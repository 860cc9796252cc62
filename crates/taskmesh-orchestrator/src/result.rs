use crate::task_graph::TaskGraph;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use taskmesh_core::{TaskError, TaskState};
use uuid::Uuid;

/// Overall outcome of a plan run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    /// Every task succeeded.
    Succeeded,
    /// At least one task failed or was cancelled by a failed dependency.
    Failed,
    /// The run was cancelled before finishing.
    Cancelled,
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanStatus::Succeeded => write!(f, "succeeded"),
            PlanStatus::Failed => write!(f, "failed"),
            PlanStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Final record for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    /// Terminal state of the task.
    pub status: TaskState,
    /// Agent output, present only for Succeeded tasks. May be JSON `null`.
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,
    /// Why the task failed or was cancelled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    /// Number of times the task was handed to an agent.
    pub attempts: u32,
    /// Agent of the last attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

/// A present `result` field is `Some`, even when it holds `null`.
fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Result of a full plan run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    /// Id assigned to this run.
    pub plan_id: Uuid,
    /// Overall status.
    pub status: PlanStatus,
    /// Per-task outcomes keyed by task id.
    pub tasks: BTreeMap<String, TaskOutcome>,
    /// When the scheduler started.
    pub started_at: DateTime<Utc>,
    /// When the last task reached a terminal state.
    pub finished_at: DateTime<Utc>,
    /// Wall-clock duration of the run.
    pub duration_ms: u64,
}

impl PlanResult {
    /// Collect the outcome of a finished graph.
    ///
    /// A run that was not cancelled is `Succeeded` only if every task is.
    pub fn from_graph(
        plan_id: Uuid,
        graph: &TaskGraph,
        cancelled: bool,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        let tasks: BTreeMap<String, TaskOutcome> = graph
            .tasks()
            .iter()
            .map(|t| {
                (
                    t.id.clone(),
                    TaskOutcome {
                        status: t.state,
                        result: t.result.clone(),
                        error: t.error.clone(),
                        attempts: t.attempts,
                        agent: t.agent.clone(),
                    },
                )
            })
            .collect();

        let status = if cancelled {
            PlanStatus::Cancelled
        } else if tasks.values().all(|o| o.status == TaskState::Succeeded) {
            PlanStatus::Succeeded
        } else {
            PlanStatus::Failed
        };

        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;

        Self {
            plan_id,
            status,
            tasks,
            started_at,
            finished_at,
            duration_ms,
        }
    }

    /// Whether every task succeeded.
    pub fn is_success(&self) -> bool {
        self.status == PlanStatus::Succeeded
    }

    /// Outcome of one task.
    pub fn task(&self, id: &str) -> Option<&TaskOutcome> {
        self.tasks.get(id)
    }

    /// Ids of tasks that ended in `Failed`, in id order.
    pub fn failed_tasks(&self) -> Vec<&str> {
        self.tasks
            .iter()
            .filter(|(_, o)| o.status == TaskState::Failed)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Number of tasks that ended in `state`.
    pub fn count(&self, state: TaskState) -> usize {
        self.tasks.values().filter(|o| o.status == state).count()
    }

    /// One-line human summary.
    pub fn summary(&self) -> String {
        format!(
            "Plan {}: {}/{} tasks succeeded, {} failed, {} cancelled in {}ms",
            self.status,
            self.count(TaskState::Succeeded),
            self.tasks.len(),
            self.count(TaskState::Failed),
            self.count(TaskState::Cancelled),
            self.duration_ms
        )
    }
}
