use crate::monitor::AgentMonitor;
use crate::registry::CapabilityRegistry;
use crate::result::PlanResult;
use crate::task_graph::TaskGraph;
use crate::types::DispatchRecord;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use taskmesh_core::{TaskError, TaskRequest};
use tokio::sync::RwLock;
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Global dispatch limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of attempts running at once across all agents.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Timeout applied when neither the task nor the agent sets one.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
}

fn default_max_in_flight() -> usize {
    3
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            default_timeout_ms: default_timeout_ms(),
        }
    }
}

/// How one attempt ended, before output validation.
enum AttemptOutcome {
    Completed(Value),
    Failed(String),
    TimedOut,
}

/// A ready task, copied out of the graph for matching.
struct ReadyTask {
    id: String,
    task_type: String,
    payload: Value,
    preferred_agent: Option<String>,
    timeout_ms: Option<u64>,
}

/// Drives one task graph to completion.
///
/// A single loop owns every state transition: it dispatches ready tasks,
/// waits for the next completion, backoff expiry or cancellation, and applies
/// the outcome to the graph.
pub struct Scheduler {
    graph: Arc<RwLock<TaskGraph>>,
    registry: Arc<CapabilityRegistry>,
    monitor: Arc<AgentMonitor>,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Create a scheduler over a built graph.
    pub fn new(
        graph: Arc<RwLock<TaskGraph>>,
        registry: Arc<CapabilityRegistry>,
        monitor: Arc<AgentMonitor>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            graph,
            registry,
            monitor,
            config,
        }
    }

    /// Shared handle to the graph, for read-only observers.
    pub fn graph(&self) -> &Arc<RwLock<TaskGraph>> {
        &self.graph
    }

    /// Run the graph until every task is terminal or `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> PlanResult {
        let plan_id = Uuid::new_v4();
        let started_at = Utc::now();
        let mut running: JoinSet<AttemptOutcome> = JoinSet::new();
        let mut records: HashMap<Id, DispatchRecord> = HashMap::new();
        let mut in_flight: HashMap<String, usize> = HashMap::new();
        let mut cancelled = false;

        let task_count = self.graph.read().await.len();
        info!(
            plan_id = %plan_id,
            tasks = task_count,
            max_in_flight = self.config.max_in_flight,
            "Plan started"
        );

        loop {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            self.dispatch_ready(&mut running, &mut records, &mut in_flight, &cancel)
                .await;

            let (finished, next_retry) = {
                let graph = self.graph.read().await;
                (graph.is_finished(), graph.next_retry_at())
            };
            if finished {
                break;
            }
            if running.is_empty() && next_retry.is_none() {
                // Nothing in flight and nothing waiting on a backoff: no
                // transition can ever happen again.
                let stuck = self
                    .graph
                    .write()
                    .await
                    .cancel_remaining("no dispatchable tasks remain");
                warn!(plan_id = %plan_id, tasks = ?stuck, "Scheduler stalled, cancelling remaining tasks");
                break;
            }

            // A retry that is already due but was not dispatched is waiting on
            // a running attempt to free capacity.
            let now = Instant::now();
            let wake_at = match next_retry {
                Some(at) if at > now => Some(at),
                Some(_) if running.is_empty() => continue,
                _ => None,
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                Some(joined) = running.join_next_with_id(), if !running.is_empty() => {
                    self.complete(joined, &mut records, &mut in_flight).await;
                }
                _ = sleep_until(wake_at) => {}
            }
        }

        if cancelled {
            self.abort_in_flight(&mut running, &mut records).await;
            let dropped = self.graph.write().await.cancel_remaining("plan cancelled");
            warn!(plan_id = %plan_id, cancelled = dropped.len(), "Plan cancelled");
        }

        let result = {
            let graph = self.graph.read().await;
            PlanResult::from_graph(plan_id, &graph, cancelled, started_at, Utc::now())
        };
        info!(
            plan_id = %plan_id,
            status = %result.status,
            duration_ms = result.duration_ms,
            "Plan finished"
        );
        self.monitor.flush().await;
        result
    }

    /// Dispatch as many ready tasks as the global and per-agent limits allow.
    async fn dispatch_ready(
        &self,
        running: &mut JoinSet<AttemptOutcome>,
        records: &mut HashMap<Id, DispatchRecord>,
        in_flight: &mut HashMap<String, usize>,
        cancel: &CancellationToken,
    ) {
        let max_in_flight = self.config.max_in_flight.max(1);
        let mut graph = self.graph.write().await;
        let ready: Vec<ReadyTask> = graph
            .dispatchable(Instant::now())
            .into_iter()
            .map(|t| ReadyTask {
                id: t.id.clone(),
                task_type: t.task_type.clone(),
                payload: t.payload.clone(),
                preferred_agent: t.preferred_agent.clone(),
                timeout_ms: t.timeout_ms,
            })
            .collect();

        for task in ready {
            if running.len() >= max_in_flight {
                break;
            }

            let matched = self.registry.match_task(
                &task.task_type,
                &task.payload,
                task.preferred_agent.as_deref(),
            );

            if matched.candidates.is_empty() {
                let reason = matched.rejection_summary();
                error!(task_id = %task.id, task_type = %task.task_type, reason = %reason, "No capable agent");
                let dropped = graph.mark_failed(
                    &task.id,
                    TaskError::NoCapableAgent {
                        task_type: task.task_type,
                        reason,
                    },
                );
                if !dropped.is_empty() {
                    warn!(task_id = %task.id, cancelled = ?dropped, "Cancelled dependents");
                }
                continue;
            }

            let Some(candidate) = matched
                .candidates
                .into_iter()
                .find(|c| in_flight.get(c.id()).copied().unwrap_or(0) < c.descriptor.concurrency)
            else {
                debug!(task_id = %task.id, "All capable agents saturated");
                continue;
            };

            let agent_id = candidate.id().to_string();
            graph.mark_dispatched(&task.id, &agent_id);
            let attempt = graph.get(&task.id).map_or(1, |t| t.attempts);
            let timeout_ms = task
                .timeout_ms
                .or(candidate.descriptor.timeout_ms)
                .unwrap_or(self.config.default_timeout_ms);
            let timeout = Duration::from_millis(timeout_ms);

            *in_flight.entry(agent_id.clone()).or_default() += 1;
            self.monitor.start_task(&agent_id, &task.id, attempt).await;
            info!(task_id = %task.id, agent = %agent_id, attempt, timeout_ms, "Dispatching task");

            let request = TaskRequest {
                task_id: task.id.clone(),
                task_type: task.task_type,
                payload: task.payload,
                attempt,
            };
            let token = cancel.child_token();
            let agent = candidate.agent.clone();
            let handle = running.spawn(async move {
                match tokio::time::timeout(timeout, agent.execute(request, token.clone())).await {
                    Ok(Ok(value)) => AttemptOutcome::Completed(value),
                    Ok(Err(e)) => AttemptOutcome::Failed(e.to_string()),
                    Err(_) => {
                        token.cancel();
                        AttemptOutcome::TimedOut
                    }
                }
            });

            records.insert(
                handle.id(),
                DispatchRecord {
                    task_id: task.id,
                    agent_id,
                    attempt,
                    timeout,
                    retry_policy: candidate.descriptor.retry_policy.clone(),
                    output_schema: candidate.output_schema.clone(),
                    started: Instant::now(),
                },
            );
        }
    }

    /// Apply the outcome of one finished attempt.
    async fn complete(
        &self,
        joined: Result<(Id, AttemptOutcome), JoinError>,
        records: &mut HashMap<Id, DispatchRecord>,
        in_flight: &mut HashMap<String, usize>,
    ) {
        let (id, outcome) = match joined {
            Ok((id, outcome)) => (id, Ok(outcome)),
            Err(e) => (e.id(), Err(join_failure_message(e))),
        };
        let Some(record) = records.remove(&id) else {
            warn!(task = %id, "Completion for an unknown dispatch");
            return;
        };
        if let Some(count) = in_flight.get_mut(&record.agent_id) {
            *count = count.saturating_sub(1);
        }

        let result = match outcome {
            Ok(AttemptOutcome::Completed(value)) => {
                match record.check_output(&value) {
                    Ok(()) => Ok(value),
                    Err(message) => Err(TaskError::OutputValidation {
                        agent: record.agent_id.clone(),
                        message,
                    }),
                }
            }
            Ok(AttemptOutcome::Failed(message)) | Err(message) => Err(TaskError::AgentExecution {
                agent: record.agent_id.clone(),
                message,
            }),
            Ok(AttemptOutcome::TimedOut) => {
                self.monitor.record_timeout(&record.agent_id).await;
                Err(TaskError::Timeout {
                    agent: record.agent_id.clone(),
                    timeout_ms: record.timeout.as_millis() as u64,
                })
            }
        };

        self.monitor
            .finish_task(&record.agent_id, result.is_ok(), record.started.elapsed())
            .await;

        let mut graph = self.graph.write().await;
        match result {
            Ok(value) => {
                let unblocked = graph.mark_succeeded(&record.task_id, value);
                info!(
                    task_id = %record.task_id,
                    agent = %record.agent_id,
                    attempt = record.attempt,
                    unblocked = ?unblocked,
                    "Task succeeded"
                );
            }
            Err(err) => {
                let retry_count = graph.get(&record.task_id).map_or(0, |t| t.retry_count);
                if err.is_retryable() && retry_count < record.retry_policy.max_retries {
                    let delay = record.retry_policy.delay_for(retry_count);
                    graph.schedule_retry(&record.task_id, Instant::now() + delay);
                    drop(graph);
                    self.monitor.record_retry(&record.agent_id).await;
                    warn!(
                        task_id = %record.task_id,
                        agent = %record.agent_id,
                        attempt = record.attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Attempt failed, retrying"
                    );
                } else {
                    error!(
                        task_id = %record.task_id,
                        agent = %record.agent_id,
                        attempts = record.attempt,
                        error = %err,
                        "Task failed"
                    );
                    let dropped = graph.mark_failed(&record.task_id, err);
                    if !dropped.is_empty() {
                        warn!(task_id = %record.task_id, cancelled = ?dropped, "Cancelled dependents");
                    }
                }
            }
        }
    }

    /// Abort every running attempt; their results are discarded.
    async fn abort_in_flight(
        &self,
        running: &mut JoinSet<AttemptOutcome>,
        records: &mut HashMap<Id, DispatchRecord>,
    ) {
        running.shutdown().await;
        for (_, record) in records.drain() {
            self.monitor
                .finish_task(&record.agent_id, false, record.started.elapsed())
                .await;
        }
    }
}

fn join_failure_message(err: JoinError) -> String {
    if !err.is_panic() {
        return "dispatch aborted".to_string();
    }
    let payload = err.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("agent panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("agent panicked: {msg}")
    } else {
        "agent panicked".to_string()
    }
}

async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
