use crate::types::{AgentMetrics, AgentState, DispatchEvent, WorkerStatus};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;

/// Tracks per-agent load and metrics, plus the ordered log of every dispatch.
///
/// Agents appear on their first dispatch. The scheduler reports into it; any
/// number of observers may read snapshots concurrently.
pub struct AgentMonitor {
    states: Arc<RwLock<BTreeMap<String, AgentState>>>,
    log: Arc<RwLock<Vec<DispatchEvent>>>,
}

impl AgentMonitor {
    /// Create an empty monitor.
    pub fn new() -> Self {
        Self {
            states: Arc::new(RwLock::new(BTreeMap::new())),
            log: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Record a dispatch of `task_id` onto `agent_id`.
    pub async fn start_task(&self, agent_id: &str, task_id: &str, attempt: u32) {
        {
            let mut states = self.states.write().await;
            let state = states
                .entry(agent_id.to_string())
                .or_insert_with(|| AgentState {
                    agent_id: agent_id.to_string(),
                    in_flight: 0,
                    status: WorkerStatus::Idle,
                    metrics: AgentMetrics::default(),
                });
            state.in_flight += 1;
            state.status = WorkerStatus::Working;
            state.metrics.dispatched += 1;
        }

        let mut log = self.log.write().await;
        let seq = log.len();
        log.push(DispatchEvent {
            seq,
            task_id: task_id.to_string(),
            agent_id: agent_id.to_string(),
            attempt,
        });
    }

    /// Record the end of one attempt on an agent.
    pub async fn finish_task(&self, agent_id: &str, success: bool, duration: Duration) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(agent_id) {
            state.in_flight = state.in_flight.saturating_sub(1);
            state.metrics.duration_ms += duration.as_millis() as u64;
            if success {
                state.metrics.succeeded += 1;
            } else {
                state.metrics.failed += 1;
            }
            state.status = match (state.in_flight, success) {
                (0, true) => WorkerStatus::Idle,
                (_, false) => WorkerStatus::Error,
                _ => WorkerStatus::Working,
            };
        }
    }

    /// Count a timed-out attempt.
    pub async fn record_timeout(&self, agent_id: &str) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(agent_id) {
            state.metrics.timeouts += 1;
        }
    }

    /// Record that a failed attempt on this agent was rescheduled.
    pub async fn record_retry(&self, agent_id: &str) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(agent_id) {
            state.metrics.retries += 1;
        }
    }

    /// Snapshot of every known agent, ordered by id.
    pub async fn snapshot(&self) -> Vec<AgentState> {
        let states = self.states.read().await;
        states.values().cloned().collect()
    }

    /// State of one agent, if it was ever dispatched to.
    pub async fn get_state(&self, agent_id: &str) -> Option<AgentState> {
        let states = self.states.read().await;
        states.get(agent_id).cloned()
    }

    /// Every dispatch so far, in dispatch order.
    pub async fn dispatch_log(&self) -> Vec<DispatchEvent> {
        self.log.read().await.clone()
    }

    /// Get aggregate metrics across all agents.
    pub async fn aggregate_metrics(&self) -> AgentMetrics {
        let states = self.states.read().await;
        let mut total = AgentMetrics::default();
        for state in states.values() {
            total.dispatched += state.metrics.dispatched;
            total.succeeded += state.metrics.succeeded;
            total.failed += state.metrics.failed;
            total.timeouts += state.metrics.timeouts;
            total.retries += state.metrics.retries;
            total.duration_ms += state.metrics.duration_ms;
        }
        total
    }

    /// Serialize the current state as JSON.
    pub async fn to_json(&self) -> serde_json::Value {
        let states = self.snapshot().await;
        let aggregate = self.aggregate_metrics().await;
        let dispatches = self.dispatch_log().await;
        serde_json::json!({
            "agents": states,
            "aggregate": aggregate,
            "dispatches": dispatches,
        })
    }

    /// Emit a summary of the collected metrics. Called when a plan completes.
    pub async fn flush(&self) {
        let aggregate = self.aggregate_metrics().await;
        for state in self.snapshot().await {
            info!(
                agent = %state.agent_id,
                dispatched = state.metrics.dispatched,
                succeeded = state.metrics.succeeded,
                failed = state.metrics.failed,
                timeouts = state.metrics.timeouts,
                retries = state.metrics.retries,
                duration_ms = state.metrics.duration_ms,
                "Agent metrics"
            );
        }
        info!(
            dispatched = aggregate.dispatched,
            succeeded = aggregate.succeeded,
            failed = aggregate.failed,
            "Monitor flushed"
        );
    }
}

impl Default for AgentMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_initial_state() {
        let monitor = AgentMonitor::new();
        assert!(monitor.snapshot().await.is_empty());
        assert!(monitor.dispatch_log().await.is_empty());
        assert!(monitor.get_state("anyone").await.is_none());
    }

    #[tokio::test]
    async fn test_start_and_finish_task() {
        let monitor = AgentMonitor::new();

        monitor.start_task("summarizer", "t1", 1).await;
        let state = monitor.get_state("summarizer").await.unwrap();
        assert_eq!(state.status, WorkerStatus::Working);
        assert_eq!(state.in_flight, 1);
        assert_eq!(state.metrics.dispatched, 1);

        monitor
            .finish_task("summarizer", true, Duration::from_millis(40))
            .await;
        let state = monitor.get_state("summarizer").await.unwrap();
        assert_eq!(state.status, WorkerStatus::Idle);
        assert_eq!(state.in_flight, 0);
        assert_eq!(state.metrics.succeeded, 1);
        assert_eq!(state.metrics.duration_ms, 40);
    }

    #[tokio::test]
    async fn test_failure_sets_error_status() {
        let monitor = AgentMonitor::new();
        monitor.start_task("flaky", "t1", 1).await;
        monitor.record_timeout("flaky").await;
        monitor
            .finish_task("flaky", false, Duration::from_millis(5))
            .await;
        monitor.record_retry("flaky").await;

        let state = monitor.get_state("flaky").await.unwrap();
        assert_eq!(state.status, WorkerStatus::Error);
        assert_eq!(state.metrics.failed, 1);
        assert_eq!(state.metrics.timeouts, 1);
        assert_eq!(state.metrics.retries, 1);
    }

    #[tokio::test]
    async fn test_unknown_agent_updates_are_ignored() {
        let monitor = AgentMonitor::new();
        monitor
            .finish_task("ghost", true, Duration::from_millis(1))
            .await;
        monitor.record_retry("ghost").await;
        assert!(monitor.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_log_order() {
        let monitor = AgentMonitor::new();
        monitor.start_task("a", "t1", 1).await;
        monitor.start_task("b", "t2", 1).await;
        monitor.start_task("a", "t1", 2).await;

        let log = monitor.dispatch_log().await;
        let entries: Vec<(usize, &str, u32)> = log
            .iter()
            .map(|e| (e.seq, e.task_id.as_str(), e.attempt))
            .collect();
        assert_eq!(entries, vec![(0, "t1", 1), (1, "t2", 1), (2, "t1", 2)]);
    }

    #[tokio::test]
    async fn test_aggregate_metrics() {
        let monitor = AgentMonitor::new();
        monitor.start_task("a", "t1", 1).await;
        monitor.start_task("b", "t2", 1).await;
        monitor.finish_task("a", true, Duration::from_millis(10)).await;
        monitor.finish_task("b", false, Duration::from_millis(20)).await;

        let agg = monitor.aggregate_metrics().await;
        assert_eq!(agg.dispatched, 2);
        assert_eq!(agg.succeeded, 1);
        assert_eq!(agg.failed, 1);
        assert_eq!(agg.duration_ms, 30);
    }

    #[tokio::test]
    async fn test_to_json() {
        let monitor = AgentMonitor::new();
        monitor.start_task("echo", "t1", 1).await;
        let json = monitor.to_json().await;
        assert!(json["agents"].is_array());
        assert!(json["aggregate"].is_object());
        assert_eq!(json["dispatches"][0]["task_id"], "t1");
        monitor.flush().await;
    }
}
