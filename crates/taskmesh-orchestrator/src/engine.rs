use crate::monitor::AgentMonitor;
use crate::registry::CapabilityRegistry;
use crate::result::PlanResult;
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::task_graph::TaskGraph;
use crate::validator::{PlanValidator, PlanWarning};
use std::sync::Arc;
use taskmesh_core::{TaskDefinition, TaskmeshResult};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The orchestration engine.
/// Implements the validate → schedule → collect pattern over a shared registry.
pub struct Orchestrator {
    registry: Arc<CapabilityRegistry>,
    monitor: Arc<AgentMonitor>,
    config: SchedulerConfig,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Create an orchestrator with a fresh monitor.
    pub fn new(registry: Arc<CapabilityRegistry>, config: SchedulerConfig) -> Self {
        Self::with_monitor(registry, Arc::new(AgentMonitor::new()), config)
    }

    /// Create with an externally owned monitor.
    pub fn with_monitor(
        registry: Arc<CapabilityRegistry>,
        monitor: Arc<AgentMonitor>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            registry,
            monitor,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// The shared capability registry.
    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// Metrics and dispatch log for every run.
    pub fn monitor(&self) -> &Arc<AgentMonitor> {
        &self.monitor
    }

    /// Scheduler limits applied to each run.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Token that cancels every plan started by this orchestrator.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel every running plan. Plans started afterwards are cancelled at once.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Build and check a plan without running it.
    ///
    /// Structural defects are errors; capability findings are returned as
    /// advisory warnings.
    pub fn validate(&self, defs: Vec<TaskDefinition>) -> TaskmeshResult<(TaskGraph, Vec<PlanWarning>)> {
        let graph = TaskGraph::build(defs)?;
        let warnings = PlanValidator::check_capabilities(&graph, &self.registry);
        Ok((graph, warnings))
    }

    /// Validate and run a plan to completion.
    pub async fn run(&self, defs: Vec<TaskDefinition>) -> TaskmeshResult<PlanResult> {
        self.run_with_cancel(defs, self.cancel.child_token()).await
    }

    /// Like [`run`](Self::run), but cancelled only through `cancel`.
    pub async fn run_with_cancel(
        &self,
        defs: Vec<TaskDefinition>,
        cancel: CancellationToken,
    ) -> TaskmeshResult<PlanResult> {
        let (graph, warnings) = self.validate(defs)?;
        for warning in &warnings {
            warn!(warning = %warning, "Plan capability warning");
        }

        info!(
            tasks = graph.len(),
            agents = self.registry.len(),
            "Orchestrator: plan validated"
        );

        let scheduler = Scheduler::new(
            Arc::new(RwLock::new(graph)),
            self.registry.clone(),
            self.monitor.clone(),
            self.config.clone(),
        );
        let result = scheduler.run(cancel).await;

        info!(summary = %result.summary(), "Orchestrator: plan complete");
        Ok(result)
    }
}
