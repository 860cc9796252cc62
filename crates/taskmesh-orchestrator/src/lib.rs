//! Capability-matched task orchestration for Taskmesh.
//!
//! A plan (a list of typed task definitions) is validated into a dependency
//! graph, each ready task is matched against a registry of agents by declared
//! capability and payload schema, and dispatched with bounded concurrency.
//! Failures are retried per the chosen agent's policy; exhausted tasks cancel
//! every transitive dependent.
//!
//! # Main types
//!
//! - [`Orchestrator`] — Validates a plan, runs it and returns a [`PlanResult`].
//! - [`CapabilityRegistry`] — Registered agents, ranked by capability and schema.
//! - [`TaskGraph`] / [`PlanValidator`] — Dependency graph and its static checks.
//! - [`Scheduler`] — The dispatch loop with retries, timeouts and cancellation.
//! - [`AgentMonitor`] — Per-agent metrics and the ordered dispatch log.

/// Orchestration façade: validate, schedule, collect.
pub mod engine;
/// Agent load, metrics and dispatch log.
pub mod monitor;
/// Agent registration and candidate matching.
pub mod registry;
/// Plan outcome types.
pub mod result;
/// Dispatch loop.
pub mod scheduler;
/// Dependency graph and task state transitions.
pub mod task_graph;
/// Shared runtime types (Task, DispatchRecord, AgentState, etc.).
pub mod types;
/// Static plan validation.
pub mod validator;

pub use engine::Orchestrator;
pub use monitor::AgentMonitor;
pub use registry::{Candidate, CandidateMatch, CapabilityRegistry, PayloadRejection};
pub use result::{PlanResult, PlanStatus, TaskOutcome};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use task_graph::TaskGraph;
pub use types::{AgentMetrics, AgentState, DispatchEvent, DispatchRecord, Task, WorkerStatus};
pub use validator::{PlanValidator, PlanWarning};
