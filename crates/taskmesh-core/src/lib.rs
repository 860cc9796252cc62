//! Core types and error definitions for the Taskmesh framework.
//!
//! This crate provides the foundational types shared across all Taskmesh crates:
//! error handling, plan/task definitions, agent descriptors, and the agent
//! execution port every worker implements.
//!
//! # Main types
//!
//! - [`TaskmeshError`] — Unified error enum for all Taskmesh subsystems.
//! - [`TaskmeshResult`] — Convenience alias for `Result<T, TaskmeshError>`.
//! - [`ValidationError`] — Plan-build failures reported before any dispatch.
//! - [`TaskDefinition`] — A single entry of a submitted plan.
//! - [`TaskState`] / [`TaskError`] — Runtime lifecycle and per-task failures.
//! - [`Agent`] — The execution port implemented by every worker agent.
//! - [`AgentDescriptor`] / [`RetryPolicy`] — Agent registration document.

/// Agent execution port and registration descriptors.
pub mod agent;
/// Task definitions, lifecycle states and per-task errors.
pub mod task;

pub use agent::{Agent, AgentDescriptor, Backoff, RetryPolicy, TaskRequest};
pub use task::{TaskDefinition, TaskError, TaskState};

// --- Error types ---

/// Top-level error type for the Taskmesh framework.
///
/// Each variant corresponds to a subsystem that can produce errors.
#[derive(Debug, thiserror::Error)]
pub enum TaskmeshError {
    /// The submitted plan failed static validation.
    #[error("Plan validation error: {0}")]
    Validation(#[from] ValidationError),

    /// An agent with the same identifier is already registered.
    #[error("Agent '{0}' is already registered")]
    DuplicateAgent(String),

    /// No agent with the given identifier is registered.
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    /// An agent descriptor was rejected at registration time.
    #[error("Registry error: {0}")]
    Registry(String),

    /// An error raised by an agent while executing a task.
    #[error("Agent error: {0}")]
    Agent(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error from the orchestration engine itself.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`TaskmeshError`].
pub type TaskmeshResult<T> = Result<T, TaskmeshError>;

/// Static plan defects, detected while building the task graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Two definitions share the same task id.
    #[error("duplicate task id '{id}'")]
    DuplicateTaskId {
        /// The repeated id.
        id: String,
    },

    /// A task depends on an id that is not part of the plan.
    #[error("task '{task}' depends on unknown task '{missing}'")]
    DanglingDependency {
        /// The task declaring the dependency.
        task: String,
        /// The id that could not be resolved.
        missing: String,
    },

    /// The dependency relation contains a cycle.
    #[error("dependency cycle detected involving task '{task}'")]
    CyclicDependency {
        /// One member of the detected cycle.
        task: String,
    },

    /// A definition is structurally unusable (empty id or task type).
    #[error("invalid task '{id}': {reason}")]
    InvalidTask {
        /// The offending id (may be empty).
        id: String,
        /// What is wrong with it.
        reason: String,
    },
}
