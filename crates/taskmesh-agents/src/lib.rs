//! Built-in agents for the Taskmesh framework.
//!
//! Provides small, deterministic agents covering echo, document retrieval,
//! summarization and in-process memory. They are useful for local runs and
//! as reference implementations of the [`Agent`] port.
//!
//! # Main entry points
//!
//! - [`register_builtins()`] — Register every built-in agent with its default descriptor.
//! - [`BuiltinKind`] — Selects a built-in implementation by name (used by config files).

/// Echo agent.
pub mod echo;
/// In-process memory agent.
pub mod memory;
/// Document retrieval stub.
pub mod research;
/// Extractive summarizer.
pub mod summarizer;

pub use echo::EchoAgent;
pub use memory::{MemoryAgent, MemoryRecord};
pub use research::ResearchAgent;
pub use summarizer::SummarizerAgent;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use taskmesh_core::{Agent, AgentDescriptor, TaskmeshResult};
use taskmesh_orchestrator::CapabilityRegistry;

/// Names of the built-in agent implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuiltinKind {
    /// [`EchoAgent`]
    Echo,
    /// [`ResearchAgent`]
    Research,
    /// [`SummarizerAgent`]
    Summarizer,
    /// [`MemoryAgent`]
    Memory,
}

impl BuiltinKind {
    /// Every kind, in registration order.
    pub const ALL: [BuiltinKind; 4] = [
        BuiltinKind::Echo,
        BuiltinKind::Research,
        BuiltinKind::Summarizer,
        BuiltinKind::Memory,
    ];

    /// A fresh instance of this implementation.
    pub fn build(self) -> Arc<dyn Agent> {
        match self {
            BuiltinKind::Echo => Arc::new(EchoAgent::new()),
            BuiltinKind::Research => Arc::new(ResearchAgent::new()),
            BuiltinKind::Summarizer => Arc::new(SummarizerAgent::new()),
            BuiltinKind::Memory => Arc::new(MemoryAgent::new()),
        }
    }

    /// Descriptor used when no configuration overrides it.
    pub fn default_descriptor(self) -> AgentDescriptor {
        match self {
            BuiltinKind::Echo => EchoAgent::default_descriptor(),
            BuiltinKind::Research => ResearchAgent::default_descriptor(),
            BuiltinKind::Summarizer => SummarizerAgent::default_descriptor(),
            BuiltinKind::Memory => MemoryAgent::default_descriptor(),
        }
    }
}

impl std::fmt::Display for BuiltinKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuiltinKind::Echo => write!(f, "echo"),
            BuiltinKind::Research => write!(f, "research"),
            BuiltinKind::Summarizer => write!(f, "summarizer"),
            BuiltinKind::Memory => write!(f, "memory"),
        }
    }
}

/// Register every built-in agent under its default descriptor.
pub fn register_builtins(registry: &CapabilityRegistry) -> TaskmeshResult<()> {
    for kind in BuiltinKind::ALL {
        registry.register(kind.default_descriptor(), kind.build())?;
    }
    Ok(())
}
