use jsonschema::{validator_for, Validator};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use taskmesh_core::{Agent, AgentDescriptor, TaskmeshError, TaskmeshResult};
use tracing::{debug, info};

struct RegisteredAgent {
    descriptor: Arc<AgentDescriptor>,
    agent: Arc<dyn Agent>,
    input: Option<Validator>,
    output: Option<Arc<Validator>>,
    /// Registration slot; breaks priority ties.
    seq: u64,
}

impl RegisteredAgent {
    fn compile(
        descriptor: AgentDescriptor,
        agent: Arc<dyn Agent>,
        seq: u64,
    ) -> TaskmeshResult<Self> {
        descriptor.validate()?;
        let input = compile_schema(&descriptor.id, "input", descriptor.input_schema.as_ref())?;
        let output =
            compile_schema(&descriptor.id, "output", descriptor.output_schema.as_ref())?.map(Arc::new);
        Ok(Self {
            descriptor: Arc::new(descriptor),
            agent,
            input,
            output,
            seq,
        })
    }

    fn accepts(&self, payload: &Value) -> Result<(), String> {
        first_schema_error(self.input.as_ref(), payload)
    }
}

fn compile_schema(
    agent_id: &str,
    which: &str,
    schema: Option<&Value>,
) -> TaskmeshResult<Option<Validator>> {
    schema
        .map(|s| {
            validator_for(s).map_err(|e| {
                TaskmeshError::Registry(format!("agent '{agent_id}' has an invalid {which} schema: {e}"))
            })
        })
        .transpose()
}

/// First error `validator` reports for `value`; `Ok` when there is no schema.
pub(crate) fn first_schema_error(validator: Option<&Validator>, value: &Value) -> Result<(), String> {
    let Some(validator) = validator else {
        return Ok(());
    };
    match validator.iter_errors(value).next() {
        Some(err) => Err(err.to_string()),
        None => Ok(()),
    }
}

#[derive(Default)]
struct RegistryTable {
    agents: HashMap<String, RegisteredAgent>,
    next_seq: u64,
}

/// An agent selected as able to run a task, captured with everything the
/// scheduler needs for one dispatch.
#[derive(Clone)]
pub struct Candidate {
    /// Descriptor the agent was registered with.
    pub descriptor: Arc<AgentDescriptor>,
    /// The implementation to invoke.
    pub agent: Arc<dyn Agent>,
    /// Compiled output schema, if the descriptor declares one.
    pub output_schema: Option<Arc<Validator>>,
}

impl Candidate {
    /// The agent id.
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    /// Check a result against the output schema this candidate was matched with.
    pub fn check_output(&self, result: &Value) -> Result<(), String> {
        first_schema_error(self.output_schema.as_deref(), result)
    }
}

impl std::fmt::Debug for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Candidate")
            .field("id", &self.descriptor.id)
            .finish_non_exhaustive()
    }
}

/// A capable agent whose input schema rejected the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadRejection {
    /// The rejecting agent.
    pub agent_id: String,
    /// First schema error reported for the payload.
    pub reason: String,
}

/// Outcome of matching one task against the registry.
#[derive(Debug, Default)]
pub struct CandidateMatch {
    /// Payload-valid capable agents, best first.
    pub candidates: Vec<Candidate>,
    /// Capable agents that rejected the payload.
    pub rejections: Vec<PayloadRejection>,
}

impl CandidateMatch {
    /// Human-readable reason for an empty candidate list.
    pub fn rejection_summary(&self) -> String {
        if self.rejections.is_empty() {
            return "no registered agent declares this capability".to_string();
        }
        let parts: Vec<String> = self
            .rejections
            .iter()
            .map(|r| format!("{} ({})", r.agent_id, r.reason))
            .collect();
        format!("payload rejected by every capable agent: {}", parts.join("; "))
    }
}

/// Central registry of available agents and their declared capabilities.
///
/// The table is guarded, so agents can be added or removed while plans run;
/// every lookup returns a snapshot.
pub struct CapabilityRegistry {
    inner: RwLock<RegistryTable>,
}

impl CapabilityRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryTable::default()),
        }
    }

    /// Register a new agent. Fails if the id is taken or the descriptor is invalid.
    pub fn register(&self, descriptor: AgentDescriptor, agent: Arc<dyn Agent>) -> TaskmeshResult<()> {
        let mut table = self.inner.write();
        if table.agents.contains_key(&descriptor.id) {
            return Err(TaskmeshError::DuplicateAgent(descriptor.id));
        }
        let seq = table.next_seq;
        let entry = RegisteredAgent::compile(descriptor, agent, seq)?;
        table.next_seq += 1;
        info!(
            agent = %entry.descriptor.id,
            capabilities = ?entry.descriptor.capabilities,
            "Registered agent"
        );
        table.agents.insert(entry.descriptor.id.clone(), entry);
        Ok(())
    }

    /// Register or replace an agent. A replaced agent keeps its registration slot.
    pub fn replace(&self, descriptor: AgentDescriptor, agent: Arc<dyn Agent>) -> TaskmeshResult<()> {
        let mut table = self.inner.write();
        let seq = match table.agents.get(&descriptor.id) {
            Some(existing) => existing.seq,
            None => {
                let seq = table.next_seq;
                table.next_seq += 1;
                seq
            }
        };
        let entry = RegisteredAgent::compile(descriptor, agent, seq)?;
        info!(agent = %entry.descriptor.id, "Replaced agent registration");
        table.agents.insert(entry.descriptor.id.clone(), entry);
        Ok(())
    }

    /// Remove an agent. In-flight dispatches on it run to completion.
    pub fn unregister(&self, agent_id: &str) -> TaskmeshResult<AgentDescriptor> {
        let mut table = self.inner.write();
        let entry = table
            .agents
            .remove(agent_id)
            .ok_or_else(|| TaskmeshError::UnknownAgent(agent_id.to_string()))?;
        info!(agent = %agent_id, "Unregistered agent");
        Ok(entry.descriptor.as_ref().clone())
    }

    /// Ids of agents declaring `task_type`, best first, ignoring payload schemas.
    pub fn capable_agents(&self, task_type: &str) -> Vec<String> {
        let table = self.inner.read();
        ranked(&table, task_type)
            .into_iter()
            .map(|e| e.descriptor.id.clone())
            .collect()
    }

    /// Ids of agents that can take `task_type` and accept `payload`.
    ///
    /// Ordered by descriptor priority (highest first), then registration order.
    pub fn find_candidates(&self, task_type: &str, payload: &Value) -> Vec<String> {
        self.match_task(task_type, payload, None)
            .candidates
            .iter()
            .map(|c| c.id().to_string())
            .collect()
    }

    /// Full candidate match, including payload rejections.
    ///
    /// A `preferred` agent that is registered, capable and accepts the payload
    /// is moved to the front regardless of ranking.
    pub fn match_task(&self, task_type: &str, payload: &Value, preferred: Option<&str>) -> CandidateMatch {
        let table = self.inner.read();
        let mut result = CandidateMatch::default();

        for entry in ranked(&table, task_type) {
            match entry.accepts(payload) {
                Ok(()) => result.candidates.push(Candidate {
                    descriptor: entry.descriptor.clone(),
                    agent: entry.agent.clone(),
                    output_schema: entry.output.clone(),
                }),
                Err(reason) => {
                    debug!(
                        agent = %entry.descriptor.id,
                        task_type,
                        reason = %reason,
                        "Agent rejected payload"
                    );
                    result.rejections.push(PayloadRejection {
                        agent_id: entry.descriptor.id.clone(),
                        reason,
                    });
                }
            }
        }

        if let Some(preferred) = preferred {
            if let Some(pos) = result.candidates.iter().position(|c| c.id() == preferred) {
                let hinted = result.candidates.remove(pos);
                result.candidates.insert(0, hinted);
            } else {
                debug!(agent = %preferred, task_type, "Preferred agent not usable, ranking normally");
            }
        }

        result
    }

    /// Whether `result` satisfies the agent's output schema (true if it has none).
    pub fn validate_output(&self, agent_id: &str, result: &Value) -> bool {
        self.check_output(agent_id, result).is_ok()
    }

    /// Like [`validate_output`](Self::validate_output) but returns the first schema error.
    pub fn check_output(&self, agent_id: &str, result: &Value) -> Result<(), String> {
        let table = self.inner.read();
        let entry = table
            .agents
            .get(agent_id)
            .ok_or_else(|| format!("agent '{agent_id}' is no longer registered"))?;
        first_schema_error(entry.output.as_deref(), result)
    }

    /// Descriptor of a registered agent.
    pub fn descriptor(&self, agent_id: &str) -> Option<Arc<AgentDescriptor>> {
        self.inner.read().agents.get(agent_id).map(|e| e.descriptor.clone())
    }

    /// Implementation of a registered agent.
    pub fn agent(&self, agent_id: &str) -> Option<Arc<dyn Agent>> {
        self.inner.read().agents.get(agent_id).map(|e| e.agent.clone())
    }

    /// All descriptors in registration order.
    pub fn descriptors(&self) -> Vec<Arc<AgentDescriptor>> {
        let table = self.inner.read();
        let mut entries: Vec<&RegisteredAgent> = table.agents.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.descriptor.clone()).collect()
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.inner.read().agents.len()
    }

    /// Whether no agent is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn ranked<'a>(table: &'a RegistryTable, task_type: &str) -> Vec<&'a RegisteredAgent> {
    let mut capable: Vec<&RegisteredAgent> = table
        .agents
        .values()
        .filter(|e| e.descriptor.can_handle(task_type))
        .collect();
    capable.sort_by_key(|e| (std::cmp::Reverse(e.descriptor.priority), e.seq));
    capable
}
