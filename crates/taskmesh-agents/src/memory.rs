use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use taskmesh_core::{Agent, AgentDescriptor, TaskRequest, TaskmeshError, TaskmeshResult};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

const DEFAULT_LIMIT: usize = 5;

/// A stored memory event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Embedding id returned by `store_memory`.
    pub id: String,
    /// The stored event.
    pub event: Value,
    /// Caller-supplied metadata.
    #[serde(default)]
    pub metadata: Value,
    /// When the record was stored.
    pub stored_at: DateTime<Utc>,
}

/// Keeps task events in process memory for later tasks to look up.
///
/// Handles `store_memory`, `retrieve_memory` and `summarize_history`.
/// Records do not outlive the agent.
pub struct MemoryAgent {
    records: RwLock<Vec<MemoryRecord>>,
}

impl MemoryAgent {
    /// Create the agent.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }

    /// Registration defaults for this agent.
    pub fn default_descriptor() -> AgentDescriptor {
        AgentDescriptor::new(
            "memory",
            ["store_memory", "retrieve_memory", "summarize_history"],
        )
        .with_description("Stores task events and retrieves them for later tasks.")
        .with_input_schema(json!({
            "type": "object",
            "properties": {
                "event": {},
                "metadata": {"type": "object"},
                "embedding_id": {"type": "string"},
                "query": {"type": "string"},
                "limit": {"type": "integer", "minimum": 1}
            }
        }))
        .with_concurrency(4)
        .with_tags(["memory"])
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether nothing has been stored.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    async fn store(&self, payload: &Value) -> TaskmeshResult<Value> {
        let event = payload
            .get("event")
            .cloned()
            .ok_or_else(|| TaskmeshError::Agent("store_memory requires an 'event'".into()))?;
        let record = MemoryRecord {
            id: Uuid::new_v4().to_string(),
            event,
            metadata: payload.get("metadata").cloned().unwrap_or_else(|| json!({})),
            stored_at: Utc::now(),
        };
        info!(embedding_id = %record.id, "Stored memory record");
        let out = json!({"embedding_id": record.id, "record": record});
        self.records.write().await.push(record);
        Ok(out)
    }

    async fn retrieve(&self, payload: &Value) -> TaskmeshResult<Value> {
        let records = self.records.read().await;

        if let Some(id) = payload.get("embedding_id").and_then(Value::as_str) {
            let found: Vec<&MemoryRecord> = records.iter().filter(|r| r.id == id).collect();
            return Ok(json!({"records": found}));
        }

        let query = payload
            .get("query")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_lowercase();
        let found: Vec<&MemoryRecord> = records
            .iter()
            .rev()
            .filter(|r| query.is_empty() || r.event.to_string().to_lowercase().contains(&query))
            .take(limit(payload))
            .collect();
        Ok(json!({"records": found}))
    }

    async fn summarize(&self, payload: &Value) -> TaskmeshResult<Value> {
        let records = self.records.read().await;
        let recent: Vec<&Value> = records
            .iter()
            .rev()
            .take(limit(payload))
            .map(|r| &r.event)
            .collect();
        Ok(json!({"count": records.len(), "recent": recent}))
    }
}

impl Default for MemoryAgent {
    fn default() -> Self {
        Self::new()
    }
}

fn limit(payload: &Value) -> usize {
    payload
        .get("limit")
        .and_then(Value::as_u64)
        .map_or(DEFAULT_LIMIT, |n| n as usize)
}

#[async_trait]
impl Agent for MemoryAgent {
    async fn execute(&self, request: TaskRequest, _cancel: CancellationToken) -> TaskmeshResult<Value> {
        match request.task_type.as_str() {
            "store_memory" => self.store(&request.payload).await,
            "retrieve_memory" => self.retrieve(&request.payload).await,
            "summarize_history" => self.summarize(&request.payload).await,
            other => Err(TaskmeshError::Agent(format!(
                "memory agent cannot handle task type '{other}'"
            ))),
        }
    }
}
