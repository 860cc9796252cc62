use async_trait::async_trait;
use serde_json::{json, Map, Value};
use taskmesh_core::{Agent, AgentDescriptor, TaskRequest, TaskmeshError, TaskmeshResult};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Document retrieval stub.
///
/// With `mode = "documents"` the supplied documents are normalized to
/// `id`/`title`/`text`/`source`; otherwise a single simulated result is
/// returned for `query`.
pub struct ResearchAgent;

impl ResearchAgent {
    /// Create the agent.
    pub fn new() -> Self {
        Self
    }

    /// Registration defaults for this agent.
    pub fn default_descriptor() -> AgentDescriptor {
        AgentDescriptor::new(
            "research",
            ["retrieve_documents", "cite_sources", "metadata_extraction"],
        )
        .with_description("Retrieves relevant documents and returns them with metadata.")
        .with_input_schema(json!({
            "type": "object",
            "properties": {
                "mode": {"type": "string", "enum": ["documents", "query"]},
                "query": {"type": "string"},
                "documents": {"type": "array", "items": {"type": "object"}},
                "max_results": {"type": "integer", "minimum": 1}
            },
            "anyOf": [
                {"required": ["documents"]},
                {"required": ["query"]}
            ]
        }))
        .with_output_schema(json!({
            "type": "object",
            "required": ["documents"],
            "properties": {
                "documents": {"type": "array"},
                "metadata": {"type": "object"}
            }
        }))
        .with_priority(60)
        .with_tags(["research"])
    }

    fn normalize(docs: &[Value]) -> Vec<Value> {
        docs.iter()
            .enumerate()
            .map(|(i, doc)| {
                let fallback = format!("doc-{i}");
                let id = doc.get("id").and_then(Value::as_str).unwrap_or(&fallback);
                let title = doc.get("title").and_then(Value::as_str).unwrap_or(id);
                json!({
                    "id": id,
                    "title": title,
                    "text": doc.get("text").and_then(Value::as_str).unwrap_or_default(),
                    "source": doc.get("source").cloned().unwrap_or(Value::Null),
                })
            })
            .collect()
    }
}

impl Default for ResearchAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for ResearchAgent {
    async fn execute(&self, request: TaskRequest, _cancel: CancellationToken) -> TaskmeshResult<Value> {
        let payload = request
            .payload
            .as_object()
            .cloned()
            .unwrap_or_else(Map::new);

        if payload.get("mode").and_then(Value::as_str) == Some("documents") {
            let docs = payload
                .get("documents")
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    TaskmeshError::Agent("documents mode requires a 'documents' array".into())
                })?;
            debug!(task_id = %request.task_id, count = docs.len(), "Normalizing provided documents");
            return Ok(json!({
                "documents": Self::normalize(docs),
                "metadata": {"retrieval_mode": "provided"},
            }));
        }

        let query = payload
            .get("query")
            .and_then(Value::as_str)
            .unwrap_or_default();
        debug!(task_id = %request.task_id, query, "Simulating retrieval");
        Ok(json!({
            "documents": [{
                "id": "sim-1",
                "title": format!("Result for: {query}"),
                "text": format!("Simulated content for query '{query}'"),
                "source": "simulator",
            }],
            "metadata": {"query": query},
        }))
    }
}
