use async_trait::async_trait;
use serde_json::{json, Value};
use taskmesh_core::{Agent, AgentDescriptor, TaskRequest, TaskmeshError, TaskmeshResult};
use tokio_util::sync::CancellationToken;

const SUMMARY_LIMIT: usize = 800;
const HIGHLIGHT_LIMIT: usize = 200;
const MAX_HIGHLIGHTS: usize = 3;

/// Extractive summarizer over a `documents` array.
pub struct SummarizerAgent;

impl SummarizerAgent {
    /// Create the agent.
    pub fn new() -> Self {
        Self
    }

    /// Registration defaults for this agent.
    pub fn default_descriptor() -> AgentDescriptor {
        AgentDescriptor::new(
            "summarizer",
            ["summarize_text", "extract_keypoints", "shorten_content"],
        )
        .with_description("Condenses documents into a summary with highlights and sources.")
        .with_input_schema(json!({
            "type": "object",
            "required": ["documents"],
            "properties": {
                "documents": {"type": "array", "items": {"type": "object"}},
                "summary_length": {"type": "string"}
            }
        }))
        .with_output_schema(json!({
            "type": "object",
            "required": ["summary"],
            "properties": {
                "summary": {"type": "string"},
                "highlights": {"type": "array", "items": {"type": "string"}},
                "sources": {"type": "array"}
            }
        }))
        .with_concurrency(2)
        .with_tags(["summarization"])
    }
}

impl Default for SummarizerAgent {
    fn default() -> Self {
        Self::new()
    }
}

fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn doc_text(doc: &Value) -> &str {
    doc.get("text").and_then(Value::as_str).unwrap_or_default()
}

#[async_trait]
impl Agent for SummarizerAgent {
    async fn execute(&self, request: TaskRequest, _cancel: CancellationToken) -> TaskmeshResult<Value> {
        let documents = request
            .payload
            .get("documents")
            .and_then(Value::as_array)
            .ok_or_else(|| TaskmeshError::Agent("payload requires a 'documents' array".into()))?;

        let combined = documents
            .iter()
            .map(doc_text)
            .collect::<Vec<_>>()
            .join("\n\n");
        let summary = if combined.chars().count() > SUMMARY_LIMIT {
            format!("{}...", truncate_chars(&combined, SUMMARY_LIMIT))
        } else {
            combined
        };

        let highlights: Vec<&str> = documents
            .iter()
            .take(MAX_HIGHLIGHTS)
            .map(|d| truncate_chars(doc_text(d), HIGHLIGHT_LIMIT))
            .collect();
        let sources: Vec<Value> = documents
            .iter()
            .map(|d| {
                json!({
                    "id": d.get("id").cloned().unwrap_or(Value::Null),
                    "title": d.get("title").cloned().unwrap_or(Value::Null),
                })
            })
            .collect();

        Ok(json!({
            "summary": summary,
            "highlights": highlights,
            "sources": sources,
        }))
    }
}
