//! Collection without external calls

use async_trait::async_trait;
use finflash_core::{Capability, CapabilityError, Payload, TaskContext};
use serde_json::{Value, json};

/// Turns the request payload into a document as-is
///
/// A text payload becomes a document holding its content. Audio and search
/// payloads become references the caller can resolve later. Tasks fed only
/// by upstream results get a summary of what they received.
pub struct PassthroughCapability {
    name: String,
}

impl PassthroughCapability {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Capability for PassthroughCapability {
    async fn invoke(&self, input: Value, ctx: &TaskContext) -> Result<Value, CapabilityError> {
        let upstream: Vec<&str> = input
            .get("upstream")
            .and_then(Value::as_object)
            .map(|map| map.keys().map(String::as_str).collect())
            .unwrap_or_default();

        let Some(raw) = input.get("payload") else {
            return Ok(json!({
                "task": ctx.task.as_str(),
                "upstream": upstream,
            }));
        };

        let payload: Payload = serde_json::from_value(raw.clone())
            .map_err(|e| CapabilityError::fatal(format!("unreadable payload: {e}")))?;

        let document = match payload {
            Payload::Text { content, title } => json!({
                "title": title.or_else(|| ctx.title().map(str::to_string)),
                "content": content,
                "word_count": content.split_whitespace().count(),
                "source": ctx.source,
            }),
            Payload::Audio { path, format } => json!({
                "audio_path": path,
                "format": format,
                "content": Value::Null,
                "source": ctx.source,
            }),
            Payload::Search { query, num_results, days_back } => json!({
                "query": query,
                "num_results": num_results,
                "days_back": days_back,
                "documents": [],
                "source": ctx.source,
            }),
        };
        Ok(document)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finflash_core::TaskKind;
    use uuid::Uuid;

    fn ctx() -> TaskContext {
        TaskContext::new(Uuid::new_v4(), TaskKind::COLLECT_TEXT, "newswire")
    }

    #[tokio::test]
    async fn test_text_payload_becomes_document() {
        let capability = PassthroughCapability::new("collect-text");
        let input = json!({
            "payload": {"kind": "text", "content": "X reports record earnings", "title": "Q3"},
            "upstream": {},
        });

        let doc = capability.invoke(input, &ctx()).await.unwrap();
        assert_eq!(doc["content"], "X reports record earnings");
        assert_eq!(doc["title"], "Q3");
        assert_eq!(doc["word_count"], 4);
        assert_eq!(doc["source"], "newswire");
    }

    #[tokio::test]
    async fn test_upstream_only_input() {
        let capability = PassthroughCapability::new("synthesize-summary");
        let input = json!({"upstream": {"analyze-risk": {"score": 3}}});

        let value = capability.invoke(input, &ctx()).await.unwrap();
        assert_eq!(value["upstream"], json!(["analyze-risk"]));
    }

    #[tokio::test]
    async fn test_bad_payload_is_fatal() {
        let capability = PassthroughCapability::new("collect-text");
        let err = capability
            .invoke(json!({"payload": {"kind": "video"}}), &ctx())
            .await
            .unwrap_err();
        assert!(!err.retryable);
    }
}
