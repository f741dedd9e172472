//! Per-invocation context handed to capabilities
//!
//! The `TaskContext` tells a capability which run and attempt it is serving.
//! It lives outside the task input, so it never affects
//! cache fingerprints.

use crate::kind::TaskKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Well-known metadata keys
pub mod keys {
    /// Title of the article being analyzed
    pub const TITLE: &str = "title";
    /// Language preference (e.g., "en", "zh")
    pub const LANGUAGE: &str = "language";
}

/// Context passed to a capability on each attempt
///
/// # Example
///
/// ```
/// use finflash_core::{TaskContext, TaskKind};
/// use uuid::Uuid;
///
/// let ctx = TaskContext::new(Uuid::new_v4(), TaskKind::ANALYZE_RISK, "newswire")
///     .with_metadata("language", serde_json::json!("en"));
///
/// assert_eq!(ctx.attempt, 1);
/// assert_eq!(ctx.language(), Some("en"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskContext {
    pub run_id: Uuid,
    pub task: TaskKind,
    pub source: String,
    /// 1-based attempt number
    pub attempt: u32,
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
}

impl TaskContext {
    /// Create a context for the first attempt of a task
    pub fn new(run_id: Uuid, task: TaskKind, source: impl Into<String>) -> Self {
        Self {
            run_id,
            task,
            source: source.into(),
            attempt: 1,
            metadata: HashMap::new(),
        }
    }

    /// Add a metadata value
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Copy of this context for the given attempt
    pub fn for_attempt(&self, attempt: u32) -> Self {
        Self {
            attempt,
            ..self.clone()
        }
    }

    /// Get a metadata value
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.get(key)
    }

    pub fn title(&self) -> Option<&str> {
        self.get(keys::TITLE).and_then(|v| v.as_str())
    }

    pub fn language(&self) -> Option<&str> {
        self.get(keys::LANGUAGE).and_then(|v| v.as_str())
    }
}
