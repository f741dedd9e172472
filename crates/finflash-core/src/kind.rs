//! Task kinds, data shapes and task descriptors

use serde::{Deserialize, Serialize};
use std::borrow::{Borrow, Cow};
use std::collections::BTreeSet;
use std::fmt;

/// Identifier for a category of work
///
/// Kinds order lexicographically by identifier, which is the tie-break used
/// for deterministic ordering inside a wave.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskKind(Cow<'static, str>);

impl TaskKind {
    /// Collect a text article supplied directly by the caller
    pub const COLLECT_TEXT: TaskKind = TaskKind::from_static("collect-text");
    /// Transcribe an audio payload
    pub const COLLECT_AUDIO: TaskKind = TaskKind::from_static("collect-audio");
    /// Search the web for articles matching a query
    pub const COLLECT_SEARCH: TaskKind = TaskKind::from_static("collect-search");
    /// Score market sentiment
    pub const ANALYZE_SENTIMENT: TaskKind = TaskKind::from_static("analyze-sentiment");
    /// Extract companies, people and events
    pub const ANALYZE_ENTITIES: TaskKind = TaskKind::from_static("analyze-entities");
    /// Score investment risk
    pub const ANALYZE_RISK: TaskKind = TaskKind::from_static("analyze-risk");
    /// Synthesize the final summary report
    pub const SYNTHESIZE_SUMMARY: TaskKind = TaskKind::from_static("synthesize-summary");

    /// Create a kind from a static identifier (usable in `const` context)
    pub const fn from_static(id: &'static str) -> Self {
        Self(Cow::Borrowed(id))
    }

    /// Create a kind from an owned identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(Cow::Owned(id.into()))
    }

    /// The identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for TaskKind {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskKind {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TaskKind {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

/// Shape of the data a task consumes or produces
///
/// `Text`, `Audio` and `SearchQuery` are payload shapes: they can only be fed
/// by the caller's request. The other shapes are derived from upstream tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    Text,
    Audio,
    SearchQuery,
    Document,
    Analysis,
    Report,
    Any,
}

impl Shape {
    /// Whether this shape is supplied by a request payload
    pub fn is_payload(self) -> bool {
        matches!(self, Self::Text | Self::Audio | Self::SearchQuery)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::Audio => "audio",
            Self::SearchQuery => "search_query",
            Self::Document => "document",
            Self::Analysis => "analysis",
            Self::Report => "report",
            Self::Any => "any",
        };
        f.write_str(name)
    }
}

/// Declaration of a task kind: its dependencies and capability contract
///
/// # Example
///
/// ```
/// use finflash_core::{Shape, TaskDescriptor, TaskKind};
///
/// let risk = TaskDescriptor::new(TaskKind::ANALYZE_RISK, Shape::Document, Shape::Analysis)
///     .with_dependency(TaskKind::COLLECT_TEXT)
///     .with_rate_limit_key("openai");
///
/// assert!(risk.depends_on.contains(&TaskKind::COLLECT_TEXT));
/// assert_eq!(risk.limit_key(), "openai");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// The kind being declared
    pub kind: TaskKind,

    /// Kinds that must complete before this one may start
    #[serde(default)]
    pub depends_on: BTreeSet<TaskKind>,

    /// Shape of the input the capability requires
    pub input_shape: Shape,

    /// Shape of the value the capability produces
    pub output_shape: Shape,

    /// Rate-limit key of the external dependency (defaults to the kind)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_key: Option<String>,
}

impl TaskDescriptor {
    /// Create a descriptor with no dependencies
    pub fn new(kind: impl Into<TaskKind>, input_shape: Shape, output_shape: Shape) -> Self {
        Self {
            kind: kind.into(),
            depends_on: BTreeSet::new(),
            input_shape,
            output_shape,
            rate_limit_key: None,
        }
    }

    /// Add a single dependency
    pub fn with_dependency(mut self, kind: impl Into<TaskKind>) -> Self {
        self.depends_on.insert(kind.into());
        self
    }

    /// Add several dependencies
    pub fn with_dependencies<I, K>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<TaskKind>,
    {
        self.depends_on.extend(kinds.into_iter().map(Into::into));
        self
    }

    /// Set the rate-limit key
    pub fn with_rate_limit_key(mut self, key: impl Into<String>) -> Self {
        self.rate_limit_key = Some(key.into());
        self
    }

    /// The key this task draws rate-limit permits from
    pub fn limit_key(&self) -> &str {
        self.rate_limit_key
            .as_deref()
            .unwrap_or_else(|| self.kind.as_str())
    }

    /// Whether a request carrying a payload of `payload` shape can feed this task
    pub fn accepts(&self, payload: Shape) -> bool {
        !self.input_shape.is_payload() || self.input_shape == payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_kind_ordering_is_lexicographic() {
        let mut kinds = vec![
            TaskKind::ANALYZE_RISK,
            TaskKind::ANALYZE_ENTITIES,
            TaskKind::ANALYZE_SENTIMENT,
        ];
        kinds.sort();
        assert_eq!(
            kinds,
            vec![
                TaskKind::ANALYZE_ENTITIES,
                TaskKind::ANALYZE_RISK,
                TaskKind::ANALYZE_SENTIMENT,
            ]
        );
    }

    #[test]
    fn test_static_and_owned_kinds_compare_equal() {
        assert_eq!(TaskKind::new("collect-text"), TaskKind::COLLECT_TEXT);

        let mut map = HashMap::new();
        map.insert(TaskKind::new("collect-text"), 1);
        assert_eq!(map.get("collect-text"), Some(&1));
    }

    #[test]
    fn test_kind_serializes_as_string() {
        let json = serde_json::to_string(&TaskKind::ANALYZE_RISK).unwrap();
        assert_eq!(json, "\"analyze-risk\"");

        let kind: TaskKind = serde_json::from_str("\"custom-task\"").unwrap();
        assert_eq!(kind.as_str(), "custom-task");
    }

    #[test]
    fn test_limit_key_defaults_to_kind() {
        let descriptor = TaskDescriptor::new("collect-text", Shape::Text, Shape::Document);
        assert_eq!(descriptor.limit_key(), "collect-text");
    }

    #[test]
    fn test_accepts_payload_shapes() {
        let text = TaskDescriptor::new(TaskKind::COLLECT_TEXT, Shape::Text, Shape::Document);
        let analysis =
            TaskDescriptor::new(TaskKind::ANALYZE_RISK, Shape::Document, Shape::Analysis);

        assert!(text.accepts(Shape::Text));
        assert!(!text.accepts(Shape::Audio));
        assert!(analysis.accepts(Shape::Audio));
        assert!(analysis.accepts(Shape::SearchQuery));
    }

    #[test]
    fn test_descriptor_dependencies() {
        let summary = TaskDescriptor::new(
            TaskKind::SYNTHESIZE_SUMMARY,
            Shape::Analysis,
            Shape::Report,
        )
        .with_dependencies([
            TaskKind::ANALYZE_SENTIMENT,
            TaskKind::ANALYZE_ENTITIES,
            TaskKind::ANALYZE_RISK,
        ]);

        assert_eq!(summary.depends_on.len(), 3);
        assert!(summary.depends_on.contains("analyze-risk"));
    }
}
