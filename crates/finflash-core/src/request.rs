//! Run requests submitted by callers

use crate::kind::{Shape, TaskKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// The unit of news a run processes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    /// Raw article text
    Text {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    /// Audio recording to transcribe
    Audio {
        path: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        format: Option<String>,
    },
    /// Search query for recent news
    Search {
        query: String,
        #[serde(default = "default_num_results")]
        num_results: u32,
        #[serde(default = "default_days_back")]
        days_back: u32,
    },
}

fn default_num_results() -> u32 {
    10
}

fn default_days_back() -> u32 {
    7
}

impl Payload {
    /// The payload shape a collection task must accept to consume this payload
    pub fn shape(&self) -> Shape {
        match self {
            Self::Text { .. } => Shape::Text,
            Self::Audio { .. } => Shape::Audio,
            Self::Search { .. } => Shape::SearchQuery,
        }
    }

    /// Copy of the payload with whitespace collapsed in every free-text field
    ///
    /// Two payloads that differ only in spacing normalize to the same value,
    /// so they share cache fingerprints.
    pub fn normalized(&self) -> Self {
        match self {
            Self::Text { content, title } => Self::Text {
                content: collapse_whitespace(content),
                title: title.as_deref().map(collapse_whitespace),
            },
            Self::Audio { path, format } => Self::Audio {
                path: path.clone(),
                format: format.as_deref().map(|f| f.trim().to_ascii_lowercase()),
            },
            Self::Search {
                query,
                num_results,
                days_back,
            } => Self::Search {
                query: collapse_whitespace(query),
                num_results: *num_results,
                days_back: *days_back,
            },
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// How the tasks of a wave are dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// One task at a time in deterministic order
    Sequential,
    /// Every task of a wave at once
    #[default]
    Parallel,
    /// Concurrent only for large waves with spare budget
    Adaptive,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::Adaptive => "adaptive",
        };
        f.write_str(name)
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            "adaptive" => Ok(Self::Adaptive),
            other => Err(format!(
                "unknown execution mode '{other}' (expected sequential, parallel or adaptive)"
            )),
        }
    }
}

/// A request to analyze one unit of news
///
/// # Example
///
/// ```
/// use finflash_core::{ExecutionMode, RunRequest};
///
/// let request = RunRequest::text("X reports record earnings")
///     .with_source("newswire")
///     .with_mode(ExecutionMode::Parallel);
///
/// assert_eq!(request.source, "newswire");
/// assert!(request.tasks.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    /// The news to analyze
    pub payload: Payload,

    /// Free-form label of where the news came from
    #[serde(default = "default_source")]
    pub source: String,

    /// Requested execution mode
    #[serde(default)]
    pub mode: ExecutionMode,

    /// Requested task subset (`None` runs every task the payload can feed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks: Option<BTreeSet<TaskKind>>,
}

fn default_source() -> String {
    "direct-input".to_string()
}

impl RunRequest {
    /// Create a request for an arbitrary payload
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            source: default_source(),
            mode: ExecutionMode::default(),
            tasks: None,
        }
    }

    /// Create a raw-text request
    pub fn text(content: impl Into<String>) -> Self {
        Self::new(Payload::Text {
            content: content.into(),
            title: None,
        })
    }

    /// Create an audio request
    pub fn audio(path: impl Into<PathBuf>) -> Self {
        Self::new(Payload::Audio {
            path: path.into(),
            format: None,
        })
    }

    /// Create a search request with default result count and look-back window
    pub fn search(query: impl Into<String>) -> Self {
        Self::new(Payload::Search {
            query: query.into(),
            num_results: default_num_results(),
            days_back: default_days_back(),
        })
    }

    /// Set the source label
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Set the execution mode
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Restrict the run to a subset of task kinds
    pub fn with_tasks<I, K>(mut self, tasks: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<TaskKind>,
    {
        self.tasks = Some(tasks.into_iter().map(Into::into).collect());
        self
    }
}
