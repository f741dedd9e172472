//! The standard FinFlash analysis pipeline
//!
//! Three collectors turn a payload into a document, three analyzers read the
//! collected documents, and one synthesis task merges the analyses.

use finflash_core::{Shape, TaskDescriptor, TaskKind};
use std::collections::BTreeSet;

/// Collection tasks, one per payload shape
pub const COLLECTORS: [TaskKind; 3] = [
    TaskKind::COLLECT_TEXT,
    TaskKind::COLLECT_AUDIO,
    TaskKind::COLLECT_SEARCH,
];

/// Analysis tasks fed by the collectors
pub const ANALYZERS: [TaskKind; 3] = [
    TaskKind::ANALYZE_SENTIMENT,
    TaskKind::ANALYZE_ENTITIES,
    TaskKind::ANALYZE_RISK,
];

/// Descriptors of the seven standard task kinds
pub fn standard_descriptors() -> Vec<TaskDescriptor> {
    let mut descriptors = vec![
        TaskDescriptor::new(TaskKind::COLLECT_TEXT, Shape::Text, Shape::Document),
        TaskDescriptor::new(TaskKind::COLLECT_AUDIO, Shape::Audio, Shape::Document)
            .with_rate_limit_key("openai"),
        TaskDescriptor::new(TaskKind::COLLECT_SEARCH, Shape::SearchQuery, Shape::Document)
            .with_rate_limit_key("exa"),
    ];

    descriptors.extend(ANALYZERS.into_iter().map(|kind| {
        TaskDescriptor::new(kind, Shape::Document, Shape::Analysis)
            .with_dependencies(COLLECTORS)
            .with_rate_limit_key("openai")
    }));

    descriptors.push(
        TaskDescriptor::new(TaskKind::SYNTHESIZE_SUMMARY, Shape::Analysis, Shape::Report)
            .with_dependencies(ANALYZERS),
    );

    descriptors
}

/// At least one collector and at least one analyzer
pub fn default_minimum_viable() -> Vec<BTreeSet<TaskKind>> {
    vec![
        COLLECTORS.into_iter().collect(),
        ANALYZERS.into_iter().collect(),
    ]
}
