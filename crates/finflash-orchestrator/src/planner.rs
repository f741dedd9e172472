//! Execution planner: dependency waves by topological peeling

use crate::registry::TaskRegistry;
use finflash_core::{Error, ExecutionMode, Result, TaskKind};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Tasks whose dependencies all sit in earlier waves
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Wave {
    pub index: usize,
    /// Ordered lexicographically by kind
    pub tasks: Vec<TaskKind>,
}

impl Wave {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Ordered waves for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionPlan {
    pub mode: ExecutionMode,
    pub waves: Vec<Wave>,
    /// Dependencies of every planned task, restricted to the planned set
    #[serde(skip)]
    dependencies: BTreeMap<TaskKind, BTreeSet<TaskKind>>,
}

impl ExecutionPlan {
    /// Index of the wave holding `kind`
    pub fn wave_of(&self, kind: &TaskKind) -> Option<usize> {
        self.waves
            .iter()
            .find(|wave| wave.tasks.contains(kind))
            .map(|wave| wave.index)
    }

    /// In-run dependencies of a planned task
    pub fn dependencies_of(&self, kind: &TaskKind) -> Option<&BTreeSet<TaskKind>> {
        self.dependencies.get(kind)
    }

    /// Every planned task in wave order
    pub fn tasks(&self) -> impl Iterator<Item = &TaskKind> {
        self.waves.iter().flat_map(|wave| wave.tasks.iter())
    }

    pub fn task_count(&self) -> usize {
        self.waves.iter().map(Wave::len).sum()
    }

    /// An empty plan is valid and terminates immediately
    pub fn is_empty(&self) -> bool {
        self.waves.is_empty()
    }
}

/// Computes execution plans against a registry
pub struct ExecutionPlanner<'a> {
    registry: &'a TaskRegistry,
}

impl<'a> ExecutionPlanner<'a> {
    pub fn new(registry: &'a TaskRegistry) -> Self {
        Self { registry }
    }

    /// Plan every registered task
    pub fn plan_all(&self, mode: ExecutionMode) -> Result<ExecutionPlan> {
        let all: BTreeSet<TaskKind> = self.registry.kinds().cloned().collect();
        self.plan(&all, mode)
    }

    /// Plan a subset of task kinds
    ///
    /// Wave *i* holds every unplaced task whose dependencies inside the
    /// subset were all placed in waves before *i*. Dependencies outside the
    /// subset are ignored.
    pub fn plan(&self, subset: &BTreeSet<TaskKind>, mode: ExecutionMode) -> Result<ExecutionPlan> {
        let mut dependencies = BTreeMap::new();
        for kind in subset {
            let descriptor = self.registry.resolve(kind)?;
            let in_run: BTreeSet<TaskKind> = descriptor
                .depends_on
                .intersection(subset)
                .cloned()
                .collect();
            dependencies.insert(kind.clone(), in_run);
        }

        let mut remaining: BTreeSet<&TaskKind> = subset.iter().collect();
        let mut placed: BTreeSet<&TaskKind> = BTreeSet::new();
        let mut waves = Vec::new();

        while !remaining.is_empty() {
            let ready: Vec<&TaskKind> = remaining
                .iter()
                .copied()
                .filter(|kind| dependencies[*kind].iter().all(|dep| placed.contains(dep)))
                .collect();

            if ready.is_empty() {
                // Unreachable for a validated registry
                return Err(Error::CyclicDependency {
                    cycle: remaining.into_iter().cloned().collect(),
                });
            }

            for kind in &ready {
                remaining.remove(*kind);
                placed.insert(*kind);
            }

            waves.push(Wave {
                index: waves.len(),
                tasks: ready.into_iter().cloned().collect(),
            });
        }

        tracing::debug!(
            mode = %mode,
            waves = waves.len(),
            tasks = subset.len(),
            "Execution plan computed"
        );

        Ok(ExecutionPlan {
            mode,
            waves,
            dependencies,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline;
    use crate::testing::ScriptedCapability;
    use finflash_core::{Shape, TaskDescriptor};

    fn registry(descriptors: Vec<TaskDescriptor>) -> TaskRegistry {
        let mut builder = TaskRegistry::builder();
        for d in descriptors {
            let name = d.kind.to_string();
            builder
                .register(d, ScriptedCapability::succeeding(&name))
                .unwrap();
        }
        builder.build().unwrap()
    }

    fn kinds(items: &[TaskKind]) -> BTreeSet<TaskKind> {
        items.iter().cloned().collect()
    }

    fn example_registry() -> TaskRegistry {
        let analyzers = pipeline::ANALYZERS;
        let mut descriptors = vec![TaskDescriptor::new(
            TaskKind::COLLECT_TEXT,
            Shape::Text,
            Shape::Document,
        )];
        for kind in analyzers.clone() {
            descriptors.push(
                TaskDescriptor::new(kind, Shape::Document, Shape::Analysis)
                    .with_dependency(TaskKind::COLLECT_TEXT),
            );
        }
        descriptors.push(
            TaskDescriptor::new(TaskKind::SYNTHESIZE_SUMMARY, Shape::Analysis, Shape::Report)
                .with_dependencies(analyzers),
        );
        registry(descriptors)
    }

    #[test]
    fn test_news_pipeline_waves() {
        let registry = example_registry();
        let plan = ExecutionPlanner::new(&registry)
            .plan_all(ExecutionMode::Parallel)
            .unwrap();

        let waves: Vec<Vec<TaskKind>> = plan.waves.iter().map(|w| w.tasks.clone()).collect();
        assert_eq!(
            waves,
            vec![
                vec![TaskKind::COLLECT_TEXT],
                vec![
                    TaskKind::ANALYZE_ENTITIES,
                    TaskKind::ANALYZE_RISK,
                    TaskKind::ANALYZE_SENTIMENT,
                ],
                vec![TaskKind::SYNTHESIZE_SUMMARY],
            ]
        );
        assert_eq!(plan.task_count(), 5);
        assert_eq!(plan.wave_of(&TaskKind::ANALYZE_RISK), Some(1));
    }

    #[test]
    fn test_dependencies_always_in_earlier_waves() {
        let registry = registry(vec![
            TaskDescriptor::new("e", Shape::Any, Shape::Any).with_dependencies(["c", "d"]),
            TaskDescriptor::new("d", Shape::Any, Shape::Any).with_dependency("a"),
            TaskDescriptor::new("c", Shape::Any, Shape::Any).with_dependencies(["a", "b"]),
            TaskDescriptor::new("b", Shape::Any, Shape::Any),
            TaskDescriptor::new("a", Shape::Any, Shape::Any),
            TaskDescriptor::new("f", Shape::Any, Shape::Any).with_dependency("e"),
        ]);

        let plan = ExecutionPlanner::new(&registry)
            .plan_all(ExecutionMode::Sequential)
            .unwrap();

        for descriptor in registry.descriptors() {
            let own = plan.wave_of(&descriptor.kind).unwrap();
            for dep in &descriptor.depends_on {
                assert!(plan.wave_of(dep).unwrap() < own, "{dep} must precede {}", descriptor.kind);
            }
        }
        assert_eq!(plan.waves[0].tasks, vec![TaskKind::new("a"), TaskKind::new("b")]);
        assert_eq!(plan.waves.len(), 4);
    }

    #[test]
    fn test_subset_ignores_outside_dependencies() {
        let registry = example_registry();
        let plan = ExecutionPlanner::new(&registry)
            .plan(
                &kinds(&[TaskKind::ANALYZE_RISK, TaskKind::SYNTHESIZE_SUMMARY]),
                ExecutionMode::Adaptive,
            )
            .unwrap();

        assert_eq!(plan.waves.len(), 2);
        assert_eq!(plan.waves[0].tasks, vec![TaskKind::ANALYZE_RISK]);
        assert!(
            plan.dependencies_of(&TaskKind::ANALYZE_RISK)
                .unwrap()
                .is_empty()
        );
        assert_eq!(
            plan.dependencies_of(&TaskKind::SYNTHESIZE_SUMMARY).unwrap(),
            &kinds(&[TaskKind::ANALYZE_RISK])
        );
    }

    #[test]
    fn test_unknown_kind_fails_before_planning() {
        let registry = example_registry();
        let result = ExecutionPlanner::new(&registry).plan(
            &kinds(&[TaskKind::COLLECT_TEXT, TaskKind::new("analyze-weather")]),
            ExecutionMode::Parallel,
        );
        assert!(matches!(result, Err(Error::UnknownTaskKind(_))));
    }

    #[test]
    fn test_empty_subset_yields_empty_plan() {
        let registry = example_registry();
        let plan = ExecutionPlanner::new(&registry)
            .plan(&BTreeSet::new(), ExecutionMode::Parallel)
            .unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.task_count(), 0);
    }
}
