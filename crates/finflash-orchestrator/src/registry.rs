//! Task descriptor registry
//!
//! The registry is assembled once at startup through [`TaskRegistryBuilder`]
//! and is read-only afterwards. Building it checks that every dependency is
//! registered and that the dependency relation is acyclic.

use finflash_core::{Capability, Error, Result, Shape, TaskDescriptor, TaskKind};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

struct Entry {
    descriptor: TaskDescriptor,
    capability: Arc<dyn Capability>,
}

/// Collects descriptors and their capabilities before validation
#[derive(Default)]
pub struct TaskRegistryBuilder {
    entries: BTreeMap<TaskKind, Entry>,
}

impl TaskRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task kind with the capability that executes it
    pub fn register(
        &mut self,
        descriptor: TaskDescriptor,
        capability: Arc<dyn Capability>,
    ) -> Result<&mut Self> {
        if self.entries.contains_key(&descriptor.kind) {
            return Err(Error::DuplicateTaskKind(descriptor.kind));
        }

        self.entries.insert(
            descriptor.kind.clone(),
            Entry {
                descriptor,
                capability,
            },
        );
        Ok(self)
    }

    /// Validate dependencies and freeze the registry
    pub fn build(self) -> Result<TaskRegistry> {
        for entry in self.entries.values() {
            if let Some(missing) = entry
                .descriptor
                .depends_on
                .iter()
                .find(|dep| !self.entries.contains_key(*dep))
            {
                return Err(Error::UnknownTaskKind(missing.clone()));
            }
        }

        let registry = TaskRegistry {
            entries: self.entries,
        };
        registry.validate_acyclic()?;

        tracing::debug!(tasks = registry.len(), "Task registry built");
        Ok(registry)
    }
}

/// Read-only registry of task kinds
pub struct TaskRegistry {
    entries: BTreeMap<TaskKind, Entry>,
}

impl TaskRegistry {
    /// Create a new registry builder
    pub fn builder() -> TaskRegistryBuilder {
        TaskRegistryBuilder::new()
    }

    /// Look up the descriptor of a task kind
    pub fn resolve(&self, kind: &TaskKind) -> Result<&TaskDescriptor> {
        self.entries
            .get(kind)
            .map(|entry| &entry.descriptor)
            .ok_or_else(|| Error::UnknownTaskKind(kind.clone()))
    }

    /// Look up the capability executing a task kind
    pub fn capability(&self, kind: &TaskKind) -> Result<Arc<dyn Capability>> {
        self.entries
            .get(kind)
            .map(|entry| Arc::clone(&entry.capability))
            .ok_or_else(|| Error::UnknownTaskKind(kind.clone()))
    }

    pub fn contains(&self, kind: &TaskKind) -> bool {
        self.entries.contains_key(kind)
    }

    /// All descriptors, ordered by kind
    pub fn descriptors(&self) -> impl Iterator<Item = &TaskDescriptor> {
        self.entries.values().map(|entry| &entry.descriptor)
    }

    /// All registered kinds, ordered
    pub fn kinds(&self) -> impl Iterator<Item = &TaskKind> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Depth-first check of the dependency relation
    ///
    /// On failure the error names the cycle, first kind repeated at the end.
    pub fn validate_acyclic(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            OnStack,
            Done,
        }

        fn visit<'a>(
            kind: &'a TaskKind,
            entries: &'a BTreeMap<TaskKind, Entry>,
            marks: &mut BTreeMap<&'a TaskKind, Mark>,
            stack: &mut Vec<&'a TaskKind>,
        ) -> Option<Vec<TaskKind>> {
            match marks.get(kind).copied().unwrap_or(Mark::Unvisited) {
                Mark::Done => return None,
                Mark::OnStack => {
                    let start = stack.iter().position(|k| *k == kind).unwrap_or(0);
                    let mut cycle: Vec<TaskKind> =
                        stack[start..].iter().map(|k| (*k).clone()).collect();
                    cycle.push(kind.clone());
                    return Some(cycle);
                }
                Mark::Unvisited => {}
            }

            marks.insert(kind, Mark::OnStack);
            stack.push(kind);

            if let Some(entry) = entries.get(kind) {
                for dep in &entry.descriptor.depends_on {
                    if let Some(cycle) = visit(dep, entries, marks, stack) {
                        return Some(cycle);
                    }
                }
            }

            stack.pop();
            marks.insert(kind, Mark::Done);
            None
        }

        let mut marks = BTreeMap::new();
        let mut stack = Vec::new();

        for kind in self.entries.keys() {
            if let Some(cycle) = visit(kind, &self.entries, &mut marks, &mut stack) {
                return Err(Error::CyclicDependency { cycle });
            }
        }

        Ok(())
    }

    /// Decide which tasks a run of the given payload shape includes
    ///
    /// With no requested subset every task that accepts the payload runs.
    /// A requested subset is closed over its dependencies, leaving out
    /// dependencies that consume a different payload shape.
    pub fn select(
        &self,
        payload: Shape,
        requested: Option<&BTreeSet<TaskKind>>,
    ) -> Result<BTreeSet<TaskKind>> {
        let Some(requested) = requested else {
            return Ok(self
                .descriptors()
                .filter(|d| d.accepts(payload))
                .map(|d| d.kind.clone())
                .collect());
        };

        let mut selected = BTreeSet::new();
        let mut pending: Vec<&TaskKind> = requested.iter().collect();

        while let Some(kind) = pending.pop() {
            let descriptor = self.resolve(kind)?;
            if !selected.insert(kind.clone()) {
                continue;
            }

            for dep in &descriptor.depends_on {
                if !selected.contains(dep) && self.resolve(dep)?.accepts(payload) {
                    pending.push(dep);
                }
            }
        }

        Ok(selected)
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("kinds", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}
