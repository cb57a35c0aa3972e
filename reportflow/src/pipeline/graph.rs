//! The validated stage dependency graph.

use super::StageDefinition;
use crate::core::StageId;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A validated, acyclic set of stages with a fixed execution order.
///
/// Built through [`super::PipelineBuilder`]; stages are never mutated after
/// construction.
#[derive(Debug, Clone)]
pub struct StageGraph {
    name: String,
    stages: BTreeMap<StageId, Arc<StageDefinition>>,
    execution_order: Vec<StageId>,
}

impl StageGraph {
    pub(crate) fn new(
        name: String,
        stages: BTreeMap<StageId, Arc<StageDefinition>>,
        execution_order: Vec<StageId>,
    ) -> Self {
        Self {
            name,
            stages,
            execution_order,
        }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.execution_order.len()
    }

    /// Returns true if the graph has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.execution_order.is_empty()
    }

    /// Returns the execution order.
    #[must_use]
    pub fn execution_order(&self) -> &[StageId] {
        &self.execution_order
    }

    /// Returns a stage by id.
    #[must_use]
    pub fn stage(&self, id: StageId) -> Option<&Arc<StageDefinition>> {
        self.stages.get(&id)
    }

    /// Returns the stage at an execution index.
    #[must_use]
    pub fn stage_at(&self, index: usize) -> Option<&Arc<StageDefinition>> {
        self.execution_order
            .get(index)
            .and_then(|id| self.stages.get(id))
    }

    /// Returns the execution index of a stage.
    #[must_use]
    pub fn position(&self, id: StageId) -> Option<usize> {
        self.execution_order.iter().position(|s| *s == id)
    }

    /// Iterates stages in execution order.
    pub fn stages_in_order(&self) -> impl Iterator<Item = &Arc<StageDefinition>> {
        self.execution_order
            .iter()
            .filter_map(|id| self.stages.get(id))
    }
}
