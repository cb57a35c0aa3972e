//! Pipeline builder with validation.

use super::{StageDefinition, StageGraph};
use crate::core::StageId;
use crate::errors::{codes, PipelineValidationError};
use crate::utils::validation::{validate_all, DependencyMap, ValidationError};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Builder for validated stage graphs.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    name: String,
    stages: Vec<StageDefinition>,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// Adds a stage.
    #[must_use]
    pub fn stage(mut self, stage: StageDefinition) -> Self {
        self.stages.push(stage);
        self
    }

    /// Returns the number of stages added.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Validates the stages and builds the graph.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph is empty, a stage id is repeated, a
    /// dependency is undeclared or self-referential, or the graph has a cycle.
    pub fn build(self) -> Result<StageGraph, PipelineValidationError> {
        if self.stages.is_empty() {
            return Err(PipelineValidationError::new(
                codes::GRAPH_EMPTY,
                format!("Pipeline '{}' has no stages", self.name),
            ));
        }

        let mut stages: BTreeMap<StageId, Arc<StageDefinition>> = BTreeMap::new();
        for stage in self.stages {
            let id = stage.id;
            if stages.insert(id, Arc::new(stage)).is_some() {
                return Err(PipelineValidationError::new(
                    codes::GRAPH_DUPLICATE,
                    format!("Stage id {id} is defined more than once"),
                )
                .with_stages(vec![id]));
            }
        }

        let dependencies: DependencyMap = stages
            .iter()
            .map(|(id, stage)| (*id, stage.dependencies.iter().copied().collect::<BTreeSet<_>>()))
            .collect();

        let order = validate_all(&dependencies).map_err(|e| match e {
            ValidationError::Cycle(cycle) => {
                PipelineValidationError::new(codes::GRAPH_CYCLE, cycle.to_string())
                    .with_stages(cycle.cycle_path)
            }
            ValidationError::MissingDependency(missing) => PipelineValidationError::new(
                codes::GRAPH_MISSING_DEP,
                missing.to_string(),
            )
            .with_stages(vec![missing.stage, missing.missing_dependency]),
            ValidationError::SelfDependency(selfdep) => PipelineValidationError::new(
                codes::GRAPH_CYCLE,
                selfdep.to_string(),
            )
            .with_stages(vec![selfdep.stage]),
        })?;

        Ok(StageGraph::new(self.name, stages, order))
    }
}
