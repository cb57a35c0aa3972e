//! Validation utilities for stage dependency graphs.
//!
//! Graphs are expressed as `stage -> declared dependencies`. Ordered maps
//! keep every check and the resulting execution order deterministic.

use crate::core::StageId;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Stage id mapped to its declared dependencies.
pub type DependencyMap = BTreeMap<StageId, BTreeSet<StageId>>;

/// A cycle was detected in the graph.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Cycle detected: {}", render_path(.cycle_path))]
pub struct CycleError {
    /// The stages forming the cycle, first stage repeated at the end.
    pub cycle_path: Vec<StageId>,
}

fn render_path(path: &[StageId]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// A stage depends on a stage that is not declared.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Stage {stage} depends on non-existent stage {missing_dependency}")]
pub struct MissingDependencyError {
    /// The stage with the dangling dependency.
    pub stage: StageId,
    /// The undeclared dependency.
    pub missing_dependency: StageId,
}

/// A stage lists itself as a dependency.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Stage {stage} cannot depend on itself")]
pub struct SelfDependencyError {
    /// The offending stage.
    pub stage: StageId,
}

/// Combined validation failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// See [`CycleError`].
    #[error("{0}")]
    Cycle(#[from] CycleError),
    /// See [`MissingDependencyError`].
    #[error("{0}")]
    MissingDependency(#[from] MissingDependencyError),
    /// See [`SelfDependencyError`].
    #[error("{0}")]
    SelfDependency(#[from] SelfDependencyError),
}

/// Validates that no stage depends on itself.
pub fn validate_no_self_dependencies(stages: &DependencyMap) -> Result<(), SelfDependencyError> {
    for (stage, deps) in stages {
        if deps.contains(stage) {
            return Err(SelfDependencyError { stage: *stage });
        }
    }
    Ok(())
}

/// Validates that every dependency is a declared stage.
pub fn validate_dependencies_exist(stages: &DependencyMap) -> Result<(), MissingDependencyError> {
    for (stage, deps) in stages {
        if let Some(missing) = deps.iter().find(|dep| !stages.contains_key(dep)) {
            return Err(MissingDependencyError {
                stage: *stage,
                missing_dependency: *missing,
            });
        }
    }
    Ok(())
}

/// Validates that the graph is acyclic and returns its execution order.
///
/// Among stages whose dependencies are satisfied, the lowest id runs first,
/// so a linear catalog executes in id order.
pub fn validate_dag(stages: &DependencyMap) -> Result<Vec<StageId>, CycleError> {
    let mut remaining: BTreeMap<StageId, usize> = stages
        .iter()
        .map(|(id, deps)| (*id, deps.iter().filter(|d| stages.contains_key(d)).count()))
        .collect();
    let mut dependents: BTreeMap<StageId, Vec<StageId>> = BTreeMap::new();
    for (id, deps) in stages {
        for dep in deps {
            dependents.entry(*dep).or_default().push(*id);
        }
    }

    let mut ready: BTreeSet<StageId> = remaining
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(stages.len());

    while let Some(next) = ready.pop_first() {
        order.push(next);
        for dependent in dependents.get(&next).into_iter().flatten() {
            if let Some(count) = remaining.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }

    if order.len() == stages.len() {
        Ok(order)
    } else {
        let placed: BTreeSet<StageId> = order.into_iter().collect();
        Err(CycleError {
            cycle_path: find_cycle(stages, &placed),
        })
    }
}

fn find_cycle(stages: &DependencyMap, placed: &BTreeSet<StageId>) -> Vec<StageId> {
    let Some(start) = stages.keys().find(|id| !placed.contains(id)).copied() else {
        return Vec::new();
    };
    // Every unplaced stage has an unplaced dependency, so walking one edge at
    // a time must revisit a stage.
    let mut path = vec![start];
    let mut current = start;
    loop {
        let next = stages
            .get(&current)
            .and_then(|deps| deps.iter().find(|d| !placed.contains(d) && stages.contains_key(d)))
            .copied();
        let Some(next) = next else {
            return path;
        };
        if let Some(pos) = path.iter().position(|id| *id == next) {
            let mut cycle = path.split_off(pos);
            cycle.push(next);
            return cycle;
        }
        path.push(next);
        current = next;
    }
}

/// Performs all validations and returns the execution order.
pub fn validate_all(stages: &DependencyMap) -> Result<Vec<StageId>, ValidationError> {
    validate_no_self_dependencies(stages)?;
    validate_dependencies_exist(stages)?;
    Ok(validate_dag(stages)?)
}
