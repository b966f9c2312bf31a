//! Definition validation and execution planning.
//!
//! A definition is accepted only if every step is well formed, step ids are
//! unique, every dependency names a step in the same workflow, and the
//! dependency graph is acyclic. Planning then produces two views of the
//! same graph: a topological order for sequential execution and dependency
//! levels for parallel execution. A step lands in a level only once every
//! one of its dependencies sits in an earlier level.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tessera_core::{Workflow, WorkflowStep};

use crate::error::{WorkflowError, WorkflowResult};

/// Check a definition's structure. Does not look at runtime fields.
pub fn validate_definition(workflow: &Workflow, max_steps: usize) -> WorkflowResult<()> {
    if workflow.workflow_id.trim().is_empty() {
        return Err(WorkflowError::Invalid("workflow_id is required".to_string()));
    }
    if workflow.workflow_name.trim().is_empty() {
        return Err(WorkflowError::Invalid("workflow_name is required".to_string()));
    }
    if workflow.steps.is_empty() {
        return Err(WorkflowError::Invalid(
            "workflow must have at least one step".to_string(),
        ));
    }
    if workflow.steps.len() > max_steps {
        return Err(WorkflowError::TooManySteps {
            count: workflow.steps.len(),
            max: max_steps,
        });
    }

    let mut seen = HashSet::new();
    for (index, step) in workflow.steps.iter().enumerate() {
        for (field, value) in [
            ("step_id", &step.step_id),
            ("step_name", &step.step_name),
            ("agent_id", &step.agent_id),
        ] {
            if value.trim().is_empty() {
                return Err(WorkflowError::Invalid(format!(
                    "step {index}: {field} is required"
                )));
            }
        }
        if !seen.insert(step.step_id.as_str()) {
            return Err(WorkflowError::DuplicateStep(step.step_id.clone()));
        }
    }

    for step in &workflow.steps {
        if let Some(missing) = step.depends_on.iter().find(|d| !seen.contains(d.as_str())) {
            return Err(WorkflowError::UnknownDependency {
                step_id: step.step_id.clone(),
                dependency: missing.clone(),
            });
        }
    }

    match find_cycle(&workflow.steps) {
        Some(cycle) => Err(WorkflowError::Cycle(cycle)),
        None => Ok(()),
    }
}

/// Find one dependency cycle, returned as a closed path (`a -> b -> a`).
///
/// Iterative depth-first search with an explicit recursion set. Dependencies
/// on unknown step ids are ignored.
pub fn find_cycle(steps: &[WorkflowStep]) -> Option<Vec<String>> {
    let graph: HashMap<&str, &[String]> = steps
        .iter()
        .map(|s| (s.step_id.as_str(), s.depends_on.as_slice()))
        .collect();

    let mut visited: HashSet<&str> = HashSet::new();
    for root in steps.iter().map(|s| s.step_id.as_str()) {
        if visited.contains(root) {
            continue;
        }

        // Each frame is a node and the index of its next edge to follow
        let mut stack: Vec<(&str, usize)> = vec![(root, 0)];
        let mut on_path: HashSet<&str> = HashSet::from([root]);
        visited.insert(root);

        while let Some((node, next)) = stack.last_mut() {
            let edges = graph.get(*node).copied().unwrap_or_default();
            let Some(dependency) = edges.get(*next) else {
                on_path.remove(*node);
                stack.pop();
                continue;
            };
            *next += 1;

            let dependency = dependency.as_str();
            if !graph.contains_key(dependency) {
                continue;
            }
            if on_path.contains(dependency) {
                let start = stack
                    .iter()
                    .position(|(n, _)| *n == dependency)
                    .unwrap_or(0);
                let mut cycle: Vec<String> =
                    stack[start..].iter().map(|(n, _)| n.to_string()).collect();
                cycle.push(dependency.to_string());
                return Some(cycle);
            }
            if visited.insert(dependency) {
                on_path.insert(dependency);
                stack.push((dependency, 0));
            }
        }
    }
    None
}

/// Group steps into levels. Level `n` holds, in definition order, every
/// step whose dependencies all sit in levels `0..n`.
pub fn dependency_levels(steps: &[WorkflowStep]) -> WorkflowResult<Vec<Vec<String>>> {
    let mut placed: HashSet<&str> = HashSet::new();
    let mut levels = Vec::new();

    while placed.len() < steps.len() {
        let level: Vec<&str> = steps
            .iter()
            .filter(|s| !placed.contains(s.step_id.as_str()))
            .filter(|s| s.depends_on.iter().all(|d| placed.contains(d.as_str())))
            .map(|s| s.step_id.as_str())
            .collect();

        if level.is_empty() {
            let stuck = steps
                .iter()
                .map(|s| s.step_id.clone())
                .filter(|id| !placed.contains(id.as_str()))
                .collect();
            return Err(find_cycle(steps).map_or(WorkflowError::Cycle(stuck), WorkflowError::Cycle));
        }

        placed.extend(level.iter().copied());
        levels.push(level.into_iter().map(str::to_string).collect());
    }

    Ok(levels)
}

/// A dependency-respecting order that otherwise keeps definition order:
/// each position takes the earliest defined step that is ready.
pub fn topological_order(steps: &[WorkflowStep]) -> WorkflowResult<Vec<String>> {
    let mut done: HashSet<&str> = HashSet::new();
    let mut order = Vec::with_capacity(steps.len());

    while order.len() < steps.len() {
        let next = steps.iter().find(|s| {
            !done.contains(s.step_id.as_str())
                && s.depends_on.iter().all(|d| done.contains(d.as_str()))
        });
        let Some(step) = next else {
            let stuck = steps
                .iter()
                .map(|s| s.step_id.clone())
                .filter(|id| !done.contains(id.as_str()))
                .collect();
            return Err(WorkflowError::Cycle(find_cycle(steps).unwrap_or(stuck)));
        };
        done.insert(step.step_id.as_str());
        order.push(step.step_id.clone());
    }

    Ok(order)
}

/// Validated run plan for one workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub workflow_id: String,
    pub order: Vec<String>,
    pub levels: Vec<Vec<String>>,
}

impl ExecutionPlan {
    /// Validate `workflow` and compute both execution views.
    pub fn build(workflow: &Workflow, max_steps: usize) -> WorkflowResult<Self> {
        validate_definition(workflow, max_steps)?;
        Ok(Self {
            workflow_id: workflow.workflow_id.clone(),
            order: topological_order(&workflow.steps)?,
            levels: dependency_levels(&workflow.steps)?,
        })
    }

    pub fn step_count(&self) -> usize {
        self.order.len()
    }

    /// Length of the longest dependency chain.
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Widest level.
    pub fn width(&self) -> usize {
        self.levels.iter().map(Vec::len).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn step(id: &str, deps: &[&str]) -> WorkflowStep {
        deps.iter()
            .fold(WorkflowStep::new(id, id.to_uppercase(), "agent"), |s, d| s.depends_on(*d))
    }

    fn workflow(steps: Vec<WorkflowStep>) -> Workflow {
        steps
            .into_iter()
            .fold(Workflow::new("wf", "Plan"), |wf, s| wf.with_step(s))
    }

    #[test]
    fn test_diamond_plan() {
        let wf = workflow(vec![
            step("fetch", &[]),
            step("lint", &["fetch"]),
            step("test", &["fetch"]),
            step("ship", &["lint", "test"]),
        ]);
        let plan = ExecutionPlan::build(&wf, 100).unwrap();
        assert_eq!(plan.order, vec!["fetch", "lint", "test", "ship"]);
        assert_eq!(
            plan.levels,
            vec![vec!["fetch"], vec!["lint", "test"], vec!["ship"]]
        );
        assert_eq!(plan.depth(), 3);
        assert_eq!(plan.width(), 2);
    }

    #[test]
    fn test_order_follows_dependencies_not_definition() {
        let steps = vec![step("b", &["a"]), step("a", &[]), step("c", &[])];
        assert_eq!(topological_order(&steps).unwrap(), vec!["a", "b", "c"]);
        assert_eq!(
            dependency_levels(&steps).unwrap(),
            vec![vec!["a", "c"], vec!["b"]]
        );
    }

    #[test]
    fn test_cycle_path() {
        let steps = vec![step("a", &["c"]), step("b", &["a"]), step("c", &["b"])];
        let cycle = find_cycle(&steps).unwrap();
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 4);
        assert!(topological_order(&steps).is_err());
        assert!(dependency_levels(&steps).is_err());
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let steps = vec![step("a", &["a"])];
        assert_eq!(find_cycle(&steps), Some(vec!["a".to_string(), "a".to_string()]));
    }

    #[rstest]
    #[case::empty_id(Workflow::new(" ", "W").with_step(step("a", &[])), "INVALID_WORKFLOW")]
    #[case::empty_name(Workflow::new("wf", "").with_step(step("a", &[])), "INVALID_WORKFLOW")]
    #[case::no_steps(Workflow::new("wf", "W"), "INVALID_WORKFLOW")]
    #[case::no_agent(
        Workflow::new("wf", "W").with_step(WorkflowStep::new("a", "A", "")),
        "INVALID_WORKFLOW"
    )]
    #[case::duplicate(workflow(vec![step("a", &[]), step("a", &[])]), "INVALID_WORKFLOW")]
    #[case::unknown_dep(workflow(vec![step("a", &["ghost"])]), "INVALID_WORKFLOW")]
    #[case::cycle(workflow(vec![step("a", &["b"]), step("b", &["a"])]), "INVALID_WORKFLOW")]
    fn test_invalid_definitions(#[case] wf: Workflow, #[case] code: &str) {
        let err = validate_definition(&wf, 100).unwrap_err();
        assert_eq!(err.error_code(), code);
    }

    #[test]
    fn test_step_limit() {
        let wf = workflow(vec![step("a", &[]), step("b", &[]), step("c", &[])]);
        assert!(matches!(
            validate_definition(&wf, 2),
            Err(WorkflowError::TooManySteps { count: 3, max: 2 })
        ));
    }

    #[test]
    fn test_unknown_dependency_names_both_steps() {
        let wf = workflow(vec![step("a", &[]), step("b", &["a", "ghost"])]);
        match validate_definition(&wf, 100) {
            Err(WorkflowError::UnknownDependency { step_id, dependency }) => {
                assert_eq!(step_id, "b");
                assert_eq!(dependency, "ghost");
            }
            other => panic!("expected unknown dependency, got {other:?}"),
        }
    }
}
