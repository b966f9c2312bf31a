//! Property tests for planning: on random DAGs the order and levels respect
//! every dependency, and any back edge is reported as a cycle.

use proptest::prelude::*;
use std::collections::HashMap;
use tessera_core::{Workflow, WorkflowStep};
use tessera_workflow::{
    ExecutionPlan, WorkflowError, dependency_levels, find_cycle, topological_order,
    validate_definition,
};

/// Random DAG: step `i` may only depend on steps `0..i`, then the
/// definition order is shuffled so it differs from dependency order.
fn arb_dag() -> impl Strategy<Value = Vec<WorkflowStep>> {
    (1usize..24)
        .prop_flat_map(|n| {
            let deps = (0..n)
                .map(|i| proptest::collection::vec(0..i.max(1), 0..=i.min(3)))
                .collect::<Vec<_>>();
            let order = Just((0..n).collect::<Vec<usize>>()).prop_shuffle();
            (Just(n), deps, order)
        })
        .prop_map(|(n, deps, order)| {
            let steps: Vec<WorkflowStep> = (0..n)
                .map(|i| {
                    let mut step = WorkflowStep::new(format!("s{i}"), format!("Step {i}"), "agent");
                    let mut ds: Vec<usize> = deps[i].iter().copied().filter(|d| *d < i).collect();
                    ds.sort_unstable();
                    ds.dedup();
                    for d in ds {
                        step = step.depends_on(format!("s{d}"));
                    }
                    step
                })
                .collect();
            order.into_iter().map(|i| steps[i].clone()).collect()
        })
}

fn workflow(steps: Vec<WorkflowStep>) -> Workflow {
    steps
        .into_iter()
        .fold(Workflow::new("wf", "Property"), |wf, s| wf.with_step(s))
}

proptest! {
    #[test]
    fn order_respects_dependencies(steps in arb_dag()) {
        let order = topological_order(&steps).unwrap();
        prop_assert_eq!(order.len(), steps.len());

        let position: HashMap<&str, usize> =
            order.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();
        for step in &steps {
            for dep in &step.depends_on {
                prop_assert!(position[dep.as_str()] < position[step.step_id.as_str()]);
            }
        }
    }

    #[test]
    fn levels_partition_steps_after_their_dependencies(steps in arb_dag()) {
        let levels = dependency_levels(&steps).unwrap();
        let level_of: HashMap<&str, usize> = levels
            .iter()
            .enumerate()
            .flat_map(|(depth, ids)| ids.iter().map(move |id| (id.as_str(), depth)))
            .collect();

        prop_assert_eq!(level_of.len(), steps.len());
        for step in &steps {
            let depth = level_of[step.step_id.as_str()];
            for dep in &step.depends_on {
                prop_assert!(level_of[dep.as_str()] < depth);
            }
            // Placed at the earliest possible level
            let earliest = step
                .depends_on
                .iter()
                .map(|d| level_of[d.as_str()] + 1)
                .max()
                .unwrap_or(0);
            prop_assert_eq!(depth, earliest);
        }
    }

    #[test]
    fn dags_validate_and_have_no_cycle(steps in arb_dag()) {
        prop_assert!(find_cycle(&steps).is_none());
        let wf = workflow(steps);
        prop_assert!(validate_definition(&wf, 100).is_ok());
        let plan = ExecutionPlan::build(&wf, 100).unwrap();
        prop_assert_eq!(plan.step_count(), wf.steps.len());
    }

    #[test]
    fn a_back_edge_is_a_cycle(steps in arb_dag().prop_filter("needs an edge", |s| s.iter().any(|st| !st.depends_on.is_empty()))) {
        let mut steps = steps;
        let (index, dep) = steps
            .iter()
            .enumerate()
            .find_map(|(i, s)| s.depends_on.first().map(|d| (i, d.clone())))
            .unwrap();
        let child = steps[index].step_id.clone();
        let parent = steps.iter_mut().find(|s| s.step_id == dep).unwrap();
        parent.depends_on.push(child);

        let cycle = find_cycle(&steps).unwrap();
        prop_assert_eq!(cycle.first(), cycle.last());
        let is_cycle = matches!(
            validate_definition(&workflow(steps), 100),
            Err(WorkflowError::Cycle(_))
        );
        prop_assert!(is_cycle);
    }
}
