//! Pass Graph Tests
//!
//! Tests for:
//! - Stable topological order: unconstrained passes keep registration order
//! - `before` / `after` edges, unknown names produce no edge
//! - Cycle rejection leaves the graph exactly as it was
//! - `required` names checked at resolution time, in any registration order
//! - Enable / disable, typed access, unregister
//! - Adding then removing an unrelated pass leaves relative order intact

use std::any::Any;

use proptest::prelude::*;

use lustre::graph::{PassGraph, PassRelations, PassState, PostPass, RenderContext, TargetId};
use lustre::{PipelineError, Result};

#[derive(Debug)]
struct StubPass {
    name: String,
    relations: PassRelations,
    state: PassState,
    renders: u32,
}

impl StubPass {
    fn boxed(name: &str, relations: PassRelations) -> Box<Self> {
        Box::new(Self {
            name: name.to_string(),
            relations,
            state: PassState::default(),
            renders: 0,
        })
    }
}

impl PostPass for StubPass {
    fn name(&self) -> &str {
        &self.name
    }

    fn relations(&self) -> &PassRelations {
        &self.relations
    }

    fn state(&self) -> &PassState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut PassState {
        &mut self.state
    }

    fn render(
        &mut self,
        _ctx: &mut RenderContext<'_>,
        _write: TargetId,
        _read: TargetId,
        _delta: f32,
        _mask_active: bool,
    ) -> Result<()> {
        self.renders += 1;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn position(order: &[&str], name: &str) -> usize {
    order
        .iter()
        .position(|n| *n == name)
        .unwrap_or_else(|| panic!("'{name}' missing from {order:?}"))
}

// ============================================================================
// Ordering
// ============================================================================

#[test]
fn unconstrained_passes_run_in_registration_order() {
    let mut graph = PassGraph::new();
    for name in ["c", "a", "b"] {
        graph.register(StubPass::boxed(name, PassRelations::new())).unwrap();
    }
    assert_eq!(graph.resolve_order().unwrap(), vec!["c", "a", "b"]);
}

#[test]
fn effect_lands_between_render_and_screen() {
    let mut graph = PassGraph::new();
    graph.register(StubPass::boxed("render", PassRelations::new())).unwrap();
    graph
        .register(StubPass::boxed("screen", PassRelations::new().after(&["render"])))
        .unwrap();
    graph
        .register(StubPass::boxed(
            "bloom",
            PassRelations::new()
                .before(&["screen"])
                .after(&["render"])
                .required(&["render"]),
        ))
        .unwrap();

    assert_eq!(graph.resolve_order().unwrap(), vec!["render", "bloom", "screen"]);
}

#[test]
fn before_pulls_a_late_pass_forward() {
    let mut graph = PassGraph::new();
    graph.register(StubPass::boxed("render", PassRelations::new())).unwrap();
    graph
        .register(StubPass::boxed("gbuffer", PassRelations::new().before(&["render"])))
        .unwrap();
    assert_eq!(graph.resolve_order().unwrap(), vec!["gbuffer", "render"]);
}

#[test]
fn relations_to_unknown_passes_are_ignored() {
    let mut graph = PassGraph::new();
    graph
        .register(StubPass::boxed(
            "taa",
            PassRelations::new().before(&["progressive"]).after(&["velocity"]),
        ))
        .unwrap();
    graph.register(StubPass::boxed("render", PassRelations::new())).unwrap();
    assert_eq!(graph.resolve_order().unwrap(), vec!["taa", "render"]);
}

#[test]
fn order_reacts_to_late_registration() {
    let mut graph = PassGraph::new();
    graph
        .register(StubPass::boxed("taa", PassRelations::new().before(&["progressive"])))
        .unwrap();
    graph.register(StubPass::boxed("render", PassRelations::new())).unwrap();
    assert_eq!(graph.resolve_order().unwrap(), vec!["taa", "render"]);

    graph
        .register(StubPass::boxed("progressive", PassRelations::new().after(&["render"])))
        .unwrap();
    let order = graph.resolve_order().unwrap();
    assert!(position(&order, "taa") < position(&order, "progressive"));
    assert!(position(&order, "render") < position(&order, "progressive"));
}

// ============================================================================
// Failure Modes
// ============================================================================

#[test]
fn cycle_is_rejected_and_graph_unchanged() {
    let mut graph = PassGraph::new();
    graph
        .register(StubPass::boxed("a", PassRelations::new().before(&["b"])))
        .unwrap();
    graph
        .register(StubPass::boxed("b", PassRelations::new().before(&["c"])))
        .unwrap();
    let version = graph.version();
    let order_before: Vec<String> = graph
        .resolve_order()
        .unwrap()
        .into_iter()
        .map(String::from)
        .collect();

    let err = graph
        .register(StubPass::boxed("c", PassRelations::new().before(&["a"])))
        .unwrap_err();

    assert!(err.is_structural());
    match err {
        PipelineError::CyclicDependency { passes } => {
            assert_eq!(passes, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!graph.contains("c"));
    assert_eq!(graph.len(), 2);
    assert_eq!(graph.version(), version);
    assert_eq!(graph.resolve_order().unwrap(), order_before);
}

#[test]
fn self_cycle_through_after_and_before() {
    let mut graph = PassGraph::new();
    graph.register(StubPass::boxed("a", PassRelations::new())).unwrap();
    let err = graph
        .register(StubPass::boxed(
            "b",
            PassRelations::new().before(&["a"]).after(&["a"]),
        ))
        .unwrap_err();
    assert!(matches!(err, PipelineError::CyclicDependency { .. }));
    assert_eq!(graph.names(), vec!["a"]);
}

#[test]
fn missing_required_fails_at_resolution_not_registration() {
    let mut graph = PassGraph::new();
    graph
        .register(StubPass::boxed("outline", PassRelations::new().required(&["gbuffer"])))
        .unwrap();

    assert_eq!(
        graph.resolve_order().unwrap_err(),
        PipelineError::MissingDependency {
            pass: "outline".into(),
            missing: "gbuffer".into(),
        }
    );
    assert!(graph.ordered_indices().is_err());

    graph.register(StubPass::boxed("gbuffer", PassRelations::new())).unwrap();
    assert_eq!(graph.resolve_order().unwrap(), vec!["outline", "gbuffer"]);
}

#[test]
fn duplicate_names_are_rejected() {
    let mut graph = PassGraph::new();
    graph.register(StubPass::boxed("render", PassRelations::new())).unwrap();
    assert_eq!(
        graph
            .register(StubPass::boxed("render", PassRelations::new()))
            .unwrap_err(),
        PipelineError::DuplicatePass("render".into())
    );
    assert_eq!(graph.len(), 1);
}

// ============================================================================
// Access and Removal
// ============================================================================

#[test]
fn unregister_returns_the_pass_and_reorders() {
    let mut graph = PassGraph::new();
    for name in ["a", "b", "c"] {
        graph.register(StubPass::boxed(name, PassRelations::new())).unwrap();
    }
    let removed = graph.unregister("b").unwrap();
    assert_eq!(removed.name(), "b");
    assert_eq!(graph.resolve_order().unwrap(), vec!["a", "c"]);
    assert_eq!(
        graph.unregister("b").err().unwrap(),
        PipelineError::UnknownPass("b".into())
    );
}

#[test]
fn set_enabled_and_typed_access() {
    let mut graph = PassGraph::new();
    graph.register(StubPass::boxed("bloom", PassRelations::new())).unwrap();

    graph.set_enabled("bloom", false).unwrap();
    assert!(!graph.get("bloom").unwrap().state().enabled);
    assert!(graph.set_enabled("dof", false).is_err());

    let stub = graph.downcast_mut::<StubPass>("bloom").unwrap();
    stub.renders = 7;
    assert_eq!(graph.downcast::<StubPass>("bloom").unwrap().renders, 7);
}

// ============================================================================
// Property Tests: Random DAGs
// ============================================================================

/// Passes registered in a shuffled order, with `before` edges that only
/// ever point from a lower to a higher hidden rank, so the graph is a DAG.
fn dag() -> impl Strategy<Value = (Vec<usize>, Vec<bool>)> {
    (2usize..9).prop_flat_map(|n| {
        (
            Just((0..n).collect::<Vec<_>>()).prop_shuffle(),
            proptest::collection::vec(any::<bool>(), n * n),
        )
    })
}

fn build(ranks: &[usize], edges: &[bool]) -> (PassGraph, Vec<(String, String)>) {
    let n = ranks.len();
    let name = |rank: usize| format!("p{rank}");
    let mut constraints = Vec::new();
    let mut graph = PassGraph::new();
    for &rank in ranks {
        let mut relations = PassRelations::new();
        for other in 0..n {
            if rank < other && edges[rank * n + other] {
                relations.before.push(name(other));
                constraints.push((name(rank), name(other)));
            } else if other < rank && edges[rank * n + other] {
                relations.after.push(name(other));
                constraints.push((name(other), name(rank)));
            }
        }
        graph.register(StubPass::boxed(&name(rank), relations)).unwrap();
    }
    (graph, constraints)
}

proptest! {
    #[test]
    fn every_constraint_is_respected((ranks, edges) in dag()) {
        let (graph, constraints) = build(&ranks, &edges);
        let order = graph.resolve_order().unwrap();
        prop_assert_eq!(order.len(), ranks.len());
        for (first, second) in &constraints {
            prop_assert!(position(&order, first) < position(&order, second));
        }
    }

    #[test]
    fn ordering_is_deterministic((ranks, edges) in dag()) {
        let (a, _) = build(&ranks, &edges);
        let (b, _) = build(&ranks, &edges);
        prop_assert_eq!(a.resolve_order().unwrap(), b.resolve_order().unwrap());
    }

    #[test]
    fn unrelated_pass_keeps_relative_order((ranks, edges) in dag()) {
        let (mut graph, _) = build(&ranks, &edges);
        let original: Vec<String> =
            graph.resolve_order().unwrap().into_iter().map(String::from).collect();

        graph.register(StubPass::boxed("extra", PassRelations::new())).unwrap();
        let with_extra: Vec<String> = graph
            .resolve_order()
            .unwrap()
            .into_iter()
            .filter(|name| *name != "extra")
            .map(String::from)
            .collect();
        prop_assert_eq!(&with_extra, &original);

        graph.unregister("extra").unwrap();
        let restored: Vec<String> =
            graph.resolve_order().unwrap().into_iter().map(String::from).collect();
        prop_assert_eq!(&restored, &original);
    }

    #[test]
    fn without_edges_order_is_registration_order(ranks in (1usize..9).prop_flat_map(|n| Just((0..n).collect::<Vec<_>>()).prop_shuffle())) {
        let edges = vec![false; ranks.len() * ranks.len()];
        let (graph, _) = build(&ranks, &edges);
        let expected: Vec<String> = ranks.iter().map(|r| format!("p{r}")).collect();
        prop_assert_eq!(graph.resolve_order().unwrap(), expected);
    }
}
