//! Replay determinism: fixed graph, rules, and initial context must commit
//! byte-identical contexts on every run.

use std::sync::Arc;

use neuroloom::context::{Context, ContextDelta};
use neuroloom::graph::{Graph, NodeId};
use neuroloom::rules::{FnRule, RulePipeline};
use neuroloom::scheduler::Scheduler;
use neuroloom::units::{ExecutionUnit, UnitId};
use proptest::prelude::*;

async fn run_chain(weights: &[f64], seeds: &[f64], steps: usize) -> Vec<String> {
    let mut builder = Graph::builder();
    for i in 0..seeds.len() {
        builder = builder.add_node(NodeId(i as u64), 1);
    }
    for (i, w) in weights.iter().enumerate() {
        builder = builder.add_edge(NodeId(i as u64), NodeId(i as u64 + 1), *w);
    }
    let graph = Arc::new(builder.build().unwrap());

    let mut units = Vec::new();
    for i in 0..seeds.len() {
        let id = UnitId(i as u32);
        let preds = if i == 0 { vec![] } else { vec![UnitId(i as u32 - 1)] };
        units.push(ExecutionUnit::with_predecessors(
            id,
            vec![NodeId(i as u64)],
            preds,
        ));
    }
    let scheduler = Scheduler::new(Arc::clone(&graph), units, 4).unwrap();

    let mut pipeline = RulePipeline::new();
    pipeline
        .register(Arc::new(FnRule::new("halve-head", |ctx| {
            let head = ctx.activation(NodeId(0)).unwrap()[0];
            Ok(ContextDelta::new().with_activation(NodeId(0), vec![head * 0.5]))
        })))
        .unwrap();

    let mut context = Context::builder("replay");
    for (i, v) in seeds.iter().enumerate() {
        context = context.with_activation(NodeId(i as u64), vec![*v]);
    }
    let mut current = Arc::new(context.build(&graph).unwrap());

    let mut digests = vec![current.digest()];
    for _ in 0..steps {
        let next = scheduler
            .step(Arc::clone(&current), pipeline.snapshot())
            .await
            .unwrap();
        current = Arc::new(next);
        digests.push(current.digest());
    }
    digests
}

#[tokio::test]
async fn two_runs_commit_identical_digests() {
    let weights = [0.5, 1.0, -0.25];
    let seeds = [1.0, 0.0, 0.0, 0.0];
    let first = run_chain(&weights, &seeds, 5).await;
    let second = run_chain(&weights, &seeds, 5).await;
    assert_eq!(first, second);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn replay_law_holds_for_arbitrary_chains(
        weights in prop::collection::vec(-2.0f64..2.0, 1..5),
        seed in -10.0f64..10.0,
        steps in 1usize..6,
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let mut seeds = vec![0.0; weights.len() + 1];
        seeds[0] = seed;
        let first = rt.block_on(run_chain(&weights, &seeds, steps));
        let second = rt.block_on(run_chain(&weights, &seeds, steps));
        prop_assert_eq!(first, second);
    }
}
