//! Context construction, deltas, and digest canonicalization.

use neuroloom::context::{Context, ContextError};
use neuroloom::graph::{Graph, NodeId};

fn graph() -> Graph {
    Graph::builder()
        .add_node(NodeId(0), 1)
        .add_node(NodeId(1), 2)
        .build()
        .unwrap()
}

#[test]
fn initial_context_zero_fills_every_node() {
    let ctx = Context::initial("alpha", &graph());
    assert_eq!(ctx.step, 0);
    assert_eq!(ctx.activation(NodeId(0)), Some(&[0.0][..]));
    assert_eq!(ctx.activation(NodeId(1)), Some(&[0.0, 0.0][..]));
    assert!(ctx.metadata.is_empty());
}

#[test]
fn builder_validates_nodes_and_widths() {
    let graph = graph();
    let err = Context::builder("alpha")
        .with_activation(NodeId(9), vec![1.0])
        .build(&graph)
        .unwrap_err();
    assert!(matches!(err, ContextError::UnknownNode { id } if id == NodeId(9)));

    let err = Context::builder("alpha")
        .with_activation(NodeId(1), vec![1.0])
        .build(&graph)
        .unwrap_err();
    assert!(matches!(
        err,
        ContextError::ActivationLength { got: 1, expected: 2, .. }
    ));

    let ctx = Context::builder("alpha")
        .with_activation(NodeId(0), vec![0.3])
        .with_metadata("origin", serde_json::json!("seed"))
        .build(&graph)
        .unwrap();
    assert_eq!(ctx.activation(NodeId(0)), Some(&[0.3][..]));
    assert_eq!(ctx.metadata.get("origin"), Some(&serde_json::json!("seed")));
}

#[test]
fn digest_ignores_commit_time() {
    let graph = graph();
    let a = Context::initial("alpha", &graph);
    let mut b = a.clone();
    b.created_at = b.created_at + chrono::Duration::seconds(60);
    assert_eq!(a.digest(), b.digest());
}

#[test]
fn digest_covers_identity_step_activations_and_metadata() {
    let graph = graph();
    let base = Context::initial("alpha", &graph);

    let mut renamed = base.clone();
    renamed.identity = "beta".to_owned();
    assert_ne!(base.digest(), renamed.digest());

    let mut stepped = base.clone();
    stepped.step = 1;
    assert_ne!(base.digest(), stepped.digest());

    let mut activated = base.clone();
    activated.activations.insert(NodeId(0), vec![0.1]);
    assert_ne!(base.digest(), activated.digest());

    let mut tagged = base.clone();
    tagged.metadata.insert("k".to_owned(), serde_json::json!(1));
    assert_ne!(base.digest(), tagged.digest());
}

#[test]
fn serialization_roundtrip_preserves_digest() {
    let graph = graph();
    let ctx = Context::builder("alpha")
        .with_activation(NodeId(0), vec![0.25])
        .with_metadata("k", serde_json::json!({"nested": [1, 2]}))
        .build(&graph)
        .unwrap();

    let json = serde_json::to_string(&ctx).unwrap();
    let back: Context = serde_json::from_str(&json).unwrap();
    assert_eq!(ctx.digest(), back.digest());
    assert_eq!(ctx, back);
}
