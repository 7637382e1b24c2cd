//! Read-only validation of committed histories against a reference signal.
//!
//! The validator compares exported contexts with externally recorded
//! reference activations and scores structural coherence over the graph
//! topology. It observes committed history only and never feeds back into
//! scheduling.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::graph::{Graph, NodeId};

/// Per-step reference activations for a subset of nodes.
///
/// `samples[i]` aligns with the context whose `step` equals `i`. Steps
/// without a sample are skipped.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReferenceSignal {
    pub samples: Vec<BTreeMap<NodeId, Vec<f64>>>,
}

impl ReferenceSignal {
    #[must_use]
    pub fn new(samples: Vec<BTreeMap<NodeId, Vec<f64>>>) -> Self {
        ReferenceSignal { samples }
    }

    #[must_use]
    pub fn sample(&self, step: u64) -> Option<&BTreeMap<NodeId, Vec<f64>>> {
        usize::try_from(step).ok().and_then(|i| self.samples.get(i))
    }
}

/// Drift detection thresholds.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Distance above this counts toward drift.
    pub drift_threshold: f64,
    /// Consecutive over-threshold steps required before drift is flagged.
    pub drift_window: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        ValidatorConfig {
            drift_threshold: 0.1,
            drift_window: 3,
        }
    }
}

/// Scores for one compared step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepScore {
    pub step: u64,
    /// Mean squared error against the reference sample.
    pub distance: f64,
    /// Edge-coherence score in `(0, 1]`; 1.0 means every edge's target
    /// matches its weighted source exactly.
    pub structural: f64,
    /// Whether this step completed a drift window.
    pub drifting: bool,
}

/// Outcome of a validation pass.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Scores in step order, one per step that had a reference sample.
    pub scores: Vec<StepScore>,
    pub drift_detected: bool,
}

/// Compares committed history against a reference signal.
#[derive(Debug, Default)]
pub struct Validator {
    config: ValidatorConfig,
}

impl Validator {
    #[must_use]
    pub fn new(config: ValidatorConfig) -> Self {
        Validator { config }
    }

    /// Scores every history entry that has a reference sample.
    ///
    /// Pure over its inputs; the history is read through shared references
    /// and never modified.
    #[must_use]
    pub fn run(
        &self,
        history: &[Arc<Context>],
        reference: &ReferenceSignal,
        graph: &Graph,
    ) -> ValidationReport {
        let mut report = ValidationReport::default();
        let mut over_threshold = 0usize;

        for context in history {
            let Some(sample) = reference.sample(context.step) else {
                continue;
            };
            let distance = mse_distance(context, sample);
            let structural = structural_score(context, graph);

            if distance > self.config.drift_threshold {
                over_threshold += 1;
            } else {
                over_threshold = 0;
            }
            let drifting = self.config.drift_window > 0 && over_threshold >= self.config.drift_window;
            if drifting {
                report.drift_detected = true;
                tracing::warn!(
                    step = context.step,
                    distance,
                    window = self.config.drift_window,
                    "drift detected"
                );
            }

            report.scores.push(StepScore {
                step: context.step,
                distance,
                structural,
                drifting,
            });
        }
        report
    }
}

/// Mean squared error over every element the sample names. Elements missing
/// from the context count as zero.
fn mse_distance(context: &Context, sample: &BTreeMap<NodeId, Vec<f64>>) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for (node, expected) in sample {
        let actual = context.activation(*node).unwrap_or(&[]);
        for (i, want) in expected.iter().enumerate() {
            let got = actual.get(i).copied().unwrap_or(0.0);
            let diff = got - want;
            sum += diff * diff;
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Edge coherence: how closely each target's activation tracks its weighted
/// source, averaged over all edges and folded into `(0, 1]`.
fn structural_score(context: &Context, graph: &Graph) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for edge in graph.edges() {
        let source = context.activation(edge.source).unwrap_or(&[]);
        let target = context.activation(edge.target).unwrap_or(&[]);
        let width = source.len().max(target.len());
        for i in 0..width {
            let s = source.get(i).copied().unwrap_or(0.0);
            let t = target.get(i).copied().unwrap_or(0.0);
            sum += (t - edge.weight * s).abs();
            count += 1;
        }
    }
    if count == 0 {
        1.0
    } else {
        1.0 / (1.0 + sum / count as f64)
    }
}
