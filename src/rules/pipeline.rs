use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;

use super::rule::{Rule, RuleInfo};

/// Errors raised by pipeline mutations.
#[derive(Debug, Error, Diagnostic)]
pub enum PipelineError {
    #[error("a rule named '{name}' is already registered")]
    #[diagnostic(
        code(neuroloom::rules::duplicate_name),
        help("Unregister the existing rule first, or pick a distinct name.")
    )]
    DuplicateRuleName { name: String },

    #[error("rule name must not be empty")]
    #[diagnostic(code(neuroloom::rules::invalid_name))]
    InvalidRuleName,
}

struct RegisteredRule {
    rule: Arc<dyn Rule>,
    /// Registration sequence number, the tie-breaker for equal priorities.
    seq: u64,
}

/// Ordered registry of rules.
///
/// The pipeline itself is never executed directly; steps run against a
/// [`PipelineSnapshot`] taken at step start, so `register`/`unregister` during
/// a step only affect later steps.
#[derive(Default)]
pub struct RulePipeline {
    entries: Vec<RegisteredRule>,
    next_seq: u64,
}

impl RulePipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a rule. Names are unique per pipeline.
    pub fn register(&mut self, rule: Arc<dyn Rule>) -> Result<(), PipelineError> {
        let name = rule.name();
        if name.is_empty() {
            return Err(PipelineError::InvalidRuleName);
        }
        if self.entries.iter().any(|e| e.rule.name() == name) {
            return Err(PipelineError::DuplicateRuleName {
                name: name.to_owned(),
            });
        }
        tracing::debug!(rule = name, priority = rule.priority(), "rule registered");
        self.entries.push(RegisteredRule {
            rule,
            seq: self.next_seq,
        });
        self.next_seq += 1;
        Ok(())
    }

    /// Replaces or introduces a rule produced by the system itself.
    ///
    /// Rules added this way are ordinary pipeline entries with no special
    /// origin handling; this is `register` under a name that reflects intent.
    pub fn evolve(&mut self, rule: Arc<dyn Rule>) -> Result<(), PipelineError> {
        self.register(rule)
    }

    /// Removes a rule by name. Returns whether anything was removed; removing
    /// an absent name is a no-op.
    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.rule.name() != name);
        let removed = self.entries.len() != before;
        if removed {
            tracing::debug!(rule = name, "rule unregistered");
        }
        removed
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Frozen, ordered view of the current rule set.
    ///
    /// Ordering: ascending priority, then registration order. The snapshot
    /// holds `Arc` clones, so later pipeline mutations cannot reach it.
    #[must_use]
    pub fn snapshot(&self) -> PipelineSnapshot {
        let mut rules: Vec<(i32, u64, Arc<dyn Rule>)> = self
            .entries
            .iter()
            .map(|e| (e.rule.priority(), e.seq, Arc::clone(&e.rule)))
            .collect();
        rules.sort_by_key(|(priority, seq, _)| (*priority, *seq));
        PipelineSnapshot {
            rules: rules.into_iter().map(|(_, _, rule)| rule).collect(),
        }
    }

    /// Audit view of the pipeline in execution order.
    #[must_use]
    pub fn describe(&self) -> Vec<RuleInfo> {
        self.snapshot()
            .rules
            .iter()
            .enumerate()
            .map(|(position, rule)| RuleInfo {
                name: rule.name().to_owned(),
                priority: rule.priority(),
                position,
            })
            .collect()
    }
}

impl std::fmt::Debug for RulePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RulePipeline")
            .field("rules", &self.describe())
            .finish()
    }
}

/// The frozen rule list a single step executes against.
#[derive(Clone, Default)]
pub struct PipelineSnapshot {
    rules: Vec<Arc<dyn Rule>>,
}

impl PipelineSnapshot {
    /// Rules in execution order.
    #[must_use]
    pub fn rules(&self) -> &[Arc<dyn Rule>] {
        &self.rules
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }
}

impl std::fmt::Debug for PipelineSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.rules.iter().map(|r| r.name()).collect();
        f.debug_struct("PipelineSnapshot")
            .field("rules", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextDelta;
    use crate::rules::FnRule;

    fn noop(name: &str, priority: i32) -> Arc<dyn Rule> {
        Arc::new(FnRule::new(name, |_| Ok(ContextDelta::new())).with_priority(priority))
    }

    #[test]
    fn snapshot_orders_by_priority_then_registration() {
        let mut pipeline = RulePipeline::new();
        pipeline.register(noop("late", 10)).unwrap();
        pipeline.register(noop("early", -5)).unwrap();
        pipeline.register(noop("mid_a", 0)).unwrap();
        pipeline.register(noop("mid_b", 0)).unwrap();

        let snapshot = pipeline.snapshot();
        let names: Vec<&str> = snapshot.rules().iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["early", "mid_a", "mid_b", "late"]);
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut pipeline = RulePipeline::new();
        pipeline.register(noop("decay", 0)).unwrap();
        let err = pipeline.register(noop("decay", 5)).unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateRuleName { .. }));
    }

    #[test]
    fn empty_name_rejected() {
        let mut pipeline = RulePipeline::new();
        let err = pipeline.register(noop("", 0)).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidRuleName));
    }

    #[test]
    fn unregister_absent_is_noop() {
        let mut pipeline = RulePipeline::new();
        pipeline.register(noop("decay", 0)).unwrap();
        assert!(!pipeline.unregister("missing"));
        assert!(pipeline.unregister("decay"));
        assert!(pipeline.is_empty());
    }

    #[test]
    fn snapshot_is_isolated_from_later_mutation() {
        let mut pipeline = RulePipeline::new();
        pipeline.register(noop("decay", 0)).unwrap();
        let snap = pipeline.snapshot();
        pipeline.unregister("decay");
        assert_eq!(snap.len(), 1);
        assert!(pipeline.is_empty());
    }
}
