use std::sync::Arc;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::{Context, ContextDelta};

/// Errors a rule may raise during [`Rule::apply`].
///
/// Any error aborts the whole step; the previously committed context stays
/// current.
#[derive(Debug, Error, Diagnostic)]
pub enum RuleError {
    /// The rule deliberately rejected the candidate context.
    #[error("rule rejected the candidate context: {reason}")]
    #[diagnostic(
        code(neuroloom::rules::rejected),
        help("A guard rule vetoed this step. The previous context remains current.")
    )]
    Rejected { reason: String },

    #[error("rule serialization failure: {0}")]
    #[diagnostic(code(neuroloom::rules::serde))]
    Serde(#[from] serde_json::Error),

    #[error("rule failure: {0}")]
    #[diagnostic(code(neuroloom::rules::other))]
    Other(String),
}

/// A deterministic transformation over a candidate context.
///
/// `apply` must be pure: same context in, same delta out. Rules never mutate
/// the context directly; they return a [`ContextDelta`] that the scheduler
/// folds in pipeline order.
pub trait Rule: Send + Sync {
    /// Unique name within a pipeline.
    fn name(&self) -> &str;

    /// Execution priority. Lower runs first; ties break by registration order.
    fn priority(&self) -> i32 {
        0
    }

    /// Produces this rule's partial update for the candidate context.
    fn apply(&self, ctx: &Context) -> Result<ContextDelta, RuleError>;
}

/// Descriptive record of a registered rule, for audit surfaces.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleInfo {
    pub name: String,
    pub priority: i32,
    /// Position in execution order within the current pipeline.
    pub position: usize,
}

/// Adapter turning a closure into a [`Rule`].
///
/// # Examples
///
/// ```
/// use neuroloom::rules::{FnRule, Rule};
/// use neuroloom::context::ContextDelta;
///
/// let rule = FnRule::new("noop", |_ctx| Ok(ContextDelta::new()));
/// assert_eq!(rule.name(), "noop");
/// ```
pub struct FnRule {
    name: String,
    priority: i32,
    #[allow(clippy::type_complexity)]
    func: Arc<dyn Fn(&Context) -> Result<ContextDelta, RuleError> + Send + Sync>,
}

impl FnRule {
    #[must_use]
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Context) -> Result<ContextDelta, RuleError> + Send + Sync + 'static,
    {
        FnRule {
            name: name.into(),
            priority: 0,
            func: Arc::new(func),
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl Rule for FnRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn apply(&self, ctx: &Context) -> Result<ContextDelta, RuleError> {
        (self.func)(ctx)
    }
}

impl std::fmt::Debug for FnRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnRule")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}
