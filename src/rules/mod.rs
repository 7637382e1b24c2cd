//! Rule pipeline: the ordered, deterministic transformations applied to a
//! candidate context after propagation in every step.
//!
//! Rules are registered on a [`RulePipeline`] and executed from a frozen
//! [`PipelineSnapshot`], so pipeline mutations never affect a step already in
//! flight. Ordering is by ascending [`Rule::priority`], ties broken by
//! registration order.

mod pipeline;
mod rule;
pub mod shards;

pub use pipeline::{PipelineError, PipelineSnapshot, RulePipeline};
pub use rule::{FnRule, Rule, RuleError, RuleInfo};
