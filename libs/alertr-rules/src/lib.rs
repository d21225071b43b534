//! Alertr Rules - alert level rule engine
//!
//! Rule trees ([`alertr_model::RuleNode`]) are checked once with
//! [`validate_rule_tree`] when an alert level is loaded and evaluated with
//! [`evaluate`] for every sensor alert that reaches the level.
//!
//! Evaluation is pure: it reads sensor states through a [`RuleContext`]
//! snapshot and the time passed in by the caller.

mod context;
mod error;
mod evaluator;
mod validation;

pub use context::{RuleContext, SensorReading};
pub use error::{Result, RuleError};
pub use evaluator::evaluate;
pub use validation::validate_rule_tree;
