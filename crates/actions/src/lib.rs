//! Layers 1 and 2 of the request pipeline
//!
//! The instant resolver answers a closed set of intents with pure logic,
//! no model call. The action registry dispatches integration-contributed
//! patterns in priority order, with parental policy enforced before any
//! handler runs.

mod calc;
mod instant;
mod registry;

pub use calc::evaluate_expression;
pub use instant::{InstantResolver, InstantResponse, RecentRecall};
pub use registry::{
    ActionContext, ActionHandler, ActionOutcome, ActionRegistry, CommandPattern, PatternSource,
};

use thiserror::Error;

/// Action layer errors
#[derive(Error, Debug)]
pub enum ActionError {
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Handler failed: {0}")]
    Handler(String),
}

impl From<ActionError> for cortex_core::Error {
    fn from(err: ActionError) -> Self {
        cortex_core::Error::Action(err.to_string())
    }
}
