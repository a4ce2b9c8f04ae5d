//! Decision source seam.
//!
//! The trading model lives outside this workspace. The control loop hands
//! it a [`DecisionContext`] snapshot and receives back a [`Decision`].
//! Responses arrive as loosely structured JSON; [`parse_decision`] is the
//! boundary that turns them into the tagged type, defaulting to
//! [`Decision::Hold`] whenever anything about the payload is off.

pub mod parse;
pub mod source;

pub use parse::parse_decision;
pub use source::{
    BoxFuture, Decision, DecisionContext, DecisionError, DecisionResult, DecisionSource,
    DynDecisionSource, OpenIntent, ScriptedDecisionSource,
};
