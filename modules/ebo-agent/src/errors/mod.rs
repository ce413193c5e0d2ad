//! Data-driven recovery for protocol errors.
//!
//! A contract revert is looked up by name in a [`StrategyTable`]; the
//! [`ErrorHandler`] logs it, notifies if asked, and hands back a
//! [`Directive`] telling the actor whether to re-enqueue, terminate or run a
//! compensating action.

pub mod handler;
pub mod strategy;

pub use handler::{Directive, ErrorHandler};
pub use strategy::{CompensatingAction, ErrorStrategy, StrategyTable};
