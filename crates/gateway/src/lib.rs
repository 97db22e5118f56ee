//! HTTP gateway between the analytics dashboard and the conversational
//! backends: conversation persistence, per-user credential exchange, and
//! turn orchestration.

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod state;
pub mod turns;
