//! Shared types for Switchboard.
//!
//! Everything the other crates agree on lives here: the error taxonomy,
//! configuration, the session/message data model, ephemeral run state, and
//! the shared retry policy.

pub mod chat;
pub mod config;
pub mod error;
pub mod retry;
pub mod run;

pub use error::{Error, Result};
