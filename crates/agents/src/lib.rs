//! Clients for the downstream conversational backends.
//!
//! [`CredentialBroker`] turns the caller's bearer assertion into a
//! downstream-scoped access token. [`ThreadApiClient`] speaks the backend's
//! thread/run wire protocol. [`RunReconciler`] clears in-flight runs off a
//! thread before the next turn, and [`ThreadAgent`] ties it all together
//! behind the [`AgentBackend`] trait the gateway consumes.

pub mod broker;
pub mod gateway;
pub mod reconciler;
pub mod threads;

pub use broker::{AccessToken, CredentialBroker};
pub use gateway::{AgentBackend, ResponseTransform, ThreadAgent, TurnOutcome};
pub use reconciler::{RunControl, RunReconciler};
pub use threads::ThreadApiClient;
