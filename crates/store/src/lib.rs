//! Conversation persistence for Switchboard.
//!
//! Sessions and messages live in two independently partitioned collections
//! of a managed document store (sessions by owner id, messages by session
//! id). The [`ConversationService`] façade selects between the durable
//! store and an in-process fallback at call time: infrastructure failures
//! degrade gracefully instead of failing the caller.

pub mod document;
pub mod durable;
pub mod memory;
pub mod service;
pub mod traits;

pub use document::DocumentStoreClient;
pub use durable::DurableStore;
pub use memory::MemoryStore;
pub use service::ConversationService;
pub use traits::{ConversationStore, NewSession};
