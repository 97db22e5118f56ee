/// Shared error type used across all Switchboard crates.
///
/// Not-found and ownership mismatches are **not** errors — stores report
/// those as `None`/`false`/empty values. `Error` is reserved for
/// infrastructure and protocol failures.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    /// The identity provider explicitly rejected a credential exchange.
    /// Never retried.
    #[error("auth: {0}")]
    Auth(String),

    /// The durable document store failed at the infrastructure level.
    /// The conversation façade degrades to the in-process fallback on this.
    #[error("store: {0}")]
    Store(String),

    /// A document insert collided with an existing id.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The remote conversational backend failed while handling a turn.
    #[error("agent {agent}: {message}")]
    Backend { agent: String, message: String },

    /// The remote thread no longer exists; the session needs a rebind.
    #[error("thread not found: {0}")]
    ThreadNotFound(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether a retry policy may re-attempt the failed operation.
    ///
    /// Explicit rejections (`Auth`), permanent protocol outcomes
    /// (`Conflict`, `ThreadNotFound`) and config errors are final; network,
    /// timeout, and 5xx-style failures are transient.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Http(_)
                | Error::Timeout(_)
                | Error::Store(_)
                | Error::Backend { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
