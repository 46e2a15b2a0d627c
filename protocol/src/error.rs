use thiserror::Error;

/// The error taxonomy threaded through every fallible operation in the
/// core: aggregate store, registry, event bus, and the HTTP/SSE boundary
/// all fail into this one type.
#[derive(Debug, Error, Clone)]
pub enum ServerError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found")]
    NotFound,

    #[error("already exists")]
    AlreadyExists,

    #[error("authentication required")]
    AuthRequired,

    #[error("conflict: optimistic update retries exhausted")]
    Conflict,

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("event bus unavailable: {0}")]
    BusUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// JSON-RPC 2.0 error code and canonical message, per spec.md §6/§7.
    /// `StorageUnavailable` and `BusUnavailable` surface to callers as
    /// `Internal` — only the broadcaster treats them specially (log and
    /// continue), which happens before this mapping is ever consulted.
    pub fn to_json_rpc(&self) -> (i64, &'static str) {
        match self {
            ServerError::InvalidInput(_) => (-32602, "Invalid params"),
            ServerError::NotFound => (-32602, "Invalid params"),
            ServerError::AlreadyExists => (-32602, "Invalid params"),
            ServerError::AuthRequired => (-32600, "Invalid Request"),
            ServerError::Conflict => (-32603, "Internal error"),
            ServerError::StorageUnavailable(_) => (-32603, "Internal error"),
            ServerError::BusUnavailable(_) => (-32603, "Internal error"),
            ServerError::Internal(_) => (-32603, "Internal error"),
        }
    }
}
