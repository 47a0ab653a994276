//! Error types for session store operations.

use crate::types::SessionLocation;

/// Error type for session store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No session with this id is held by the store.
    #[error("Session not found: {0}")]
    NotFound(String),

    /// The session has been relocated to another node.
    #[error("Session {session_id} is unavailable, relocated to '{}'", target.host)]
    Unavailable {
        session_id: String,
        target: SessionLocation,
    },

    /// Reading a payload stream failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested transition is not valid for the session's lock state.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// The id source kept producing ids that are already taken.
    #[error("No unique session id found after {attempts} attempts")]
    IdSpaceExhausted { attempts: u32 },

    /// An onloaded payload exceeded the configured limit.
    #[error("Payload exceeds the limit of {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// Error from the payload backend.
    #[error("Payload error: {0}")]
    Payload(String),

    /// Invalid store configuration.
    #[error("Config error: {0}")]
    Config(String),
}

/// Result type for session store operations.
pub type Result<T> = std::result::Result<T, Error>;
