//! Client error taxonomy.
//!
//! Every failure the cache/sync core surfaces is a [`ClientError`]. Gateway
//! errors propagate unchanged to the query cache and the mutation engine,
//! which attach retry or rollback behavior; UI layers only render the final
//! message.
//!
//! `ClientError` is `Clone` so a single coalesced load can hand the same
//! failure to every waiter.

use std::time::Duration;

use regusto_core::{CartError, StatusTransitionError};
use thiserror::Error;

/// Errors surfaced by the Regusto client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The session is invalid (HTTP 401). Callers must force a re-login.
    #[error("session expired, sign in again")]
    Auth,

    /// Any other non-2xx response.
    #[error("HTTP {status}: {message}")]
    Remote { status: u16, message: String },

    /// No response from the server.
    #[error("network error: {0}")]
    Network(String),

    /// The request exceeded the configured timeout.
    #[error("request timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// A client-side pre-check failed; nothing was sent.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The server answered 2xx but reported the operation as failed.
    #[error("rejected by server: {0}")]
    Rejected(String),

    /// The response body could not be decoded.
    #[error("invalid response: {0}")]
    Decode(String),

    /// The persisted session is missing or unreadable.
    #[error("session error: {0}")]
    Session(String),

    /// Realtime channel failure.
    #[error("channel error: {0}")]
    Channel(String),

    /// The owning screen went away before the operation settled.
    #[error("operation cancelled")]
    Cancelled,
}

impl ClientError {
    /// HTTP status associated with this error, if any.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Auth => Some(401),
            Self::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether this error means the user must sign in again.
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::Auth)
    }

    /// Whether a query may retry after this error.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

impl From<CartError> for ClientError {
    fn from(e: CartError) -> Self {
        Self::Validation(e.to_string())
    }
}

impl From<StatusTransitionError> for ClientError {
    fn from(e: StatusTransitionError) -> Self {
        Self::Validation(e.to_string())
    }
}
