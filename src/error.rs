use std::time::Duration;
use thiserror::Error;

/// Unified error type for the coordination core.
///
/// The variants follow the failure taxonomy the primitives are built around:
/// contention (`StateLocked`, `OperationInProgress`), rejected-but-well-formed
/// requests (`InvalidTransition`, `RateLimitExceeded`), backend failure
/// (`Store`, `Redis`, `Serialization`), and caller-initiated cancellation.
/// Contention is a first-class return value, never a panic.
#[derive(Debug, Error)]
pub enum Error {
    /// Another caller currently holds the entity lock.
    #[error("entity state is locked, try again later")]
    StateLocked,

    /// No state record exists for the entity. First contact, not a failure.
    #[error("entity state not found")]
    StateNotFound,

    /// The requested FSM transition is not in the adjacency table.
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// The sliding window for this key is saturated.
    #[error("rate limit exceeded, retry after {retry_after:?}")]
    RateLimitExceeded { retry_after: Duration },

    /// An operation with this idempotency key is already running elsewhere.
    #[error("operation with this key is already in progress")]
    OperationInProgress,

    /// The circuit breaker is refusing calls.
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// The caller abandoned the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// Shared-store failure not tied to a specific backend crate.
    #[error("store error: {message}")]
    Store { message: String },

    /// Redis backend failure.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// An unexpected fault (including a captured panic) converted into a
    /// typed result at the supervisor boundary.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl Error {
    pub fn store(message: impl Into<String>) -> Self {
        Error::Store {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            message: message.into(),
        }
    }

    /// Whether the retry loop may re-attempt the failed operation.
    ///
    /// Only infrastructure failures qualify. Contention is recoverable but the
    /// decision belongs to the caller; rejections are final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Store { .. } | Error::Redis(_))
    }

    /// Whether this error means the shared store itself failed, as opposed to
    /// a normal negative outcome. The adaptive limiter uses this to decide
    /// between falling back and propagating.
    pub fn is_backend(&self) -> bool {
        matches!(self, Error::Store { .. } | Error::Redis(_))
    }

    /// A gentle message suitable for showing to the end user. Contention and
    /// rejection map to "try again" phrasing; infrastructure failures map to a
    /// generic unavailability notice after the cause has been logged.
    pub fn user_message(&self) -> &'static str {
        match self {
            Error::StateLocked | Error::OperationInProgress => {
                "Another request is still being processed. Please try again in a moment."
            }
            Error::InvalidTransition { .. } => "That action is not possible right now.",
            Error::RateLimitExceeded { .. } => {
                "Too many requests. Please wait a little before trying again."
            }
            Error::Cancelled => "The request was cancelled.",
            Error::StateNotFound => "Nothing to do yet. Start with a new request.",
            _ => "The service is temporarily unavailable. Please try again later.",
        }
    }
}
