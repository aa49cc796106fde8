use std::time::Duration;

use crate::ErrorKind;

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum NotionError {
    /// Network or request execution error from `reqwest`.
    #[error("transport error: {0}")]
    Transport(reqwest::Error),
    /// Non-success HTTP status code with raw response body.
    #[error("http error {status}: {body}")]
    Http {
        status: u16,
        body: String,
        /// Server-provided `Retry-After` hint, if any.
        retry_after: Option<Duration>,
        request_id: Option<String>,
    },
    /// Error object returned by the tool-invocation (JSON-RPC) channel.
    #[error("rpc error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        retry_after: Option<Duration>,
    },
    /// Response decoding or protocol-shape validation error.
    #[error("decode error: {0}")]
    Decode(String),
    /// Reading the caller's upload stream failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration error: {0}")]
    Config(String),
    /// A single attempt exceeded its time bound.
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),
    /// The caller's context was canceled.
    #[error("operation canceled")]
    Canceled,
    /// The caller's deadline passed.
    #[error("deadline exceeded")]
    DeadlineExceeded,
    /// The circuit breaker rejected the call before any attempt was made.
    #[error("circuit breaker open: provider is failing, request not attempted")]
    CircuitOpen,
    /// Terminal failure of a retried operation.
    #[error("{method} {target} failed ({kind}) after {attempts} attempt(s): {source}")]
    Failed {
        method: String,
        target: String,
        kind: ErrorKind,
        attempts: u32,
        /// Last observed HTTP status, for HTTP-backed operations.
        status: Option<u16>,
        #[source]
        source: Box<NotionError>,
    },
}

impl NotionError {
    /// Classified kind of a terminal failure.
    ///
    /// Only [`NotionError::Failed`] carries a kind; the breaker sentinel and
    /// raw attempt errors return `None`.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Number of attempts made before the operation gave up.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::Failed { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// HTTP status code carried by this error or its wrapped cause.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Transport(err) => err.status().map(|status| status.as_u16()),
            Self::Failed { status, source, .. } => status.or_else(|| source.status()),
            _ => None,
        }
    }

    /// Explicit server retry hint, if the failure carried one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Http { retry_after, .. } | Self::Rpc { retry_after, .. } => *retry_after,
            Self::Failed { source, .. } => source.retry_after(),
            _ => None,
        }
    }

    /// Returns `true` when the circuit breaker rejected the call.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen)
    }

    /// Innermost cause, unwrapping executor context.
    pub fn root_cause(&self) -> &NotionError {
        match self {
            Self::Failed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
