//! Failure classification.
//!
//! A classifier maps any [`NotionError`] to an [`ErrorKind`], which decides
//! whether the executor retries, how it backs off, and whether the failure
//! counts against the circuit breaker.

use std::fmt;

use crate::NotionError;

/// Retry-relevant category of a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unknown,
    /// The caller gave up.
    Canceled,
    /// An attempt (or the caller's deadline) ran out of time.
    Timeout,
    /// Provider throttling.
    RateLimited,
    /// Infrastructure-level failure such as a 5xx or a reset connection.
    Transient,
    Authentication,
    Permanent,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Timeout | Self::RateLimited | Self::Transient)
    }

    /// Failures that reflect provider health and feed the circuit breaker.
    ///
    /// Throttling and client-side errors are excluded so that one caller's
    /// bad requests never trip rejection for everyone else.
    pub fn is_server_side(self) -> bool {
        matches!(self, Self::Timeout | Self::Transient)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Canceled => "canceled",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::Transient => "transient",
            Self::Authentication => "authentication",
            Self::Permanent => "permanent",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a failed attempt to an [`ErrorKind`].
///
/// Implementations must be pure and total: the same error always yields the
/// same kind, and no input panics.
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, err: &NotionError) -> ErrorKind;
}

/// Status- and text-based classification used by the REST channel.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultClassifier;

impl ErrorClassifier for DefaultClassifier {
    fn classify(&self, err: &NotionError) -> ErrorKind {
        classify(err)
    }
}

/// Classifier for the JSON-RPC tool channel.
///
/// Protocol-level JSON-RPC codes are decided by code; everything else falls
/// back to [`classify`].
#[derive(Clone, Copy, Debug, Default)]
pub struct RpcClassifier;

impl ErrorClassifier for RpcClassifier {
    fn classify(&self, err: &NotionError) -> ErrorKind {
        match err {
            NotionError::Rpc { code, .. } => match *code {
                // parse error, invalid request, method not found, invalid params
                -32700 | -32600 | -32601 | -32602 => ErrorKind::Permanent,
                -32603 => ErrorKind::Transient,
                _ => classify(err),
            },
            _ => classify(err),
        }
    }
}

/// Classifies a failure.
///
/// Context signals (`Canceled`, `DeadlineExceeded`) win over any inspection of
/// status codes or message text.
pub fn classify(err: &NotionError) -> ErrorKind {
    match err {
        NotionError::Canceled => ErrorKind::Canceled,
        NotionError::DeadlineExceeded | NotionError::Timeout(_) => ErrorKind::Timeout,
        NotionError::CircuitOpen => ErrorKind::Unknown,
        NotionError::Failed { kind, .. } => *kind,
        NotionError::Http { status, body, .. } => {
            classify_status(*status).unwrap_or_else(|| classify_message(body))
        }
        NotionError::Transport(inner) => {
            if let Some(kind) = inner.status().and_then(|s| classify_status(s.as_u16())) {
                return kind;
            }
            if inner.is_timeout() {
                return ErrorKind::Timeout;
            }
            if inner.is_connect() {
                return ErrorKind::Transient;
            }
            match classify_message(&error_chain_text(inner)) {
                // reqwest failures without recognizable evidence are still
                // network-level, never a verdict from the provider.
                ErrorKind::Permanent if inner.is_request() || inner.is_body() => {
                    ErrorKind::Transient
                }
                kind => kind,
            }
        }
        NotionError::Io(inner) => classify_message(&inner.to_string()),
        NotionError::Rpc { message, .. } => classify_message(message),
        NotionError::Decode(_) | NotionError::Config(_) => ErrorKind::Permanent,
    }
}

fn classify_status(status: u16) -> Option<ErrorKind> {
    match status {
        401 | 403 => Some(ErrorKind::Authentication),
        429 => Some(ErrorKind::RateLimited),
        408 => Some(ErrorKind::Timeout),
        500..=599 => Some(ErrorKind::Transient),
        400..=499 => Some(ErrorKind::Permanent),
        _ => None,
    }
}

// Phrases match anywhere. Status codes and short words only match as whole
// tokens, so ids such as `8c1e5003-...` or `1f429abc` carry no signal.
const AUTH_MARKERS: &[&str] = &["unauthorized", "forbidden"];
const AUTH_TOKENS: &[&str] = &["401", "403"];
const RATE_LIMIT_MARKERS: &[&str] = &["rate limit", "rate_limit", "too many requests"];
const RATE_LIMIT_TOKENS: &[&str] = &["429"];
const TIMEOUT_MARKERS: &[&str] = &["timeout", "timed out", "deadline exceeded"];
const TRANSIENT_MARKERS: &[&str] = &[
    "connection reset",
    "connection refused",
    "broken pipe",
    "no such host",
    "dns error",
    "failed to lookup address",
    "unexpected eof",
    "internal server error",
    "bad gateway",
    "service unavailable",
];
const TRANSIENT_TOKENS: &[&str] = &["eof", "500", "502", "503", "504"];

/// Classifies free-form failure text.
pub fn classify_message(message: &str) -> ErrorKind {
    let text = message.to_ascii_lowercase();
    let has = |markers: &[&str], tokens: &[&str]| {
        markers.iter().any(|marker| text.contains(marker))
            || tokens.iter().any(|token| contains_token(&text, token))
    };

    if has(AUTH_MARKERS, AUTH_TOKENS) {
        ErrorKind::Authentication
    } else if has(RATE_LIMIT_MARKERS, RATE_LIMIT_TOKENS) {
        ErrorKind::RateLimited
    } else if has(TIMEOUT_MARKERS, &[]) {
        ErrorKind::Timeout
    } else if has(TRANSIENT_MARKERS, TRANSIENT_TOKENS) {
        ErrorKind::Transient
    } else {
        ErrorKind::Permanent
    }
}

/// True when `token` occurs in `text` with no ASCII letter or digit on
/// either side.
fn contains_token(text: &str, token: &str) -> bool {
    let bytes = text.as_bytes();
    text.match_indices(token).any(|(start, _)| {
        let end = start + token.len();
        let before = start == 0 || !bytes[start - 1].is_ascii_alphanumeric();
        let after = end == bytes.len() || !bytes[end].is_ascii_alphanumeric();
        before && after
    })
}

fn error_chain_text(err: &(dyn std::error::Error + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{classify, classify_message, ErrorClassifier, ErrorKind, RpcClassifier};
    use crate::NotionError;

    fn http(status: u16, body: &str) -> NotionError {
        NotionError::Http {
            status,
            body: body.to_owned(),
            retry_after: None,
            request_id: None,
        }
    }

    #[test]
    fn status_codes_map_to_kinds() {
        assert_eq!(classify(&http(401, "")), ErrorKind::Authentication);
        assert_eq!(classify(&http(403, "")), ErrorKind::Authentication);
        assert_eq!(classify(&http(429, "")), ErrorKind::RateLimited);
        assert_eq!(classify(&http(500, "")), ErrorKind::Transient);
        assert_eq!(classify(&http(503, "")), ErrorKind::Transient);
        assert_eq!(classify(&http(400, "validation_error")), ErrorKind::Permanent);
        assert_eq!(classify(&http(404, "object_not_found")), ErrorKind::Permanent);
    }

    #[test]
    fn status_wins_over_body_text() {
        assert_eq!(classify(&http(400, "rate limit in body")), ErrorKind::Permanent);
    }

    #[test]
    fn context_signals_take_priority() {
        assert_eq!(classify(&NotionError::Canceled), ErrorKind::Canceled);
        assert_eq!(classify(&NotionError::DeadlineExceeded), ErrorKind::Timeout);
        assert_eq!(
            classify(&NotionError::Timeout(Duration::from_secs(1))),
            ErrorKind::Timeout
        );
    }

    #[test]
    fn message_markers() {
        assert_eq!(classify_message("401 Unauthorized"), ErrorKind::Authentication);
        assert_eq!(classify_message("Forbidden"), ErrorKind::Authentication);
        assert_eq!(classify_message("Too Many Requests"), ErrorKind::RateLimited);
        assert_eq!(classify_message("rate limit exceeded"), ErrorKind::RateLimited);
        assert_eq!(classify_message("i/o timeout"), ErrorKind::Timeout);
        assert_eq!(classify_message("read: connection reset by peer"), ErrorKind::Transient);
        assert_eq!(classify_message("dial tcp: connection refused"), ErrorKind::Transient);
        assert_eq!(classify_message("write: broken pipe"), ErrorKind::Transient);
        assert_eq!(classify_message("unexpected EOF"), ErrorKind::Transient);
        assert_eq!(classify_message("invalid property"), ErrorKind::Permanent);
        assert_eq!(classify_message(""), ErrorKind::Permanent);
    }

    #[test]
    fn codes_inside_identifiers_carry_no_signal() {
        assert_eq!(
            classify_message("Could not find block with ID: 8c1e5003-4b2a-4f0e-9d5c-2a1b3c4d5e6f"),
            ErrorKind::Permanent
        );
        assert_eq!(classify_message("page 1f429abc not found"), ErrorKind::Permanent);
        assert_eq!(classify_message("block 94015003 is archived"), ErrorKind::Permanent);
        assert_eq!(
            classify_message("invalid value for the title property thereof"),
            ErrorKind::Permanent
        );
    }

    #[test]
    fn codes_as_whole_tokens_still_count() {
        assert_eq!(classify_message("upstream returned 503"), ErrorKind::Transient);
        assert_eq!(classify_message("status=429"), ErrorKind::RateLimited);
        assert_eq!(classify_message("(401)"), ErrorKind::Authentication);
        assert_eq!(classify_message("EOF"), ErrorKind::Transient);
        assert_eq!(classify_message("read: eof while parsing"), ErrorKind::Transient);
    }

    #[test]
    fn tool_error_with_uuid_is_permanent() {
        let err = NotionError::Rpc {
            code: -32000,
            message: "Could not find block with ID: 8c1e5003-4b2a-4f0e-9d5c-2a1b3c4d5e6f".to_owned(),
            retry_after: None,
        };
        assert_eq!(RpcClassifier.classify(&err), ErrorKind::Permanent);
    }

    #[test]
    fn classification_is_deterministic() {
        let errors = [
            http(502, "bad gateway"),
            NotionError::Decode("bad json".to_owned()),
            NotionError::Rpc {
                code: 1,
                message: "too many requests".to_owned(),
                retry_after: None,
            },
        ];
        for err in &errors {
            assert_eq!(classify(err), classify(err));
        }
    }

    #[test]
    fn retryability() {
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(ErrorKind::Transient.is_retryable());
        assert!(!ErrorKind::Canceled.is_retryable());
        assert!(!ErrorKind::Authentication.is_retryable());
        assert!(!ErrorKind::Permanent.is_retryable());
        assert!(!ErrorKind::Unknown.is_retryable());
        assert!(!ErrorKind::RateLimited.is_server_side());
    }

    #[test]
    fn rpc_protocol_codes() {
        let rpc = |code| NotionError::Rpc {
            code,
            message: "x".to_owned(),
            retry_after: None,
        };
        assert_eq!(RpcClassifier.classify(&rpc(-32601)), ErrorKind::Permanent);
        assert_eq!(RpcClassifier.classify(&rpc(-32603)), ErrorKind::Transient);
        assert_eq!(
            RpcClassifier.classify(&NotionError::Rpc {
                code: 0,
                message: "Service Unavailable".to_owned(),
                retry_after: None,
            }),
            ErrorKind::Transient
        );
    }
}
