use std::time::Duration;

use crate::breaker::{DEFAULT_RECOVERY_TIMEOUT, DEFAULT_THRESHOLD};
use crate::upload::DEFAULT_CHUNK_SIZE;
use crate::RetryPolicy;

pub const DEFAULT_BASE_URL: &str = "https://api.notion.com/v1";
pub const DEFAULT_NOTION_VERSION: &str = "2022-06-28";

/// Configures endpoints, retry behavior, circuit breaking and uploads.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientOptions {
    /// REST API base URL.
    pub base_url: String,
    /// Value sent in the `Notion-Version` header.
    pub notion_version: String,
    /// Retry policy for REST calls and uploads.
    pub retry: RetryPolicy,
    /// Retry policy for tool invocations.
    pub tool_retry: RetryPolicy,
    pub circuit_breaker: BreakerOptions,
    /// Part size for chunked uploads, in bytes. Zero selects the default.
    pub upload_chunk_size: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            notion_version: DEFAULT_NOTION_VERSION.to_owned(),
            retry: RetryPolicy::default(),
            tool_retry: RetryPolicy {
                attempt_timeout: Duration::from_secs(60),
                ..RetryPolicy::default()
            },
            circuit_breaker: BreakerOptions::default(),
            upload_chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Circuit breaker settings. Disabled unless `enabled` is set.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BreakerOptions {
    pub enabled: bool,
    /// Exhausted server-side failures before the breaker opens.
    pub threshold: u32,
    pub recovery_timeout: Duration,
}

impl Default for BreakerOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: DEFAULT_THRESHOLD,
            recovery_timeout: DEFAULT_RECOVERY_TIMEOUT,
        }
    }
}
