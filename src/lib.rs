//! `notion-http` is an async Notion API client built around a resilient
//! request execution core.
//!
//! - [`RetryExecutor`] runs one logical operation as a bounded sequence of
//!   attempts with exponential backoff, jitter and `Retry-After` support.
//! - [`CircuitBreaker`] rejects calls while the provider keeps failing.
//! - [`RateLimitTracker`] keeps the latest quota headers.
//! - [`ChunkedUploader`] streams large files as multi-part uploads.
//!
//! [`NotionClient`] wires these together for REST calls and uploads, and
//! [`ToolClient`] reuses them for the JSON-RPC tool channel.

mod breaker;
mod classify;
mod client;
mod context;
mod error;
mod options;
mod rate_limit;
mod retry;
mod tools;
mod transport;
mod upload;
mod wire;

pub use breaker::{BreakerStatus, CircuitBreaker};
pub use classify::{classify, classify_message, DefaultClassifier, ErrorClassifier, ErrorKind, RpcClassifier};
pub use client::NotionClient;
pub use context::{CallContext, Interrupt};
pub use error::NotionError;
pub use options::{BreakerOptions, ClientOptions, DEFAULT_BASE_URL, DEFAULT_NOTION_VERSION};
pub use rate_limit::{RateLimitSnapshot, RateLimitTracker};
pub use retry::{Operation, RetryExecutor, RetryPolicy, RATE_LIMIT_FLOOR};
pub use tools::{ToolClient, TOOL_ERROR_CODE};
pub use transport::{HttpTransport, RawResponse, RequestBody, ResponseMeta};
pub use upload::{ChunkedUploader, UploadApi, UploadSession, DEFAULT_CHUNK_SIZE};
pub use wire::{FileUpload, PartCount, ToolContent, ToolInfo, ToolResult};

pub use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, NotionError>;
