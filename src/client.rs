use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::Method;
use serde::de::DeserializeOwned;
use tokio::io::AsyncRead;

use crate::{
    transport::{HttpTransport, RequestBody},
    upload::{ChunkedUploader, UploadApi, UploadSession},
    wire::{CreateFileUpload, FileUpload},
    CallContext, CircuitBreaker, ClientOptions, NotionError, Operation, RateLimitSnapshot,
    RateLimitTracker, Result, RetryExecutor, RetryPolicy, ToolClient,
};

#[derive(Clone)]
/// Notion API client.
///
/// Clones share the circuit breaker and rate-limit tracker, so every call
/// made through any clone contributes to the same admission and quota state.
pub struct NotionClient {
    transport: Arc<HttpTransport>,
    executor: Arc<RetryExecutor>,
    options: ClientOptions,
}

impl fmt::Debug for NotionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotionClient")
            .field("transport", &self.transport)
            .field("options", &self.options)
            .finish()
    }
}

impl NotionClient {
    /// Creates a client for the public API from an integration token.
    pub fn new(token: impl AsRef<str>) -> Self {
        Self::new_bearer(crate::options::DEFAULT_BASE_URL, token)
    }

    /// Creates a client with a full raw authorization value.
    ///
    /// Example: `"Bearer <token>"` or any custom scheme.
    pub fn new_raw_auth(base_url: impl Into<String>, authorization: impl Into<String>) -> Self {
        let options = ClientOptions {
            base_url: base_url.into(),
            ..ClientOptions::default()
        };
        let transport = HttpTransport::new(
            reqwest::Client::new(),
            options.base_url.clone(),
            authorization,
            options.notion_version.clone(),
            Arc::new(RateLimitTracker::new()),
        );
        Self {
            transport: Arc::new(transport),
            executor: Arc::new(RetryExecutor::new(Arc::new(breaker_for(&options)))),
            options,
        }
    }

    /// Creates a client from a bearer token.
    ///
    /// If the token is missing the `Bearer ` prefix, it is added automatically.
    pub fn new_bearer(base_url: impl Into<String>, token: impl AsRef<str>) -> Self {
        let authorization = normalize_bearer_authorization(token.as_ref());
        Self::new_raw_auth(base_url, authorization)
    }

    /// Creates a client from environment variables.
    ///
    /// Reads:
    /// - `NOTION_TOKEN`: integration token (Bearer prefix optional)
    /// - `NOTION_API_BASE_URL`: optional base URL override
    pub fn from_env() -> Result<Self> {
        let token = std::env::var("NOTION_TOKEN")
            .map_err(|_| NotionError::Config("missing NOTION_TOKEN environment variable".to_owned()))?;
        if token.trim().is_empty() {
            return Err(NotionError::Config(
                "NOTION_TOKEN is set but empty".to_owned(),
            ));
        }
        let base_url = std::env::var("NOTION_API_BASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| crate::options::DEFAULT_BASE_URL.to_owned());
        Ok(Self::new_bearer(base_url, token))
    }

    /// Applies client options.
    ///
    /// Replaces the circuit breaker with one built from
    /// `opts.circuit_breaker`; call this before sharing the client.
    pub fn with_options(mut self, opts: ClientOptions) -> Self {
        let transport = Arc::make_mut(&mut self.transport);
        transport.set_base_url(opts.base_url.clone());
        transport.set_notion_version(opts.notion_version.clone());
        self.executor = Arc::new(RetryExecutor::new(Arc::new(breaker_for(&opts))));
        self.options = opts;
        self
    }

    /// Turns on the circuit breaker with its current parameters.
    pub fn enable_circuit_breaker(mut self) -> Self {
        self.circuit_breaker().enable();
        self.options.circuit_breaker.enabled = true;
        self
    }

    /// Turns on the circuit breaker with the given parameters.
    pub fn with_circuit_breaker(mut self, threshold: u32, recovery_timeout: Duration) -> Self {
        self.circuit_breaker().configure(threshold, recovery_timeout);
        let status = self.circuit_breaker().status();
        self.options.circuit_breaker.enabled = true;
        self.options.circuit_breaker.threshold = status.threshold;
        self.options.circuit_breaker.recovery_timeout = status.recovery_timeout;
        self
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        self.executor.breaker()
    }

    /// Latest observed rate-limit state, `None` before the first response.
    pub fn rate_limit_info(&self) -> Option<RateLimitSnapshot> {
        self.transport.rate_limits().get()
    }

    /// Tool-invocation channel at `endpoint`, sharing this client's breaker,
    /// rate-limit tracker and credentials.
    pub fn tools(&self, endpoint: impl Into<String>) -> ToolClient {
        ToolClient::new(
            Arc::clone(&self.transport),
            Arc::clone(self.executor.breaker()),
            endpoint,
        )
        .with_policy(self.options.tool_retry)
    }

    /// Runs an arbitrary single-attempt operation under `policy`.
    pub async fn execute<T, F, Fut>(
        &self,
        ctx: &CallContext,
        operation: &Operation,
        policy: &RetryPolicy,
        op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.executor.run(ctx, policy, operation, op).await
    }

    /// Sends one JSON REST request with retries and decodes the response.
    pub async fn request<T: DeserializeOwned>(
        &self,
        ctx: &CallContext,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        let operation = Operation::new(method.as_str(), path);
        let transport = &self.transport;
        let response = self
            .executor
            .run(ctx, &self.options.retry, &operation, || {
                let body = body.clone().map_or(RequestBody::Empty, RequestBody::Json);
                transport.perform_once(method.clone(), path, body)
            })
            .await?;
        response.json()
    }

    pub async fn get<T: DeserializeOwned>(&self, ctx: &CallContext, path: &str) -> Result<T> {
        self.request(ctx, Method::GET, path, None).await
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        ctx: &CallContext,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        self.request(ctx, Method::POST, path, Some(body)).await
    }

    pub async fn patch<T: DeserializeOwned>(
        &self,
        ctx: &CallContext,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        self.request(ctx, Method::PATCH, path, Some(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, ctx: &CallContext, path: &str) -> Result<T> {
        self.request(ctx, Method::DELETE, path, None).await
    }

    /// Uploads a stream of unknown length as a multi-part file upload.
    pub async fn upload_large<R>(
        &self,
        ctx: &CallContext,
        filename: &str,
        reader: R,
    ) -> Result<FileUpload>
    where
        R: AsyncRead + Unpin,
    {
        ChunkedUploader::new(self)
            .chunk_size(self.options.upload_chunk_size)
            .upload(ctx, filename, reader)
            .await
    }

    /// Uploads a file from disk, announcing its part count up front.
    pub async fn upload_file(&self, ctx: &CallContext, path: impl AsRef<Path>) -> Result<FileUpload> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                NotionError::Config(format!("cannot derive a file name from {}", path.display()))
            })?;
        let file = tokio::fs::File::open(path).await?;
        let length = file.metadata().await?.len();

        ChunkedUploader::new(self)
            .chunk_size(self.options.upload_chunk_size)
            .content_length(length)
            .upload(ctx, filename, file)
            .await
    }
}

impl UploadApi for NotionClient {
    async fn create_upload(
        &self,
        ctx: &CallContext,
        filename: &str,
        number_of_parts: Option<u32>,
    ) -> Result<FileUpload> {
        let body = CreateFileUpload {
            mode: "multi_part",
            filename,
            number_of_parts,
        };
        let body = serde_json::to_value(&body)
            .map_err(|err| NotionError::Decode(format!("cannot encode upload request: {err}")))?;
        self.post(ctx, "file_uploads", body).await
    }

    async fn send_part(
        &self,
        ctx: &CallContext,
        session: &UploadSession,
        part_number: u32,
        chunk: Vec<u8>,
    ) -> Result<()> {
        let operation = Operation::new(
            "POST",
            format!("{} (part {part_number})", session.upload_target_uri),
        );
        let transport = &self.transport;
        self.executor
            .run(ctx, &self.options.retry, &operation, || {
                // Every attempt sends the same part number and bytes.
                let part = Part::bytes(chunk.clone()).file_name(session.filename.clone());
                let form = Form::new()
                    .text("part_number", part_number.to_string())
                    .part("file", part);
                transport.perform_once(
                    Method::POST,
                    &session.upload_target_uri,
                    RequestBody::Multipart(form),
                )
            })
            .await?;
        Ok(())
    }

    async fn complete_upload(&self, ctx: &CallContext, upload_id: &str) -> Result<FileUpload> {
        let path = format!("file_uploads/{upload_id}/complete");
        self.request(ctx, Method::POST, &path, None).await
    }
}

fn breaker_for(options: &ClientOptions) -> CircuitBreaker {
    let settings = options.circuit_breaker;
    let breaker = CircuitBreaker::new(settings.threshold, settings.recovery_timeout);
    if settings.enabled {
        breaker.enable();
    }
    breaker
}

fn normalize_bearer_authorization(token: &str) -> String {
    let trimmed = token.trim();
    let prefix = trimmed.get(..7);
    if prefix.is_some_and(|value| value.eq_ignore_ascii_case("bearer ")) {
        trimmed.to_owned()
    } else {
        format!("Bearer {trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{normalize_bearer_authorization, NotionClient};
    use crate::{BreakerOptions, ClientOptions};

    #[test]
    fn normalize_bearer_adds_prefix_when_missing() {
        assert_eq!(
            normalize_bearer_authorization("secret_abc"),
            "Bearer secret_abc".to_owned()
        );
    }

    #[test]
    fn normalize_bearer_keeps_existing_prefix() {
        assert_eq!(
            normalize_bearer_authorization("bEaReR abc123"),
            "bEaReR abc123".to_owned()
        );
    }

    #[test]
    fn debug_redacts_authorization_value() {
        let client = NotionClient::new_raw_auth("https://api.notion.com/v1", "secret-token");
        let debug = format!("{client:?}");
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("secret-token"));
    }

    #[test]
    fn breaker_is_disabled_by_default() {
        let client = NotionClient::new("token");
        assert!(!client.circuit_breaker().status().enabled);
        assert!(client.rate_limit_info().is_none());
    }

    #[test]
    fn breaker_setters_enable_and_configure() {
        let client = NotionClient::new("token").with_circuit_breaker(2, Duration::from_secs(5));
        let status = client.circuit_breaker().status();
        assert!(status.enabled);
        assert_eq!(status.threshold, 2);
        assert_eq!(status.recovery_timeout, Duration::from_secs(5));

        let client = NotionClient::new("token").enable_circuit_breaker();
        assert!(client.circuit_breaker().status().enabled);
        assert!(client.options().circuit_breaker.enabled);
    }

    #[test]
    fn options_rebuild_breaker() {
        let client = NotionClient::new("token").with_options(ClientOptions {
            circuit_breaker: BreakerOptions {
                enabled: true,
                threshold: 9,
                recovery_timeout: Duration::from_secs(1),
            },
            ..ClientOptions::default()
        });
        let status = client.circuit_breaker().status();
        assert!(status.enabled);
        assert_eq!(status.threshold, 9);
    }

    #[test]
    fn clones_share_breaker_state() {
        let client = NotionClient::new("token");
        let clone = client.clone();
        client.circuit_breaker().enable();
        assert!(clone.circuit_breaker().status().enabled);
    }
}
