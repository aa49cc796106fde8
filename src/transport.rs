//! Single-exchange HTTP transport.
//!
//! [`HttpTransport::perform_once`] is the only place that touches the network.
//! It performs exactly one request, feeds the response headers to the
//! [`RateLimitTracker`] and turns non-success statuses into
//! [`NotionError::Http`]. Retrying is the executor's job.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{self, HeaderMap};
use reqwest::{multipart::Form, Method, StatusCode};

use crate::{NotionError, RateLimitTracker, Result};

const REQUEST_ID_HEADERS: &[&str] = &["x-request-id", "x-notion-request-id"];
const NOTION_VERSION_HEADER: &str = "Notion-Version";

/// Request payload for one exchange.
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    Multipart(Form),
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Self::Multipart(_) => f.write_str("Multipart(..)"),
        }
    }
}

/// Status, headers and request id of a completed exchange.
#[derive(Clone, Debug)]
pub struct ResponseMeta {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub request_id: Option<String>,
}

impl ResponseMeta {
    pub fn new(status: StatusCode, headers: HeaderMap) -> Self {
        let request_id = REQUEST_ID_HEADERS
            .iter()
            .find_map(|name| headers.get(*name)?.to_str().ok())
            .map(str::to_owned);
        Self {
            status,
            headers,
            request_id,
        }
    }

    /// `Retry-After` in whole seconds. HTTP-date values are ignored.
    pub fn retry_after(&self) -> Option<Duration> {
        let value = self.headers.get(header::RETRY_AFTER)?.to_str().ok()?;
        value.trim().parse::<u64>().ok().map(Duration::from_secs)
    }
}

/// Successful exchange.
#[derive(Clone, Debug)]
pub struct RawResponse {
    pub meta: ResponseMeta,
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Decodes the body; an empty body decodes as JSON `null`.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        if self.body.is_empty() {
            return serde_json::from_value(serde_json::Value::Null).map_err(|err| {
                NotionError::Decode(format!(
                    "empty {} response cannot be decoded: {err}",
                    self.meta.status.as_u16()
                ))
            });
        }
        serde_json::from_slice(&self.body).map_err(|err| {
            NotionError::Decode(format!(
                "invalid response JSON: {err}; body: {}",
                String::from_utf8_lossy(&self.body)
            ))
        })
    }
}

#[derive(Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
    authorization: String,
    notion_version: String,
    rate_limits: Arc<RateLimitTracker>,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("authorization", &"<redacted>")
            .field("notion_version", &self.notion_version)
            .finish()
    }
}

impl HttpTransport {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        authorization: impl Into<String>,
        notion_version: impl Into<String>,
        rate_limits: Arc<RateLimitTracker>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            authorization: authorization.into(),
            notion_version: notion_version.into(),
            rate_limits,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn rate_limits(&self) -> &Arc<RateLimitTracker> {
        &self.rate_limits
    }

    pub(crate) fn set_base_url(&mut self, base_url: String) {
        self.base_url = base_url;
    }

    pub(crate) fn set_notion_version(&mut self, notion_version: String) {
        self.notion_version = notion_version;
    }

    /// Resolves `path` against the base URL; absolute URIs pass through.
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_owned();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Performs exactly one HTTP exchange.
    pub async fn perform_once(
        &self,
        method: Method,
        path: &str,
        body: RequestBody,
    ) -> Result<RawResponse> {
        let request = self
            .http
            .request(method, self.url_for(path))
            .header(header::AUTHORIZATION, &self.authorization)
            .header(NOTION_VERSION_HEADER, &self.notion_version);
        let request = match body {
            RequestBody::Empty => request,
            RequestBody::Json(value) => request
                .header(header::CONTENT_TYPE, "application/json")
                .json(&value),
            RequestBody::Multipart(form) => request.multipart(form),
        };

        let response = request.send().await.map_err(NotionError::Transport)?;
        let meta = ResponseMeta::new(response.status(), response.headers().clone());
        self.rate_limits.update(&meta);

        let body = response.bytes().await.map_err(NotionError::Transport)?;
        if !meta.status.is_success() {
            return Err(NotionError::Http {
                status: meta.status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
                retry_after: meta.retry_after(),
                request_id: meta.request_id,
            });
        }

        Ok(RawResponse {
            meta,
            body: body.to_vec(),
        })
    }
}
