//! JSON-RPC tool-invocation channel.
//!
//! Tool calls run through the same [`RetryExecutor`] as REST calls, configured
//! with the [`RpcClassifier`] and the tool retry policy.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::{
    transport::{HttpTransport, RequestBody},
    wire::{RpcRequest, RpcResponse, ToolInfo, ToolList, ToolResult},
    CallContext, CircuitBreaker, NotionError, Operation, Result, RetryExecutor, RetryPolicy,
    RpcClassifier,
};

/// Code used when a tool reports failure through `isError`.
pub const TOOL_ERROR_CODE: i64 = -32000;

pub struct ToolClient {
    transport: Arc<HttpTransport>,
    executor: RetryExecutor<RpcClassifier>,
    endpoint: String,
    policy: RetryPolicy,
    next_id: AtomicU64,
}

impl fmt::Debug for ToolClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolClient")
            .field("endpoint", &self.endpoint)
            .field("policy", &self.policy)
            .finish()
    }
}

impl ToolClient {
    pub fn new(
        transport: Arc<HttpTransport>,
        breaker: Arc<CircuitBreaker>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            executor: RetryExecutor::with_classifier(breaker, RpcClassifier),
            endpoint: endpoint.into(),
            policy: RetryPolicy::default(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Invokes a tool by name.
    ///
    /// A result flagged `isError` is treated as a failed attempt, so tool-level
    /// throttling or outages are retried like transport failures.
    pub async fn call_tool(
        &self,
        ctx: &CallContext,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolResult> {
        let operation = Operation::new("tools/call", name);
        let params = json!({ "name": name, "arguments": arguments });
        self.executor
            .run(ctx, &self.policy, &operation, || {
                let params = params.clone();
                async move {
                    let result: ToolResult = self.call_once("tools/call", Some(params)).await?;
                    if result.is_error {
                        return Err(NotionError::Rpc {
                            code: TOOL_ERROR_CODE,
                            message: result.text(),
                            retry_after: None,
                        });
                    }
                    Ok(result)
                }
            })
            .await
    }

    pub async fn list_tools(&self, ctx: &CallContext) -> Result<Vec<ToolInfo>> {
        let operation = Operation::new("tools/list", &self.endpoint);
        let list: ToolList = self
            .executor
            .run(ctx, &self.policy, &operation, || {
                self.call_once("tools/list", None)
            })
            .await?;
        Ok(list.tools)
    }

    /// One JSON-RPC exchange; each attempt gets a fresh request id.
    async fn call_once<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<T> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        let body = serde_json::to_value(&request)
            .map_err(|err| NotionError::Decode(format!("cannot encode rpc request: {err}")))?;

        let response = self
            .transport
            .perform_once(Method::POST, &self.endpoint, RequestBody::Json(body))
            .await?;
        let envelope: RpcResponse = response.json()?;

        if let Some(error) = envelope.error {
            let retry_after = error
                .data
                .as_ref()
                .and_then(|data| data.get("retry_after"))
                .and_then(|value| value.as_u64())
                .map(Duration::from_secs);
            return Err(NotionError::Rpc {
                code: error.code,
                message: error.message,
                retry_after,
            });
        }

        let result = envelope
            .result
            .ok_or_else(|| NotionError::Decode(format!("rpc response to {method} has no result")))?;
        serde_json::from_value(result)
            .map_err(|err| NotionError::Decode(format!("invalid {method} result: {err}")))
    }
}
