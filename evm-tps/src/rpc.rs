use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use http::{StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::Request;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(#[from] http::uri::InvalidUri),
    #[error("failed to build request: {0}")]
    Request(#[from] http::Error),
    #[error("request failed: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),
    #[error("failed to read response body: {0}")]
    Body(#[from] hyper::Error),
    #[error("request did not have OK status: {0}")]
    Status(StatusCode),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("response has no result field")]
    MissingResult,
    #[error("unexpected result: {0}")]
    InvalidResult(String),
}

/// A JSON-RPC 2.0 endpoint. `call` returns the `result` member of a successful response.
pub trait JsonRpc: Send + Sync {
    fn call(&self, method: &str, params: Value) -> impl Future<Output = Result<Value, RpcError>> + Send;
}

impl<T: JsonRpc> JsonRpc for &T {
    fn call(&self, method: &str, params: Value) -> impl Future<Output = Result<Value, RpcError>> + Send {
        (**self).call(method, params)
    }
}

impl<T: JsonRpc> JsonRpc for Arc<T> {
    fn call(&self, method: &str, params: Value) -> impl Future<Output = Result<Value, RpcError>> + Send {
        (**self).call(method, params)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ErrorObject {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// Classify a raw JSON-RPC response body.
///
/// An `error` member wins over everything else, and a body without a `result` member
/// is a failure even when the transport succeeded. A `null` result is kept as is.
pub fn parse_response(body: &[u8]) -> Result<Value, RpcError> {
    let mut response: Value = serde_json::from_slice(body)?;

    if let Some(error) = response.get_mut("error").map(Value::take) {
        if !error.is_null() {
            let error: ErrorObject = serde_json::from_value(error).unwrap_or_default();
            return Err(RpcError::Rpc { code: error.code, message: error.message });
        }
    }

    response.get_mut("result").map(Value::take).ok_or(RpcError::MissingResult)
}

/// JSON-RPC over HTTP/1 on a pooled keep-alive connection.
#[derive(Clone)]
pub struct HttpClient {
    url: Uri,
    client: Client<HttpConnector, Full<Bytes>>,
    next_id: Arc<AtomicU64>,
}

impl HttpClient {
    pub fn new(endpoint: &str) -> Result<Self, RpcError> {
        let url: Uri = endpoint.parse()?;

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(100)
            .retry_canceled_requests(true)
            .build({
                let mut connector = HttpConnector::new();
                connector.set_nodelay(true);
                connector.set_keepalive(Some(Duration::from_secs(60)));
                connector
            });

        Ok(Self { url, client, next_id: Arc::new(AtomicU64::new(1)) })
    }
}

impl JsonRpc for HttpClient {
    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "jsonrpc": "2.0", "method": method, "params": params, "id": id });

        let req = Request::builder()
            .method("POST")
            .uri(self.url.clone())
            .header("Content-Type", "application/json")
            .body(Full::new(Bytes::from(serde_json::to_vec(&body)?)))?;

        let res = self.client.request(req).await?;
        if res.status() != StatusCode::OK {
            return Err(RpcError::Status(res.status()));
        }

        let body = res.into_body().collect().await?.to_bytes();
        parse_response(&body)
    }
}
