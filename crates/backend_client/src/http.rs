use std::time::Duration;

use anyhow::Context;
use reqwest::{
    StatusCode,
    Url,
};
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::BackendError;

#[derive(Clone, Debug)]
pub struct HttpOptions {
    /// Whole-request deadline. Expiring makes the outcome indefinite.
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(2),
            pool_max_idle_per_host: 64,
        }
    }
}

/// Pooled JSON-over-HTTP client rooted at a backend's base URL. Cheap to
/// clone and safe to share across sessions.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpTransport {
    pub fn new(base_url: &str, options: &HttpOptions) -> anyhow::Result<Self> {
        let mut base_url: Url = base_url
            .parse()
            .with_context(|| format!("Invalid backend url {base_url}"))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .connect_timeout(options.connect_timeout)
            .pool_max_idle_per_host(options.pool_max_idle_per_host)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, base_url })
    }

    /// POSTs `body` to `path` and returns the status and parsed JSON body of
    /// a response that arrived. Transport failures are classified here;
    /// callers classify the status.
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<(StatusCode, JsonValue), BackendError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| BackendError::Definite(format!("invalid path {path}: {e}")))?;
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(classify_transport_error)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(classify_transport_error)?;
        let body = if bytes.is_empty() {
            JsonValue::Null
        } else {
            match serde_json::from_slice(&bytes) {
                Ok(body) => body,
                Err(_) => JsonValue::String(String::from_utf8_lossy(&bytes).into_owned()),
            }
        };
        Ok((status, body))
    }
}

/// Failures before the request was sent are definite. Anything after, such
/// as a timeout or a reset connection, leaves the outcome unknown.
pub(crate) fn classify_transport_error(e: reqwest::Error) -> BackendError {
    if e.is_connect() || e.is_builder() {
        BackendError::Definite(format!("request not sent: {e}"))
    } else if e.is_timeout() {
        BackendError::Indefinite(format!("request timed out: {e}"))
    } else {
        BackendError::Indefinite(format!("request failed: {e}"))
    }
}

/// Non-success statuses: 4xx means the backend refused the operation, 5xx
/// and anything unexpected leave it unknown.
pub(crate) fn classify_status(status: StatusCode, body: &JsonValue) -> Result<(), BackendError> {
    if status.is_success() {
        return Ok(());
    }
    let detail = format!("HTTP {status}: {body}");
    if status.is_client_error() {
        Err(BackendError::Definite(detail))
    } else {
        Err(BackendError::Indefinite(detail))
    }
}
