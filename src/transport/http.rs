//! HTTP transport implementation (reqwest)

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, header};
use serde_json::Value;
use tracing::debug;

use super::{ApiRequest, Method, Transport};
use crate::{Error, Result};

/// JSON:API media type used for `Accept` and `Content-Type`
pub const JSONAPI_MEDIA_TYPE: &str = "application/vnd.api+json";

/// HTTP transport for JSON:API backends
#[derive(Debug, Clone)]
pub struct HttpTransport {
    /// HTTP client
    client: Client,
}

impl HttpTransport {
    /// Create a new HTTP transport with the given per-request timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("jsonapi-fetch/", env!("CARGO_PKG_VERSION")))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ApiRequest) -> Result<Value> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        }
        .header(header::ACCEPT, JSONAPI_MEDIA_TYPE);

        if !request.params.is_empty() {
            builder = builder.query(&request.params.pairs());
        }

        if let Some(body) = &request.body {
            builder = builder
                .header(header::CONTENT_TYPE, JSONAPI_MEDIA_TYPE)
                .body(serde_json::to_vec(body)?);
        }

        debug!(method = %request.method, url = %request.url, "Sending request");

        let response = builder.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        if !status.is_success() {
            debug!(url = %request.url, status = status.as_u16(), "Request failed");
            return Err(Error::Status {
                status: status.as_u16(),
                url: request.url.clone(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        // 204 No Content and friends
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }

        serde_json::from_slice(&bytes)
            .map_err(|e| Error::Decode(format!("{}: {e}", request.url)))
    }
}
