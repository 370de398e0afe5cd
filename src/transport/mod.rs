//! Transport layer for JSON:API requests
//!
//! The fetch client talks to the backend through the [`Transport`] trait so
//! the HTTP stack can be swapped or mocked.

mod http;

pub use self::http::{HttpTransport, JSONAPI_MEDIA_TYPE};

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::Result;
use crate::key::Params;

/// HTTP method of an [`ApiRequest`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Idempotent read
    Get,
    /// Document write
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => f.write_str("GET"),
            Self::Post => f.write_str("POST"),
        }
    }
}

/// A single request handed to a [`Transport`]
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// HTTP method
    pub method: Method,
    /// Absolute URL without query string
    pub url: String,
    /// Query parameters
    pub params: Params,
    /// JSON document body (writes only)
    pub body: Option<Value>,
}

impl ApiRequest {
    /// A GET request
    #[must_use]
    pub fn get(url: impl Into<String>, params: Params) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            params,
            body: None,
        }
    }

    /// A POST request carrying `body`
    #[must_use]
    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            params: Params::new(),
            body: Some(body),
        }
    }
}

/// Transport trait for JSON:API communication
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and return the decoded response document
    ///
    /// Implementations must report non-success statuses as
    /// [`Error::Status`](crate::Error::Status) so server faults can be
    /// told apart from everything else.
    async fn send(&self, request: &ApiRequest) -> Result<Value>;
}
