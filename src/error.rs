//! Error types for the JSON:API fetch client

use thiserror::Error;

/// Result type alias for the fetch client
pub type Result<T> = std::result::Result<T, Error>;

/// Fetch client errors
///
/// Errors are `Clone` because a single deduplicated request fans its outcome
/// out to every caller attached to it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Empty or otherwise unusable resource path
    #[error("Invalid resource path: {0:?}")]
    InvalidPath(String),

    /// The backend answered with a non-success status
    #[error("HTTP {status} from {url}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Requested URL (without query string)
        url: String,
        /// Response body, if any was readable
        body: String,
    },

    /// Connection-level failure (unreachable host, TLS, reset)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Request timed out in the transport
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// Response body could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),
}

impl Error {
    /// HTTP status code carried by this error, if any
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// `true` for server faults (HTTP 500-599), the only retryable class
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(self.status(), Some(500..=599))
    }

    /// `true` for client faults (HTTP 400-499)
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self.status(), Some(400..=499))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            Self::Status {
                status: status.as_u16(),
                url: e.url().map(|u| u.as_str().to_string()).unwrap_or_default(),
                body: String::new(),
            }
        } else {
            Self::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

impl From<figment::Error> for Error {
    fn from(e: figment::Error) -> Self {
        Self::Config(e.to_string())
    }
}
