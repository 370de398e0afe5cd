//! JSON:API fetch client
//!
//! Caching, deduplicating, retrying client for Drupal JSON:API backends.
//!
//! # Features
//!
//! - **Response cache**: TTL-based, lazily expired, optionally size-bounded
//! - **Request deduplication**: concurrent identical reads share one backend call
//! - **Retries**: exponential backoff on server faults (5xx) only
//! - **Write invalidation**: posting to a path drops its cached document
//!
//! # Example
//!
//! ```no_run
//! use jsonapi_fetch::{ClientConfig, FetchOptions, ResourceClient};
//!
//! # async fn run() -> jsonapi_fetch::Result<()> {
//! let config = ClientConfig::load(None)?;
//! let client = ResourceClient::from_config(&config)?;
//!
//! let domains = client
//!     .fetch_resource(
//!         "domain/domain",
//!         FetchOptions::new().param("filter[hostname]", "aarhus.dk"),
//!     )
//!     .await?;
//! # let _ = domains;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod key;
pub mod retry;
pub mod transport;

pub use client::{FetchOptions, ResourceClient};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use key::{CacheKey, Params, Scalar};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// Logs go to stderr so command output on stdout stays machine-readable.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let result = match format {
        Some("json") => subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        _ => subscriber
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };

    result.map_err(|e| Error::Config(format!("Failed to install tracing subscriber: {e}")))
}
