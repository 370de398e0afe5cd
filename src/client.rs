//! Resource fetch client
//!
//! [`ResourceClient`] serves JSON:API reads from a TTL cache, collapses
//! concurrent identical reads into one backend call and retries server faults.
//! Writes go straight to the backend and invalidate the cached document at
//! the written path.
//!
//! Each client owns its own cache and in-flight table. Clones share them, so
//! create one client per session or tenant rather than a process-wide one.

use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

use crate::cache::{CacheStatsSnapshot, ResponseCache};
use crate::config::ClientConfig;
use crate::key::{CacheKey, Params, Scalar};
use crate::retry::{RetryPolicy, with_retry};
use crate::transport::{ApiRequest, HttpTransport, Transport};
use crate::{Error, Result};

/// A read in flight, shared by every caller that asked for the same key
type PendingRequest = Shared<BoxFuture<'static, Result<Value>>>;

/// Per-call options for [`ResourceClient::fetch_resource`]
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOptions {
    /// Query parameters
    pub params: Params,
    /// Read from and store to the cache (default `true`)
    pub cache: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            params: Params::new(),
            cache: true,
        }
    }
}

impl FetchOptions {
    /// Default options: no parameters, caching on
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the parameter set
    #[must_use]
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Add one query parameter
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.params.insert(name, value);
        self
    }

    /// Bypass the cache for this call
    #[must_use]
    pub fn no_cache(mut self) -> Self {
        self.cache = false;
        self
    }
}

struct Inner {
    jsonapi_root: String,
    cache_enabled: bool,
    transport: Arc<dyn Transport>,
    cache: ResponseCache,
    pending: Mutex<HashMap<CacheKey, PendingRequest>>,
    read_policy: RetryPolicy,
    write_policy: RetryPolicy,
}

impl Inner {
    /// Run one deduplicated read to completion
    ///
    /// The cache is written before the pending entry is removed so a caller
    /// arriving in between always finds one or the other.
    async fn run_read(self: Arc<Self>, key: CacheKey, request: ApiRequest, store: bool) -> Result<Value> {
        let result = with_retry(&self.read_policy, &request.url, || {
            self.transport.send(&request)
        })
        .await;

        if store {
            if let Ok(value) = &result {
                self.cache.set(key.clone(), value.clone());
            }
        }
        self.pending.lock().remove(&key);

        result
    }
}

/// Caching, deduplicating, retrying JSON:API client
#[derive(Clone)]
pub struct ResourceClient {
    inner: Arc<Inner>,
}

impl ResourceClient {
    /// Create a client over an explicit transport
    #[must_use]
    pub fn new(config: &ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(Inner {
                jsonapi_root: config.jsonapi_root(),
                cache_enabled: config.cache.enabled,
                transport,
                cache: ResponseCache::new(config.cache.ttl, config.cache.max_entries),
                pending: Mutex::new(HashMap::new()),
                read_policy: RetryPolicy::new(&config.read_retry),
                write_policy: RetryPolicy::new(&config.write_retry),
            }),
        }
    }

    /// Create a client over the default HTTP transport
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let transport = HttpTransport::new(config.timeout)?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    /// The JSON:API entry point URL
    #[must_use]
    pub fn jsonapi_root(&self) -> &str {
        &self.inner.jsonapi_root
    }

    /// Absolute URL of a resource path such as `webform/webform/contact`
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] for an empty path.
    pub fn resource_url(&self, path: &str) -> Result<String> {
        let trimmed = path.trim().trim_matches('/');
        if trimmed.is_empty() {
            return Err(Error::InvalidPath(path.to_string()));
        }
        Ok(format!("{}/{trimmed}", self.inner.jsonapi_root))
    }

    /// Cache key a read of `path` with `params` is stored under
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] for an empty path.
    pub fn cache_key(&self, path: &str, params: &Params) -> Result<CacheKey> {
        Ok(CacheKey::new(&self.resource_url(path)?, params))
    }

    /// Fetch the JSON:API index document
    ///
    /// Served from cache when fresh, otherwise fetched and cached.
    pub async fn fetch_index(&self) -> Result<Value> {
        let inner = &self.inner;
        let key = CacheKey::base(&inner.jsonapi_root);

        if inner.cache_enabled {
            if let Some(value) = inner.cache.get(&key) {
                return Ok(value);
            }
        }

        let request = ApiRequest::get(inner.jsonapi_root.clone(), Params::new());
        let value = with_retry(&inner.read_policy, "fetch_index", || {
            inner.transport.send(&request)
        })
        .await?;

        if inner.cache_enabled {
            inner.cache.set(key, value.clone());
        }
        Ok(value)
    }

    /// Fetch a resource with caching and deduplication
    ///
    /// 1. A fresh cached document is returned without a backend call (unless
    ///    `options.cache` is off).
    /// 2. A read already in flight for the same key is joined; every joined
    ///    caller gets the same value or the same error.
    /// 3. Otherwise a new retrying read is registered and awaited.
    pub async fn fetch_resource(&self, path: &str, options: FetchOptions) -> Result<Value> {
        let url = self.resource_url(path)?;
        let key = CacheKey::new(&url, &options.params);
        let use_cache = options.cache && self.inner.cache_enabled;

        if use_cache {
            if let Some(value) = self.inner.cache.get(&key) {
                return Ok(value);
            }
        }

        // Lookup and registration happen under one lock acquisition
        let request = {
            let mut pending = self.inner.pending.lock();
            if let Some(existing) = pending.get(&key) {
                debug!(key = %key, "Joining in-flight request");
                existing.clone()
            } else {
                let request = ApiRequest::get(url, options.params);
                let shared = Arc::clone(&self.inner)
                    .run_read(key.clone(), request, use_cache)
                    .boxed()
                    .shared();
                pending.insert(key, shared.clone());
                shared
            }
        };

        request.await
    }

    /// Fetch a resource and deserialize it into `T`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the document does not match `T`.
    pub async fn fetch_resource_as<T: DeserializeOwned>(
        &self,
        path: &str,
        options: FetchOptions,
    ) -> Result<T> {
        let value = self.fetch_resource(path, options).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Post a JSON:API document
    ///
    /// Uses the write retry policy and is never deduplicated. Once the attempt
    /// sequence finishes, successfully or not, the cached document at `path`
    /// (without parameters) is dropped.
    pub async fn post_resource(&self, path: &str, body: &Value) -> Result<Value> {
        let inner = &self.inner;
        let url = self.resource_url(path)?;
        let request = ApiRequest::post(url.clone(), body.clone());

        let result = with_retry(&inner.write_policy, &url, || inner.transport.send(&request)).await;

        if inner.cache.remove(&CacheKey::base(&url)) {
            info!(url = %url, "Invalidated cached resource after write");
        }

        result
    }

    /// Remove one cache entry, or every entry when `key` is `None`
    pub fn invalidate(&self, key: Option<&CacheKey>) {
        match key {
            Some(key) => {
                self.inner.cache.remove(key);
            }
            None => self.inner.cache.clear(),
        }
    }

    /// Remove the cached document at `path` (without parameters)
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] for an empty path.
    pub fn invalidate_path(&self, path: &str) -> Result<()> {
        let key = CacheKey::base(&self.resource_url(path)?);
        self.invalidate(Some(&key));
        Ok(())
    }

    /// Drop every expired cache entry
    pub fn evict_expired(&self) {
        self.inner.cache.evict_expired();
    }

    /// Cache statistics
    #[must_use]
    pub fn cache_stats(&self) -> CacheStatsSnapshot {
        self.inner.cache.stats()
    }

    /// Number of reads currently in flight
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use futures::future::join_all;
    use serde::Deserialize;
    use serde_json::json;
    use tokio::time::Instant;

    use crate::transport::Method;

    const BASE: &str = "https://api.test";

    /// Scripted transport: pops queued outcomes, then falls back to a default
    struct MockTransport {
        calls: AtomicUsize,
        requests: Mutex<Vec<(Instant, ApiRequest)>>,
        script: Mutex<VecDeque<Result<Value>>>,
        fallback: Result<Value>,
        latency: Duration,
    }

    impl MockTransport {
        fn new(fallback: Result<Value>) -> Arc<Self> {
            Self::scripted(Vec::new(), fallback, Duration::ZERO)
        }

        fn scripted(
            script: Vec<Result<Value>>,
            fallback: Result<Value>,
            latency: Duration,
        ) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
                script: Mutex::new(script.into()),
                fallback,
                latency,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn requests(&self) -> Vec<ApiRequest> {
            self.requests.lock().iter().map(|(_, r)| r.clone()).collect()
        }

        fn times(&self) -> Vec<Instant> {
            self.requests.lock().iter().map(|(t, _)| *t).collect()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&self, request: &ApiRequest) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().push((Instant::now(), request.clone()));
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            let next = self.script.lock().pop_front();
            next.unwrap_or_else(|| self.fallback.clone())
        }
    }

    fn status(code: u16) -> Error {
        Error::Status {
            status: code,
            url: format!("{BASE}/jsonapi/x"),
            body: String::new(),
        }
    }

    fn config() -> ClientConfig {
        ClientConfig::default().with_base_url(BASE)
    }

    fn client(transport: &Arc<MockTransport>) -> ResourceClient {
        ResourceClient::new(&config(), transport.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_index_is_cached() {
        let transport = MockTransport::new(Ok(json!({"links": {}})));
        let client = client(&transport);

        let first = client.fetch_index().await.unwrap();
        let second = client.fetch_index().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(transport.calls(), 1);
        let request = &transport.requests()[0];
        assert_eq!(request.method, Method::Get);
        assert_eq!(request.url, "https://api.test/jsonapi");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_resource_builds_url_and_params() {
        let transport = MockTransport::new(Ok(json!({"data": []})));
        let client = client(&transport);

        client
            .fetch_resource(
                "/domain/domain/",
                FetchOptions::new().param("filter[hostname]", "aarhus.dk"),
            )
            .await
            .unwrap();

        let request = &transport.requests()[0];
        assert_eq!(request.url, "https://api.test/jsonapi/domain/domain");
        assert_eq!(
            request.params,
            Params::new().with("filter[hostname]", "aarhus.dk")
        );
        assert_eq!(request.body, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_skips_transport() {
        let transport = MockTransport::new(Ok(json!({"data": {"id": "1"}})));
        let client = client(&transport);

        client.fetch_resource("node/page", FetchOptions::new()).await.unwrap();
        let cached = client.fetch_resource("node/page", FetchOptions::new()).await.unwrap();

        assert_eq!(cached, json!({"data": {"id": "1"}}));
        assert_eq!(transport.calls(), 1);
        assert_eq!(client.cache_stats().hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_freshness_boundary() {
        let transport = MockTransport::new(Ok(json!({"data": []})));
        let client = client(&transport);
        let ttl = config().cache.ttl;

        client.fetch_resource("node/page", FetchOptions::new()).await.unwrap();

        tokio::time::advance(ttl - Duration::from_millis(1)).await;
        client.fetch_resource("node/page", FetchOptions::new()).await.unwrap();
        assert_eq!(transport.calls(), 1);

        tokio::time::advance(Duration::from_millis(2)).await;
        client.fetch_resource("node/page", FetchOptions::new()).await.unwrap();
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_reads_are_deduplicated() {
        let transport = MockTransport::scripted(
            Vec::new(),
            Ok(json!({"data": {"type": "webform--webform"}})),
            Duration::from_millis(50),
        );
        let client = client(&transport);

        let results = join_all((0..5).map(|_| {
            client.fetch_resource("webform/webform/contact", FetchOptions::new())
        }))
        .await;

        assert_eq!(transport.calls(), 1);
        assert_eq!(results.len(), 5);
        for result in results {
            assert_eq!(result, Ok(json!({"data": {"type": "webform--webform"}})));
        }
        assert_eq!(client.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dedup_applies_without_cache() {
        let transport =
            MockTransport::scripted(Vec::new(), Ok(json!(1)), Duration::from_millis(50));
        let client = client(&transport);

        let results = join_all((0..3).map(|_| {
            client.fetch_resource("workflow/execution/status", FetchOptions::new().no_cache())
        }))
        .await;

        assert_eq!(transport.calls(), 1);
        assert!(results.iter().all(|r| r == &Ok(json!(1))));
        assert_eq!(client.cache_stats().size, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deduplicated_callers_share_the_error() {
        let transport =
            MockTransport::scripted(Vec::new(), Err(status(404)), Duration::from_millis(50));
        let client = client(&transport);

        let results = join_all((0..4).map(|_| {
            client.fetch_resource("mitid/session/abc", FetchOptions::new())
        }))
        .await;

        assert_eq!(transport.calls(), 1);
        assert!(results.iter().all(|r| r == &Err(status(404))));
        assert_eq!(client.in_flight(), 0);
        assert_eq!(client.cache_stats().size, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_server_errors_on_reads() {
        let transport = MockTransport::scripted(
            vec![Err(status(500)), Err(status(500))],
            Ok(json!({"data": "ok"})),
            Duration::ZERO,
        );
        let client = client(&transport);

        let value = client
            .fetch_resource("workflow/execution/7/status", FetchOptions::new())
            .await
            .unwrap();

        assert_eq!(value, json!({"data": "ok"}));
        assert_eq!(transport.calls(), 3);
        let times = transport.times();
        assert_eq!(times[1] - times[0], Duration::from_millis(1000));
        assert_eq!(times[2] - times[1], Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_is_not_retried() {
        let transport = MockTransport::new(Err(status(404)));
        let client = client(&transport);
        let started = Instant::now();

        let result = client.fetch_resource("node/missing", FetchOptions::new()).await;

        assert_eq!(result, Err(status(404)));
        assert_eq!(transport.calls(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_invalidates_cached_read() {
        let transport = MockTransport::scripted(
            vec![Ok(json!({"data": "v1"})), Ok(json!({"data": "created"}))],
            Ok(json!({"data": "v2"})),
            Duration::ZERO,
        );
        let client = client(&transport);
        let path = "webform_submission/123";

        assert_eq!(
            client.fetch_resource(path, FetchOptions::new()).await.unwrap(),
            json!({"data": "v1"})
        );

        let body = json!({"data": {"type": "webform_submission--contact"}});
        client.post_resource(path, &body).await.unwrap();

        assert_eq!(
            client.fetch_resource(path, FetchOptions::new()).await.unwrap(),
            json!({"data": "v2"})
        );
        assert_eq!(transport.calls(), 3);

        let post = &transport.requests()[1];
        assert_eq!(post.method, Method::Post);
        assert_eq!(post.url, "https://api.test/jsonapi/webform_submission/123");
        assert_eq!(post.body, Some(body));
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_invalidates_even_on_failure() {
        let transport = MockTransport::scripted(
            vec![Ok(json!("cached")), Err(status(422))],
            Ok(json!("fresh")),
            Duration::ZERO,
        );
        let client = client(&transport);

        client.fetch_resource("node/page", FetchOptions::new()).await.unwrap();
        let result = client.post_resource("node/page", &json!({"data": {}})).await;

        assert_eq!(result, Err(status(422)));
        assert_eq!(
            client.fetch_resource("node/page", FetchOptions::new()).await.unwrap(),
            json!("fresh")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_uses_write_retry_budget() {
        let transport = MockTransport::new(Err(status(503)));
        let client = client(&transport);

        let result = client.post_resource("node/page", &json!({"data": {}})).await;

        assert_eq!(result, Err(status(503)));
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_posts_are_not_deduplicated() {
        let transport =
            MockTransport::scripted(Vec::new(), Ok(json!({})), Duration::from_millis(50));
        let client = client(&transport);
        let body = json!({"data": {}});

        let results = join_all((0..2).map(|_| client.post_resource("node/page", &body))).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_params_are_distinct_entries() {
        let transport = MockTransport::scripted(
            vec![Ok(json!("a=1")), Ok(json!("a=2"))],
            Ok(json!("unexpected")),
            Duration::ZERO,
        );
        let client = client(&transport);

        let one = client.fetch_resource("x", FetchOptions::new().param("a", 1)).await;
        let two = client.fetch_resource("x", FetchOptions::new().param("a", 2)).await;
        let one_again = client.fetch_resource("x", FetchOptions::new().param("a", 1)).await;

        assert_eq!(one, Ok(json!("a=1")));
        assert_eq!(two, Ok(json!("a=2")));
        assert_eq!(one_again, Ok(json!("a=1")));
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_param_order_shares_entry() {
        let transport = MockTransport::new(Ok(json!("doc")));
        let client = client(&transport);

        let ab = Params::new().with("a", 1).with("b", true);
        let ba = Params::new().with("b", true).with("a", 1);
        client.fetch_resource("x", FetchOptions::new().with_params(ab)).await.unwrap();
        client.fetch_resource("x", FetchOptions::new().with_params(ba)).await.unwrap();

        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_all_clears_cache() {
        let transport = MockTransport::new(Ok(json!("doc")));
        let client = client(&transport);

        client.fetch_index().await.unwrap();
        client.fetch_resource("a", FetchOptions::new()).await.unwrap();
        client.fetch_resource("b", FetchOptions::new()).await.unwrap();
        assert_eq!(transport.calls(), 3);

        client.invalidate(None);
        assert_eq!(client.cache_stats().size, 0);

        client.fetch_index().await.unwrap();
        client.fetch_resource("a", FetchOptions::new()).await.unwrap();
        client.fetch_resource("b", FetchOptions::new()).await.unwrap();
        assert_eq!(transport.calls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_single_key() {
        let transport = MockTransport::new(Ok(json!("doc")));
        let client = client(&transport);

        client.fetch_resource("a", FetchOptions::new()).await.unwrap();
        client.fetch_resource("b", FetchOptions::new()).await.unwrap();

        let key = client.cache_key("a", &Params::new()).unwrap();
        client.invalidate(Some(&key));
        client.invalidate_path("b").unwrap();
        client.fetch_resource("a", FetchOptions::new()).await.unwrap();

        assert_eq!(transport.calls(), 3);
        assert_eq!(client.cache_stats().size, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_cache_option_always_fetches() {
        let transport = MockTransport::new(Ok(json!("doc")));
        let client = client(&transport);

        client.fetch_resource("a", FetchOptions::new().no_cache()).await.unwrap();
        client.fetch_resource("a", FetchOptions::new().no_cache()).await.unwrap();

        assert_eq!(transport.calls(), 2);
        assert_eq!(client.cache_stats().size, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_globally_disabled_cache() {
        let transport = MockTransport::new(Ok(json!("doc")));
        let mut config = config();
        config.cache.enabled = false;
        let client = ResourceClient::new(&config, transport.clone());

        client.fetch_index().await.unwrap();
        client.fetch_index().await.unwrap();
        client.fetch_resource("a", FetchOptions::new()).await.unwrap();
        client.fetch_resource("a", FetchOptions::new()).await.unwrap();

        assert_eq!(transport.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_path_is_rejected() {
        let transport = MockTransport::new(Ok(json!("doc")));
        let client = client(&transport);

        let result = client.fetch_resource(" / ", FetchOptions::new()).await;

        assert!(matches!(result, Err(Error::InvalidPath(_))));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_resource_as() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Document {
            data: Vec<String>,
        }

        let transport = MockTransport::new(Ok(json!({"data": ["a", "b"]})));
        let client = client(&transport);

        let doc: Document = client
            .fetch_resource_as("node/page", FetchOptions::new())
            .await
            .unwrap();
        assert_eq!(doc.data, vec!["a", "b"]);

        let bad: Result<Vec<u32>> = client
            .fetch_resource_as("node/page", FetchOptions::new())
            .await;
        assert!(matches!(bad, Err(Error::Decode(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_caller_does_not_cancel_shared_read() {
        let transport =
            MockTransport::scripted(Vec::new(), Ok(json!("doc")), Duration::from_millis(50));
        let client = client(&transport);

        let first = client.fetch_resource("a", FetchOptions::new());
        let second = client.fetch_resource("a", FetchOptions::new());
        // Poll the first caller once so the read is registered, then drop it
        tokio::select! {
            biased;
            _ = first => panic!("read should still be pending"),
            () = tokio::time::sleep(Duration::from_millis(10)) => {}
        }
        assert_eq!(client.in_flight(), 1);

        assert_eq!(second.await, Ok(json!("doc")));
        assert_eq!(transport.calls(), 1);
        assert_eq!(client.in_flight(), 0);
    }
}
