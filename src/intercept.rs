//! Cache-first request interception.
//!
//! [`RequestInterceptor`] wraps another [`Network`] and is itself a
//! `Network`, so anything that fetches through it transparently gets:
//!
//! * **bypass** for non-GET requests and for byte-range requests; a range
//!   request means a media element is streaming progressively and must
//!   reach the network untouched;
//! * **cache-first** answers for everything else;
//! * **opportunistic fill**: successful same-origin network responses are
//!   stored under the current generation.
//!
//! It also owns the two lifecycle steps of the cache: [`install`] pre-caches
//! the app shell, and activation is delegated to [`MediaCache::activate`].
//!
//! [`install`]: RequestInterceptor::install

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Method, Url};
use tracing::{debug, info, warn};

use crate::cache::MediaCache;
use crate::error::FetchError;
use crate::net::{Network, ProgressFn, Request, Response, ResponseSource};

pub struct RequestInterceptor {
    cache: Arc<MediaCache>,
    network: Arc<dyn Network>,
    /// Origin the app was loaded from.  Responses from other origins are
    /// treated as opaque and never stored.
    scope: Option<Url>,
}

impl RequestInterceptor {
    pub fn new(cache: Arc<MediaCache>, network: Arc<dyn Network>, scope: Option<Url>) -> Self {
        Self {
            cache,
            network,
            scope,
        }
    }

    /// Pre-cache the app shell.
    ///
    /// All-or-nothing: every URL is fetched first and nothing is stored
    /// unless all of them succeeded.  Returns the number of entries stored.
    pub async fn install(&self, shell: &[String]) -> Result<usize, FetchError> {
        let mut fetched = Vec::with_capacity(shell.len());
        for url in shell {
            let response = self.network.send(&Request::get(url.as_str()), None).await?;
            if !response.ok() {
                return Err(FetchError::Http {
                    url: url.clone(),
                    status: response.status,
                });
            }
            fetched.push((url, response));
        }

        let mut stored = 0;
        for (url, response) in fetched {
            match self
                .cache
                .put(url, &response.body, response.content_type.as_deref())
                .await
            {
                Ok(()) => stored += 1,
                Err(e) => warn!(url = %url, error = %e, "could not store app shell resource"),
            }
        }
        info!(stored, generation = self.cache.generation(), "app shell installed");
        Ok(stored)
    }

    /// Answer `request` from the cache when allowed and possible, otherwise
    /// from the network.
    pub async fn handle(
        &self,
        request: &Request,
        progress: Option<&ProgressFn>,
    ) -> Result<Response, FetchError> {
        if request.method != Method::GET || request.is_range() {
            debug!(url = %request.url, method = %request.method, "interceptor bypass");
            return self.network.send(request, progress).await;
        }

        match self.cache.get(&request.url).await {
            Ok(Some(entry)) => {
                debug!(url = %request.url, "served from cache");
                return Ok(Response {
                    url: request.url.clone(),
                    status: 200,
                    content_type: entry.content_type,
                    body: entry.bytes,
                    source: ResponseSource::Cache,
                });
            }
            Ok(None) => {}
            Err(e) => warn!(url = %request.url, error = %e, "cache read failed, using network"),
        }

        let response = self.network.send(request, progress).await?;
        if response.ok() && !self.is_opaque(&response.url) {
            if let Err(e) = self
                .cache
                .put(&request.url, &response.body, response.content_type.as_deref())
                .await
            {
                warn!(url = %request.url, error = %e, "could not cache response");
            }
        } else {
            debug!(url = %request.url, status = response.status, "response not cacheable");
        }
        Ok(response)
    }

    /// Cross-origin responses are opaque.  Relative URLs are same-origin.
    fn is_opaque(&self, url: &str) -> bool {
        match (&self.scope, Url::parse(url)) {
            (Some(scope), Ok(url)) => url.origin() != scope.origin(),
            _ => false,
        }
    }
}

#[async_trait]
impl Network for RequestInterceptor {
    async fn send(
        &self,
        request: &Request,
        progress: Option<&ProgressFn>,
    ) -> Result<Response, FetchError> {
        self.handle(request, progress).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::testing::FakeNetwork;
    use tempfile::TempDir;

    async fn setup(
        scope: Option<&str>,
    ) -> (TempDir, Arc<MediaCache>, Arc<FakeNetwork>, RequestInterceptor) {
        let tmp = TempDir::new().unwrap();
        let cache = Arc::new(MediaCache::open(tmp.path(), "v1").await.unwrap());
        let network = Arc::new(FakeNetwork::new());
        let interceptor = RequestInterceptor::new(
            cache.clone(),
            network.clone(),
            scope.map(|s| Url::parse(s).unwrap()),
        );
        (tmp, cache, network, interceptor)
    }

    #[tokio::test]
    async fn range_requests_always_reach_the_network() {
        let (_tmp, cache, network, interceptor) = setup(None).await;
        cache.put("a.mp4", b"cached", None).await.unwrap();
        network.serve_with("a.mp4", 206, Some("video/mp4"), b"part");
        let before = cache.stats();

        let response = interceptor
            .handle(&Request::get("a.mp4").with_range(0, Some(3)), None)
            .await
            .unwrap();

        assert_eq!(response.source, ResponseSource::Network);
        assert_eq!(response.body, b"part");
        assert_eq!(network.hits("a.mp4"), 1);
        assert!(network.requests()[0].is_range());
        assert_eq!(cache.stats(), before, "cache must not be consulted or written");
    }

    #[tokio::test]
    async fn non_get_requests_bypass_the_cache() {
        let (_tmp, cache, network, interceptor) = setup(None).await;
        network.serve("upload", b"ok");

        let mut request = Request::get("upload");
        request.method = Method::POST;
        interceptor.handle(&request, None).await.unwrap();

        assert_eq!(network.hits("upload"), 1);
        assert!(!cache.contains("upload").await.unwrap());
    }

    #[tokio::test]
    async fn miss_fills_cache_and_next_request_is_served_offline() {
        let (_tmp, _cache, network, interceptor) = setup(Some("http://app.local/")).await;
        network.serve_with("http://app.local/style.css", 200, Some("text/css"), b"body{}");

        let first = interceptor
            .handle(&Request::get("http://app.local/style.css"), None)
            .await
            .unwrap();
        assert_eq!(first.source, ResponseSource::Network);

        let second = interceptor
            .handle(&Request::get("http://app.local/style.css"), None)
            .await
            .unwrap();
        assert_eq!(second.source, ResponseSource::Cache);
        assert_eq!(second.body, b"body{}");
        assert_eq!(second.content_type.as_deref(), Some("text/css"));
        assert_eq!(network.hits("http://app.local/style.css"), 1);
    }

    #[tokio::test]
    async fn error_statuses_are_passed_through_but_not_stored() {
        let (_tmp, cache, network, interceptor) = setup(None).await;
        network.fail_with_status("gone.mp4", 410);

        let response = interceptor.handle(&Request::get("gone.mp4"), None).await.unwrap();
        assert_eq!(response.status, 410);
        assert!(!cache.contains("gone.mp4").await.unwrap());
    }

    #[tokio::test]
    async fn cross_origin_responses_are_not_stored() {
        let (_tmp, cache, network, interceptor) = setup(Some("http://app.local/")).await;
        network.serve("http://cdn.elsewhere/font.woff", b"glyphs");

        let response = interceptor
            .handle(&Request::get("http://cdn.elsewhere/font.woff"), None)
            .await
            .unwrap();
        assert!(response.ok());
        assert!(!cache.contains("http://cdn.elsewhere/font.woff").await.unwrap());
    }

    #[tokio::test]
    async fn network_failure_without_cached_copy_is_an_error() {
        let (_tmp, _cache, network, interceptor) = setup(None).await;
        network.unreachable("videos.json");

        let err = interceptor.handle(&Request::get("videos.json"), None).await.unwrap_err();
        assert!(matches!(err, FetchError::Transport { .. }));
    }

    #[tokio::test]
    async fn install_stores_every_shell_resource() {
        let (_tmp, cache, network, interceptor) = setup(None).await;
        network.serve_with("videos.json", 200, Some("application/json"), b"[]");
        network.serve_with("index.html", 200, Some("text/html"), b"<html>");

        let shell = vec!["videos.json".to_string(), "index.html".to_string()];
        assert_eq!(interceptor.install(&shell).await.unwrap(), 2);
        assert!(cache.contains("videos.json").await.unwrap());
        assert!(cache.contains("index.html").await.unwrap());
    }

    #[tokio::test]
    async fn install_is_all_or_nothing() {
        let (_tmp, cache, network, interceptor) = setup(None).await;
        network.serve("videos.json", b"[]");
        // index.html is unknown to the fake network and answers 404.

        let shell = vec!["videos.json".to_string(), "index.html".to_string()];
        let err = interceptor.install(&shell).await.unwrap_err();

        assert!(matches!(err, FetchError::Http { status: 404, .. }));
        assert!(!cache.contains("videos.json").await.unwrap());
    }
}
