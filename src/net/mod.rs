//! Network abstraction layer.
//!
//! Everything that talks to the outside world goes through the [`Network`]
//! trait.  The real implementation is [`HttpNetwork`]; the request
//! interceptor (`crate::intercept`) is itself a `Network` that wraps
//! another one, and tests substitute [`testing::FakeNetwork`].
//!
//! [`ResourceFetcher`] sits on top of a `Network` and turns "any response"
//! into "the bytes of a successful response", which is what the loading
//! engine actually wants.

mod http;

pub use http::HttpNetwork;

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, RANGE};
use reqwest::Method;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::FetchError;

/// Progress callback: `(loaded_bytes, total_bytes)`.  `total_bytes` is
/// `None` when the server did not announce a length.
pub type ProgressFn = dyn Fn(u64, Option<u64>) + Send + Sync;

/// An outgoing resource request.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::GET,
            headers: HeaderMap::new(),
        }
    }

    /// Ask for `start..=end` (or `start..` when `end` is `None`).
    pub fn with_range(mut self, start: u64, end: Option<u64>) -> Self {
        let range = match end {
            Some(end) => format!("bytes={start}-{end}"),
            None => format!("bytes={start}-"),
        };
        if let Ok(value) = HeaderValue::from_str(&range) {
            self.headers.insert(RANGE, value);
        }
        self
    }

    /// Partial/progressive fetches carry a `Range` header.
    pub fn is_range(&self) -> bool {
        self.headers.contains_key(RANGE)
    }
}

/// Where a [`Response`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache,
}

/// A fully-buffered response.
#[derive(Debug, Clone)]
pub struct Response {
    /// Final URL after redirects.
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub source: ResponseSource,
}

impl Response {
    /// Status in `200..300`.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A transport that can execute a [`Request`].
///
/// Implementations return `Ok` for every response the server produced,
/// whatever its status; `Err` is reserved for requests that never got an
/// answer.
#[async_trait]
pub trait Network: Send + Sync {
    async fn send(
        &self,
        request: &Request,
        progress: Option<&ProgressFn>,
    ) -> Result<Response, FetchError>;
}

/// The body of a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Retrieves whole resources, failing on non-2xx statuses.
#[derive(Clone)]
pub struct ResourceFetcher {
    network: Arc<dyn Network>,
}

impl std::fmt::Debug for ResourceFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceFetcher").finish_non_exhaustive()
    }
}

impl ResourceFetcher {
    pub fn new(network: Arc<dyn Network>) -> Self {
        Self { network }
    }

    /// Fetch `url` in full, reporting progress as bytes arrive.
    pub async fn fetch(
        &self,
        url: &str,
        on_progress: Option<&ProgressFn>,
    ) -> Result<Fetched, FetchError> {
        let response = self.network.send(&Request::get(url), on_progress).await?;
        if !response.ok() {
            debug!(url, status = response.status, "fetch rejected");
            return Err(FetchError::Http {
                url: url.to_string(),
                status: response.status,
            });
        }
        debug!(url, source = ?response.source, bytes = response.body.len(), "fetched");
        Ok(Fetched {
            bytes: response.body,
            content_type: response.content_type,
        })
    }

    /// Like [`fetch`](Self::fetch), but gives up with
    /// [`FetchError::Aborted`] as soon as `cancel` fires.
    pub async fn fetch_cancellable(
        &self,
        url: &str,
        on_progress: Option<&ProgressFn>,
        cancel: &CancellationToken,
    ) -> Result<Fetched, FetchError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Aborted { url: url.to_string() }),
            result = self.fetch(url, on_progress) => result,
        }
    }
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------

#[cfg(test)]
pub mod testing {
    //! An in-memory [`Network`] for tests.

    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use tokio::sync::Semaphore;

    use super::*;

    #[derive(Debug, Clone)]
    enum Route {
        Reply {
            status: u16,
            content_type: Option<String>,
            body: Vec<u8>,
        },
        Unreachable,
    }

    /// Serves canned responses and records every request it sees.
    ///
    /// Unknown URLs answer `404`.  A URL can be "held" so that requests to
    /// it suspend until [`release`](FakeNetwork::release) is called.
    #[derive(Debug, Default)]
    pub struct FakeNetwork {
        routes: Mutex<HashMap<String, Route>>,
        requests: Mutex<Vec<Request>>,
        gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    }

    impl FakeNetwork {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn serve(&self, url: &str, body: &[u8]) {
            self.serve_with(url, 200, Some("video/mp4"), body);
        }

        pub fn serve_with(&self, url: &str, status: u16, content_type: Option<&str>, body: &[u8]) {
            self.routes.lock().unwrap().insert(
                url.to_string(),
                Route::Reply {
                    status,
                    content_type: content_type.map(String::from),
                    body: body.to_vec(),
                },
            );
        }

        pub fn fail_with_status(&self, url: &str, status: u16) {
            self.serve_with(url, status, None, b"");
        }

        pub fn unreachable(&self, url: &str) {
            self.routes
                .lock()
                .unwrap()
                .insert(url.to_string(), Route::Unreachable);
        }

        /// Make requests for `url` wait until released.
        pub fn hold(&self, url: &str) {
            self.gates
                .lock()
                .unwrap()
                .insert(url.to_string(), Arc::new(Semaphore::new(0)));
        }

        /// Let one held request for `url` through.
        pub fn release(&self, url: &str) {
            if let Some(gate) = self.gates.lock().unwrap().get(url) {
                gate.add_permits(1);
            }
        }

        pub fn requests(&self) -> Vec<Request> {
            self.requests.lock().unwrap().clone()
        }

        pub fn hits(&self, url: &str) -> usize {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.url == url)
                .count()
        }
    }

    #[async_trait]
    impl Network for FakeNetwork {
        async fn send(
            &self,
            request: &Request,
            progress: Option<&ProgressFn>,
        ) -> Result<Response, FetchError> {
            self.requests.lock().unwrap().push(request.clone());

            let gate = self.gates.lock().unwrap().get(&request.url).cloned();
            if let Some(gate) = gate {
                let permit = gate.acquire().await.expect("gate closed");
                permit.forget();
            }

            let route = self.routes.lock().unwrap().get(&request.url).cloned();
            match route {
                Some(Route::Reply {
                    status,
                    content_type,
                    body,
                }) => {
                    if let Some(progress) = progress {
                        let len = body.len() as u64;
                        progress(len, Some(len));
                    }
                    Ok(Response {
                        url: request.url.clone(),
                        status,
                        content_type,
                        body,
                        source: ResponseSource::Network,
                    })
                }
                Some(Route::Unreachable) => Err(FetchError::transport(&request.url, "unreachable")),
                None => Ok(Response {
                    url: request.url.clone(),
                    status: 404,
                    content_type: None,
                    body: Vec::new(),
                    source: ResponseSource::Network,
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::testing::FakeNetwork;
    use super::*;

    #[test]
    fn with_range_sets_header() {
        let req = Request::get("a.mp4").with_range(0, Some(1023));
        assert!(req.is_range());
        assert_eq!(req.headers.get(RANGE).unwrap(), "bytes=0-1023");

        let open = Request::get("a.mp4").with_range(512, None);
        assert_eq!(open.headers.get(RANGE).unwrap(), "bytes=512-");
        assert!(!Request::get("a.mp4").is_range());
    }

    #[tokio::test]
    async fn fetch_returns_body_and_reports_progress() {
        let network = Arc::new(FakeNetwork::new());
        network.serve("a.mp4", b"frames");
        let fetcher = ResourceFetcher::new(network.clone());

        let seen = Arc::new(AtomicU64::new(0));
        let progress = {
            let seen = seen.clone();
            move |loaded: u64, _total: Option<u64>| seen.store(loaded, Ordering::SeqCst)
        };
        let fetched = fetcher.fetch("a.mp4", Some(&progress)).await.unwrap();

        assert_eq!(fetched.bytes, b"frames");
        assert_eq!(fetched.content_type.as_deref(), Some("video/mp4"));
        assert_eq!(seen.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn fetch_maps_non_success_status_to_http_error() {
        let network = Arc::new(FakeNetwork::new());
        let fetcher = ResourceFetcher::new(network);

        let err = fetcher.fetch("missing.mp4", None).await.unwrap_err();
        assert_eq!(
            err,
            FetchError::Http {
                url: "missing.mp4".into(),
                status: 404
            }
        );
    }

    #[tokio::test]
    async fn fetch_cancellable_aborts_a_hung_request() {
        let network = Arc::new(FakeNetwork::new());
        network.serve("slow.mp4", b"x");
        network.hold("slow.mp4");
        let fetcher = ResourceFetcher::new(network);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = fetcher
            .fetch_cancellable("slow.mp4", None, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_aborted());
    }
}
