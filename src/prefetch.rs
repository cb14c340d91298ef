//! Background offline download.
//!
//! [`BackgroundPrefetchScheduler`] walks the whole feed strictly in order,
//! one item at a time, and makes sure every video is in the cache.  Progress
//! is reported after each item as `(cached, total)`.
//!
//! The walk is fail-fast: the first failure ends it, the remaining items
//! are not attempted, and a terminal `Failed` event is emitted.  A user who
//! asked for an offline copy must not be left believing a partial set is
//! complete.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::MediaCache;
use crate::feed::FeedItem;
use crate::net::ResourceFetcher;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefetchEvent {
    Progress { cached: usize, total: usize },
    Completed { total: usize },
    Failed {
        cached: usize,
        total: usize,
        url: String,
        reason: String,
    },
    Aborted { cached: usize, total: usize },
}

impl PrefetchEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}

pub struct BackgroundPrefetchScheduler {
    cache: Arc<MediaCache>,
    fetcher: ResourceFetcher,
    cancel: CancellationToken,
}

impl BackgroundPrefetchScheduler {
    pub fn new(
        cache: Arc<MediaCache>,
        fetcher: ResourceFetcher,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            cache,
            fetcher,
            cancel,
        }
    }

    /// Run [`run_all`](Self::run_all) on a background task and return its
    /// event stream.  The stream ends after the terminal event.
    pub fn spawn(
        self,
        items: Vec<FeedItem>,
    ) -> (mpsc::UnboundedReceiver<PrefetchEvent>, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            self.run_all(&items, &tx).await;
        });
        (rx, handle)
    }

    /// Cache every item in order.  Emits progress on `tx` and returns the
    /// terminal event (which is also sent).
    pub async fn run_all(
        &self,
        items: &[FeedItem],
        tx: &mpsc::UnboundedSender<PrefetchEvent>,
    ) -> PrefetchEvent {
        let total = items.len();
        let mut cached = 0;
        info!(total, "offline download started");

        let terminal = 'walk: {
            for item in items {
                if self.cancel.is_cancelled() {
                    break 'walk PrefetchEvent::Aborted { cached, total };
                }
                let url = item.source_url.as_str();

                let present = match self.cache.contains(url).await {
                    Ok(present) => present,
                    Err(e) => {
                        warn!(url, error = %e, "cache lookup failed, refetching");
                        false
                    }
                };

                if present {
                    debug!(url, "already cached");
                } else {
                    let result = self.fetcher.fetch_cancellable(url, None, &self.cancel).await;
                    let fetched = match result {
                        Ok(fetched) => fetched,
                        Err(e) if e.is_aborted() => {
                            break 'walk PrefetchEvent::Aborted { cached, total }
                        }
                        Err(e) => {
                            break 'walk PrefetchEvent::Failed {
                                cached,
                                total,
                                url: e.url().to_string(),
                                reason: e.to_string(),
                            }
                        }
                    };
                    if let Err(e) = self
                        .cache
                        .put(url, &fetched.bytes, fetched.content_type.as_deref())
                        .await
                    {
                        break 'walk PrefetchEvent::Failed {
                            cached,
                            total,
                            url: url.to_string(),
                            reason: e.to_string(),
                        };
                    }
                }

                cached += 1;
                let _ = tx.send(PrefetchEvent::Progress { cached, total });
            }
            PrefetchEvent::Completed { total }
        };

        match &terminal {
            PrefetchEvent::Completed { total } => info!(total, "offline download complete"),
            PrefetchEvent::Failed { url, reason, .. } => {
                warn!(url, reason, cached, "offline download failed")
            }
            _ => info!(cached, total, "offline download aborted"),
        }
        let _ = tx.send(terminal.clone());
        terminal
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

    async fn scheduler(
        network: Arc<FakeNetwork>,
        cancel: CancellationToken,
    ) -> (TempDir, Arc<MediaCache>, BackgroundPrefetchScheduler) {
        let tmp = TempDir::new().unwrap();
        let cache = Arc::new(MediaCache::open(tmp.path(), "v1").await.unwrap());
        let scheduler =
            BackgroundPrefetchScheduler::new(cache.clone(), ResourceFetcher::new(network), cancel);
        (tmp, cache, scheduler)
    }

    fn items(n: usize) -> Vec<FeedItem> {
        (1..=n)
            .map(|i| {
                FeedItem::new(
                    i.to_string(),
                    format!("{i}.mp4"),
                    format!("{i:03}"),
                    format!("Video {i}"),
                )
            })
            .collect()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<PrefetchEvent>) -> Vec<PrefetchEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn failure_halts_the_walk() {
        let network = Arc::new(FakeNetwork::new());
        network.serve("1.mp4", b"one");
        network.unreachable("2.mp4");
        network.serve("3.mp4", b"three");
        let (_tmp, cache, scheduler) = scheduler(network.clone(), CancellationToken::new()).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let terminal = scheduler.run_all(&items(3), &tx).await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], PrefetchEvent::Progress { cached: 1, total: 3 });
        assert!(matches!(
            &events[1],
            PrefetchEvent::Failed { cached: 1, total: 3, url, .. } if url == "2.mp4"
        ));
        assert_eq!(events[1], terminal);
        assert_eq!(network.hits("3.mp4"), 0, "item after the failure is never attempted");
        assert!(cache.contains("1.mp4").await.unwrap());
    }

    #[tokio::test]
    async fn completes_and_skips_already_cached_items() {
        let network = Arc::new(FakeNetwork::new());
        network.serve("1.mp4", b"one");
        network.serve("3.mp4", b"three");
        let (_tmp, cache, scheduler) = scheduler(network.clone(), CancellationToken::new()).await;
        cache.put("2.mp4", b"two", None).await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        scheduler.run_all(&items(3), &tx).await;

        assert_eq!(
            drain(&mut rx),
            vec![
                PrefetchEvent::Progress { cached: 1, total: 3 },
                PrefetchEvent::Progress { cached: 2, total: 3 },
                PrefetchEvent::Progress { cached: 3, total: 3 },
                PrefetchEvent::Completed { total: 3 },
            ]
        );
        assert_eq!(network.hits("2.mp4"), 0);
        assert!(cache.contains("3.mp4").await.unwrap());
    }

    #[tokio::test]
    async fn cancellation_aborts_before_the_next_item() {
        let network = Arc::new(FakeNetwork::new());
        network.serve("1.mp4", b"one");
        let cancel = CancellationToken::new();
        let (_tmp, _cache, scheduler) = scheduler(network.clone(), cancel.clone()).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        cancel.cancel();
        let terminal = scheduler.run_all(&items(2), &tx).await;

        assert_eq!(terminal, PrefetchEvent::Aborted { cached: 0, total: 2 });
        assert_eq!(drain(&mut rx), vec![terminal]);
        assert!(network.requests().is_empty());
    }

    #[tokio::test]
    async fn spawned_stream_ends_after_terminal_event() {
        let network = Arc::new(FakeNetwork::new());
        network.serve("1.mp4", b"one");
        let (_tmp, _cache, scheduler) = scheduler(network, CancellationToken::new()).await;

        let (mut rx, handle) = scheduler.spawn(items(1));
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        handle.await.unwrap();

        assert_eq!(events.len(), 2);
        assert!(events[1].is_terminal());
    }
}
