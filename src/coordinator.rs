//! Per-item video loading.
//!
//! [`VideoLoadCoordinator`] drives every item through
//!
//! ```text
//! NotLoaded ──► Loading ──► Loaded
//!                  │
//!                  └──────► Failed ──► Loading (retry)
//! ```
//!
//! and guarantees at most one load in flight per item: the "is it already
//! loading?" check and the switch to `Loading` happen under one lock with
//! no suspension point in between.  A call that finds the item `Loading`
//! or `Loaded` returns immediately; it is not queued.
//!
//! A load consults the cache first, falls back to the network on a miss
//! (or on any cache fault), stores what it fetched, hands the bytes to the
//! item's sink and waits for the sink to be ready.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::MediaCache;
use crate::error::LoadError;
use crate::events::{EngineMsg, EngineTx};
use crate::feed::FeedItem;
use crate::net::ResourceFetcher;
use crate::playback::{MediaSource, PlaybackSink};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoadState {
    #[default]
    NotLoaded,
    Loading,
    Loaded,
    Failed,
}

/// Result of one [`ensure_loaded`](VideoLoadCoordinator::ensure_loaded) call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { from_cache: bool },
    Failed(LoadError),
    /// Nothing to do: the item was already in this state.
    Skipped(LoadState),
}

pub struct VideoLoadCoordinator {
    cache: Arc<MediaCache>,
    fetcher: ResourceFetcher,
    states: Mutex<HashMap<String, watch::Sender<LoadState>>>,
    events: EngineTx,
}

impl VideoLoadCoordinator {
    pub fn new(cache: Arc<MediaCache>, fetcher: ResourceFetcher, events: EngineTx) -> Self {
        Self {
            cache,
            fetcher,
            states: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn state(&self, id: &str) -> LoadState {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|tx| *tx.borrow())
            .unwrap_or_default()
    }

    /// Wait until `id` has finished a load (`Loaded` or `Failed`) and
    /// return which.  Only meaningful once a load has been requested.
    pub async fn settled(&self, id: &str) -> LoadState {
        let mut rx = {
            let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
            states
                .entry(id.to_string())
                .or_insert_with(|| watch::channel(LoadState::NotLoaded).0)
                .subscribe()
        };
        // The sender lives in `states` for as long as `self`, so the
        // channel cannot close while we wait.
        let settled = rx
            .wait_for(|state| matches!(state, LoadState::Loaded | LoadState::Failed))
            .await
            .map(|state| *state);
        settled.unwrap_or_else(|_| self.state(id))
    }

    /// Load `item` into `sink` unless it is already loading or loaded.
    pub async fn ensure_loaded(&self, item: &FeedItem, sink: &dyn PlaybackSink) -> LoadOutcome {
        if let Err(current) = self.try_begin(&item.id) {
            debug!(item = %item.id, ?current, "load skipped");
            return LoadOutcome::Skipped(current);
        }
        self.notify_state(&item.id, LoadState::Loading);

        match self.load(item, sink).await {
            Ok(from_cache) => {
                self.set_state(&item.id, LoadState::Loaded);
                info!(item = %item.id, from_cache, "video loaded");
                LoadOutcome::Loaded { from_cache }
            }
            Err(error) => {
                self.set_state(&item.id, LoadState::Failed);
                warn!(item = %item.id, %error, "video failed to load");
                let _ = self.events.send(EngineMsg::LoadFailed {
                    id: item.id.clone(),
                    error: error.clone(),
                });
                LoadOutcome::Failed(error)
            }
        }
    }

    /// Fire-and-forget [`ensure_loaded`](Self::ensure_loaded) for a
    /// neighbour of the visible item.
    pub fn prefetch(
        self: &Arc<Self>,
        item: FeedItem,
        sink: Arc<dyn PlaybackSink>,
    ) -> JoinHandle<LoadOutcome> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.ensure_loaded(&item, sink.as_ref()).await })
    }

    /// Atomically move `NotLoaded`/`Failed` to `Loading`.  Returns the
    /// current state when the item is busy or done.
    fn try_begin(&self, id: &str) -> Result<(), LoadState> {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = states
            .entry(id.to_string())
            .or_insert_with(|| watch::channel(LoadState::NotLoaded).0);

        let mut current = LoadState::NotLoaded;
        let started = tx.send_if_modified(|state| {
            current = *state;
            match state {
                LoadState::NotLoaded | LoadState::Failed => {
                    *state = LoadState::Loading;
                    true
                }
                LoadState::Loading | LoadState::Loaded => false,
            }
        });
        if started {
            Ok(())
        } else {
            Err(current)
        }
    }

    fn set_state(&self, id: &str, state: LoadState) {
        if let Some(tx) = self
            .states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
        {
            tx.send_replace(state);
        }
        self.notify_state(id, state);
    }

    fn notify_state(&self, id: &str, state: LoadState) {
        let _ = self.events.send(EngineMsg::LoadState {
            id: id.to_string(),
            state,
        });
    }

    /// Returns whether the bytes came from the cache.
    async fn load(&self, item: &FeedItem, sink: &dyn PlaybackSink) -> Result<bool, LoadError> {
        let key = item.source_url.as_str();

        let cached = match self.cache.get(key).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(item = %item.id, error = %e, "cache read failed, treating as miss");
                None
            }
        };

        let (source, from_cache) = match cached {
            Some(entry) => {
                debug!(item = %item.id, stored_at = ?entry.stored_at, "cache hit");
                (
                    MediaSource {
                        bytes: entry.bytes,
                        content_type: entry.content_type,
                    },
                    true,
                )
            }
            None => {
                debug!(item = %item.id, url = key, "cache miss, fetching");
                let id = item.id.clone();
                let events = self.events.clone();
                let progress = move |loaded: u64, total: Option<u64>| {
                    let _ = events.send(EngineMsg::LoadProgress {
                        id: id.clone(),
                        loaded,
                        total,
                    });
                };
                let fetched = self.fetcher.fetch(key, Some(&progress)).await?;

                if fetched.bytes.is_empty() {
                    debug!(item = %item.id, url = key, "empty body, not cached");
                } else if let Err(e) = self
                    .cache
                    .put(key, &fetched.bytes, fetched.content_type.as_deref())
                    .await
                {
                    warn!(item = %item.id, error = %e, "could not cache video");
                }
                (
                    MediaSource {
                        bytes: fetched.bytes,
                        content_type: fetched.content_type,
                    },
                    false,
                )
            }
        };

        sink.load(source).await?;
        Ok(from_cache)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
