//! The viewing session.
//!
//! [`Session`] owns everything that lives as long as one loaded feed: the
//! items, one sink per item, the load coordinator, the user-activation
//! flag and the visibility trackers.  Components get what they need
//! injected from here; nothing reads ambient global state.
//!
//! Visibility drives everything:
//!
//! * the **playback** tracker (no margin) decides what plays: `Entered`
//!   loads the item if needed and then plays it, `Exited` pauses and
//!   rewinds at once but lets an in-flight load finish;
//! * the **pre-roll** tracker (viewport grown by the preload margin) only
//!   loads, so upcoming cards are ready before they scroll in;
//! * each `Entered` also prefetches the items directly before and after.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{CacheStatsSnapshot, MediaCache};
use crate::config::Config;
use crate::coordinator::{LoadState, VideoLoadCoordinator};
use crate::error::PlaybackError;
use crate::events::{EngineMsg, EngineTx, PlaybackNotice};
use crate::feed::FeedItem;
use crate::net::ResourceFetcher;
use crate::playback::{PlaybackSink, TerminalSink, UserActivation};
use crate::prefetch::BackgroundPrefetchScheduler;
use crate::visibility::{feed_layout, Extent, VisibilityEvent, VisibilityTracker};

/// The knobs a session takes from [`Config`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub threshold: f64,
    /// In viewport heights; `0.0` disables the pre-roll tracker.
    pub preload_margin: f64,
    pub autoplay: bool,
    pub speeds: Vec<f32>,
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            threshold: config.visibility.threshold,
            preload_margin: config.visibility.preload_margin,
            autoplay: config.playback.autoplay,
            speeds: config.playback.speeds.clone(),
        }
    }
}

pub struct Session {
    runtime: Handle,
    items: Vec<FeedItem>,
    sinks: Vec<Arc<TerminalSink>>,
    /// Per item: currently past the playback threshold.
    visible: Arc<[AtomicBool]>,
    coordinator: Arc<VideoLoadCoordinator>,
    activation: Arc<UserActivation>,
    cache: Arc<MediaCache>,
    fetcher: ResourceFetcher,
    play_tracker: VisibilityTracker,
    preload_tracker: Option<VisibilityTracker>,
    preload_margin: f64,
    speeds: Vec<f32>,
    speed_index: Vec<usize>,
    prefetch_running: Arc<AtomicBool>,
    cancel: CancellationToken,
    events: EngineTx,
}

impl Session {
    pub fn new(
        runtime: Handle,
        items: Vec<FeedItem>,
        cache: Arc<MediaCache>,
        fetcher: ResourceFetcher,
        events: EngineTx,
        settings: SessionSettings,
    ) -> Self {
        let activation = Arc::new(UserActivation::new(settings.autoplay));
        let sinks = items
            .iter()
            .map(|_| Arc::new(TerminalSink::new(activation.clone())))
            .collect();
        let visible = items.iter().map(|_| AtomicBool::new(false)).collect();
        let coordinator = Arc::new(VideoLoadCoordinator::new(
            cache.clone(),
            fetcher.clone(),
            events.clone(),
        ));
        let preload_tracker = (settings.preload_margin > 0.0)
            .then(|| VisibilityTracker::new(settings.threshold, 0));
        let speeds = if settings.speeds.is_empty() {
            vec![1.0]
        } else {
            settings.speeds
        };

        Self {
            runtime,
            speed_index: vec![0; items.len()],
            items,
            sinks,
            visible,
            coordinator,
            activation,
            cache,
            fetcher,
            play_tracker: VisibilityTracker::new(settings.threshold, 0),
            preload_tracker,
            preload_margin: settings.preload_margin,
            speeds,
            prefetch_running: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            events,
        }
    }

    pub fn items(&self) -> &[FeedItem] {
        &self.items
    }

    pub fn sink(&self, index: usize) -> Option<&TerminalSink> {
        self.sinks.get(index).map(Arc::as_ref)
    }

    pub fn load_state(&self, index: usize) -> LoadState {
        self.items
            .get(index)
            .map(|item| self.coordinator.state(&item.id))
            .unwrap_or_default()
    }

    pub fn cache_stats(&self) -> CacheStatsSnapshot {
        self.cache.stats()
    }

    /// Feed the current scroll geometry to both trackers.
    pub fn update_viewport(&mut self, viewport: Extent, item_height: u32) {
        let layout = feed_layout(self.items.len(), item_height);

        if let Some(tracker) = self.preload_tracker.as_mut() {
            let margin = (self.preload_margin * f64::from(viewport.height)).round() as u32;
            tracker.set_root_margin(margin);
            let entered: Vec<usize> = tracker
                .observe(viewport, &layout)
                .into_iter()
                .filter_map(|event| match event {
                    VisibilityEvent::Entered(index) => Some(index),
                    VisibilityEvent::Exited(_) => None,
                })
                .collect();
            for index in entered {
                self.preload(index);
            }
        }

        for event in self.play_tracker.observe(viewport, &layout) {
            self.handle_visibility(event);
        }
    }

    /// React to one playback-visibility crossing.  Returns the task that
    /// loads and plays an entered item.
    pub fn handle_visibility(&mut self, event: VisibilityEvent) -> Option<JoinHandle<()>> {
        match event {
            VisibilityEvent::Entered(index) if index < self.items.len() => {
                debug!(index, "entered");
                self.visible[index].store(true, Ordering::SeqCst);
                let task = self.spawn_activate(index);
                if let Some(prev) = index.checked_sub(1) {
                    self.preload(prev);
                }
                self.preload(index + 1);
                task
            }
            VisibilityEvent::Exited(index) if index < self.items.len() => {
                debug!(index, "exited");
                self.visible[index].store(false, Ordering::SeqCst);
                self.sinks[index].pause();
                let _ = self.events.send(EngineMsg::Playback {
                    id: self.items[index].id.clone(),
                    notice: PlaybackNotice::Paused,
                });
                None
            }
            _ => None,
        }
    }

    /// The user asked to play `index`: counts as a gesture.
    pub fn play(&self, index: usize) -> Option<JoinHandle<()>> {
        self.activation.activate();
        self.spawn_activate(index)
    }

    /// Load `index` again after a failure (no-op otherwise).
    pub fn retry(&self, index: usize) -> Option<JoinHandle<()>> {
        self.spawn_activate(index)
    }

    /// Advance `index` to the next configured playback rate.
    pub fn cycle_speed(&mut self, index: usize) -> Option<f32> {
        let slot = self.speed_index.get_mut(index)?;
        *slot = (*slot + 1) % self.speeds.len();
        let rate = self.speeds[*slot];
        self.sinks[index].set_rate(rate);
        Some(rate)
    }

    /// Start the offline download of the whole feed.  Returns `false` when
    /// one is already running.
    pub fn download_all(&self) -> bool {
        if self.prefetch_running.swap(true, Ordering::SeqCst) {
            return false;
        }
        let scheduler = BackgroundPrefetchScheduler::new(
            self.cache.clone(),
            self.fetcher.clone(),
            self.cancel.child_token(),
        );
        let items = self.items.clone();
        let events = self.events.clone();
        let running = self.prefetch_running.clone();

        self.runtime.spawn(async move {
            let (mut rx, _handle) = scheduler.spawn(items);
            while let Some(event) = rx.recv().await {
                if event.is_terminal() {
                    running.store(false, Ordering::SeqCst);
                }
                let _ = events.send(EngineMsg::Prefetch(event));
            }
        });
        info!("offline download requested");
        true
    }

    /// Abort background work.  Item loads in flight are left to finish.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn preload(&self, index: usize) {
        if let (Some(item), Some(sink)) = (self.items.get(index), self.sinks.get(index)) {
            let sink: Arc<dyn PlaybackSink> = sink.clone();
            let coordinator = self.coordinator.clone();
            let item = item.clone();
            // Detached: the handle is not needed.
            let _guard = self.runtime.enter();
            coordinator.prefetch(item, sink);
        }
    }

    /// Load `index` if needed, then play it if it is still on screen.
    fn spawn_activate(&self, index: usize) -> Option<JoinHandle<()>> {
        let item = self.items.get(index)?.clone();
        let sink = self.sinks.get(index)?.clone();
        let coordinator = self.coordinator.clone();
        let visible = self.visible.clone();
        let events = self.events.clone();

        Some(self.runtime.spawn(async move {
            coordinator.ensure_loaded(&item, sink.as_ref()).await;
            if coordinator.settled(&item.id).await != LoadState::Loaded {
                return;
            }
            let notice = match play_while_visible(sink.as_ref(), &visible[index]).await {
                None => {
                    debug!(item = %item.id, "scrolled away before playback");
                    return;
                }
                Some(Ok(())) => PlaybackNotice::Playing,
                Some(Err(PlaybackError::AutoplayBlocked)) => {
                    debug!(item = %item.id, "autoplay blocked");
                    PlaybackNotice::AutoplayBlocked
                }
                Some(Err(e)) => {
                    warn!(item = %item.id, error = %e, "playback failed");
                    return;
                }
            };
            let _ = events.send(EngineMsg::Playback { id: item.id, notice });
        }))
    }
}

/// Start `sink` if `visible` holds, checking again after `play()` and
/// pausing if an exit raced it.  `None`: not (or no longer) visible.
async fn play_while_visible(
    sink: &dyn PlaybackSink,
    visible: &AtomicBool,
) -> Option<Result<(), PlaybackError>> {
    if !visible.load(Ordering::SeqCst) {
        return None;
    }
    let result = sink.play().await;
    if !visible.load(Ordering::SeqCst) {
        sink.pause();
        return None;
    }
    Some(result)
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
