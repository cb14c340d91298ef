use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::coordinator::LoadState;
use crate::error::ManifestError;
use crate::events::{EngineMsg, PlaybackNotice};
use crate::prefetch::PrefetchEvent;
use crate::session::Session;
use crate::visibility::Extent;

/// How long the speed overlay stays up after a change.
const SPEED_OVERLAY: Duration = Duration::from_secs(1);

/// Where the app is in its startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    LoadingManifest,
    ManifestFailed(String),
    Ready,
}

/// Per-card UI state that the engine does not track.
#[derive(Debug, Clone, Default)]
pub struct CardState {
    /// `(loaded, total)` while downloading.
    pub progress: Option<(u64, Option<u64>)>,
    pub error: Option<String>,
    pub autoplay_blocked: bool,
    pub info_until: Option<Instant>,
    pub speed_overlay: Option<(f32, Instant)>,
}

/// Terminal status of the offline download, shown until dismissed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflineStatus {
    pub message: String,
    pub finished: bool,
}

pub struct App {
    pub phase: Phase,
    pub session: Option<Session>,
    pub cards: Vec<CardState>,
    /// Item id -> position, for routing engine messages.
    index_of: HashMap<String, usize>,
    /// First visible row of the feed strip.
    pub scroll: i64,
    /// Rows per card (the height of the feed area).
    pub viewport_height: u16,
    /// Card whose info overlay was last triggered.
    current: Option<usize>,
    info_overlay: Duration,
    /// Whether the user has requested to quit.
    pub quit: bool,
    /// Set when the user asks to reload a failed manifest.
    pub manifest_retry: bool,
    /// Last status message.
    pub status: String,
    pub offline: Option<OfflineStatus>,
}

impl App {
    pub fn new(info_overlay: Duration) -> Self {
        Self {
            phase: Phase::LoadingManifest,
            session: None,
            cards: Vec::new(),
            index_of: HashMap::new(),
            scroll: 0,
            viewport_height: 0,
            current: None,
            info_overlay,
            quit: false,
            manifest_retry: false,
            status: "Starting…".into(),
            offline: None,
        }
    }

    /// Install a freshly loaded feed.
    pub fn attach(&mut self, session: Session) {
        self.index_of = session
            .items()
            .iter()
            .enumerate()
            .map(|(i, item)| (item.id.clone(), i))
            .collect();
        self.cards = vec![CardState::default(); session.items().len()];
        self.status = format!("Loaded {} videos", session.items().len());
        self.session = Some(session);
        self.phase = Phase::Ready;
        self.scroll = 0;
        self.current = None;
    }

    pub fn manifest_failed(&mut self, error: &ManifestError) {
        self.phase = Phase::ManifestFailed(error.to_string());
        self.status = "Feed unavailable".into();
    }

    pub fn item_count(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.items().len())
    }

    fn card_height(&self) -> i64 {
        i64::from(self.viewport_height.max(1))
    }

    fn max_scroll(&self) -> i64 {
        (self.item_count().saturating_sub(1) as i64) * self.card_height()
    }

    /// The card covering most of the viewport.
    pub fn current_index(&self) -> Option<usize> {
        let count = self.item_count();
        if count == 0 {
            return None;
        }
        let h = self.card_height();
        let index = ((self.scroll + h / 2) / h).clamp(0, count as i64 - 1);
        Some(index as usize)
    }

    /// Resize the feed area, keeping the current card in place.
    pub fn set_viewport_height(&mut self, height: u16) {
        if height == self.viewport_height {
            return;
        }
        let index = self.current_index().unwrap_or(0) as i64;
        self.viewport_height = height;
        self.scroll = (index * self.card_height()).min(self.max_scroll());
    }

    /// Push the scroll position to the session and refresh overlays.
    pub fn sync_viewport(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if self.viewport_height == 0 {
            return;
        }
        let viewport = Extent::new(self.scroll, u32::from(self.viewport_height));
        session.update_viewport(viewport, u32::from(self.viewport_height));

        let current = self.current_index();
        if current != self.current {
            self.current = current;
            if let Some(card) = current.and_then(|i| self.cards.get_mut(i)) {
                card.info_until = Some(Instant::now() + self.info_overlay);
            }
        }
    }

    // -- engine messages -----------------------------------------------------

    pub fn handle_msg(&mut self, msg: EngineMsg) {
        match msg {
            EngineMsg::Manifest(Err(e)) => self.manifest_failed(&e),
            // A loaded manifest needs a session; the main loop builds it.
            EngineMsg::Manifest(Ok(_)) => {}
            EngineMsg::LoadState { id, state } => {
                if let Some(card) = self.card_mut(&id) {
                    match state {
                        LoadState::Loading => {
                            card.error = None;
                            card.progress = Some((0, None));
                        }
                        LoadState::Loaded | LoadState::Failed | LoadState::NotLoaded => {
                            card.progress = None;
                        }
                    }
                }
            }
            EngineMsg::LoadProgress { id, loaded, total } => {
                if let Some(card) = self.card_mut(&id) {
                    card.progress = Some((loaded, total));
                }
            }
            EngineMsg::LoadFailed { id, error } => {
                let label = self.label(&id);
                if let Some(card) = self.card_mut(&id) {
                    card.error = Some(error.to_string());
                }
                self.status = format!("Video {label} failed to load");
            }
            EngineMsg::Playback { id, notice } => {
                if let Some(card) = self.card_mut(&id) {
                    card.autoplay_blocked = notice == PlaybackNotice::AutoplayBlocked;
                }
            }
            EngineMsg::Prefetch(event) => self.handle_prefetch(event),
        }
    }

    fn handle_prefetch(&mut self, event: PrefetchEvent) {
        let (message, finished) = match event {
            PrefetchEvent::Progress { cached, total } => (
                format!("Saving for offline: {}% ({cached}/{total})", percent(cached, total)),
                false,
            ),
            PrefetchEvent::Completed { total } => {
                (format!("Offline copy ready: {total} videos"), true)
            }
            PrefetchEvent::Failed {
                cached,
                total,
                reason,
                ..
            } => (
                format!("Offline download stopped at {cached}/{total}: {reason}"),
                true,
            ),
            PrefetchEvent::Aborted { cached, total } => {
                (format!("Offline download cancelled at {cached}/{total}"), true)
            }
        };
        self.offline = Some(OfflineStatus { message, finished });
    }

    fn card_mut(&mut self, id: &str) -> Option<&mut CardState> {
        let index = *self.index_of.get(id)?;
        self.cards.get_mut(index)
    }

    fn label(&self, id: &str) -> String {
        self.index_of
            .get(id)
            .and_then(|&i| self.session.as_ref()?.items().get(i))
            .map(|item| item.number.clone())
            .unwrap_or_else(|| id.to_string())
    }

    // -- navigation ----------------------------------------------------------

    pub fn select_next(&mut self) {
        if let Some(i) = self.current_index() {
            self.snap_to(i + 1);
        }
    }

    pub fn select_previous(&mut self) {
        if let Some(i) = self.current_index() {
            self.snap_to(i.saturating_sub(1));
        }
    }

    pub fn select_first(&mut self) {
        self.snap_to(0);
    }

    pub fn select_last(&mut self) {
        self.snap_to(self.item_count().saturating_sub(1));
    }

    /// Free scroll by `rows`, clamped to the feed.
    pub fn scroll_by(&mut self, rows: i64) {
        self.scroll = (self.scroll + rows).clamp(0, self.max_scroll());
    }

    fn snap_to(&mut self, index: usize) {
        if self.item_count() == 0 {
            return;
        }
        self.scroll = (index as i64 * self.card_height()).clamp(0, self.max_scroll());
    }

    // -- actions -------------------------------------------------------------

    /// Manual play of the current card (a user gesture).
    pub fn play_current(&mut self) {
        if let (Some(session), Some(i)) = (self.session.as_ref(), self.current_index()) {
            session.play(i);
            if let Some(card) = self.cards.get_mut(i) {
                card.autoplay_blocked = false;
            }
        }
    }

    /// Retry the current card, or the manifest if that is what failed.
    pub fn retry(&mut self) {
        if let Phase::ManifestFailed(_) = self.phase {
            self.phase = Phase::LoadingManifest;
            self.manifest_retry = true;
            self.status = "Retrying…".into();
            return;
        }
        if let (Some(session), Some(i)) = (self.session.as_ref(), self.current_index()) {
            if session.load_state(i) == LoadState::Failed {
                session.retry(i);
            }
        }
    }

    pub fn cycle_speed(&mut self) {
        let Some(i) = self.current_index() else {
            return;
        };
        if let Some(rate) = self.session.as_mut().and_then(|s| s.cycle_speed(i)) {
            if let Some(card) = self.cards.get_mut(i) {
                card.speed_overlay = Some((rate, Instant::now() + SPEED_OVERLAY));
            }
        }
    }

    pub fn download_all(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if session.download_all() {
            self.offline = Some(OfflineStatus {
                message: format!("Saving for offline: 0% (0/{})", session.items().len()),
                finished: false,
            });
        } else {
            self.status = "Offline download already running".into();
        }
    }

    /// Hide a finished offline-download message.
    pub fn dismiss_status(&mut self) {
        if self.offline.as_ref().is_some_and(|o| o.finished) {
            self.offline = None;
        }
    }

    pub fn shutdown(&self) {
        if let Some(session) = &self.session {
            session.shutdown();
        }
    }
}

fn percent(done: usize, total: usize) -> usize {
    if total == 0 {
        100
    } else {
        done * 100 / total
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cache::MediaCache;
    use crate::error::{FetchError, LoadError};
    use crate::events;
    use crate::feed::FeedItem;
    use crate::net::testing::FakeNetwork;
    use crate::net::ResourceFetcher;
    use crate::session::SessionSettings;
    use tempfile::TempDir;
    use tokio::runtime::Handle;

    async fn app_with_items(n: usize) -> (TempDir, App) {
        let tmp = TempDir::new().unwrap();
        let cache = Arc::new(MediaCache::open(tmp.path(), "v1").await.unwrap());
        let network = Arc::new(FakeNetwork::new());
        let items = (1..=n)
            .map(|i| {
                FeedItem::new(
                    i.to_string(),
                    format!("{i}.mp4"),
                    format!("{i:03}"),
                    format!("Video {i}"),
                )
            })
            .collect();
        let (tx, _rx) = events::channel();
        let session = Session::new(
            Handle::current(),
            items,
            cache,
            ResourceFetcher::new(network),
            tx,
            SessionSettings {
                threshold: 0.5,
                preload_margin: 0.0,
                autoplay: true,
                speeds: vec![1.0, 0.5],
            },
        );
        let mut app = App::new(Duration::from_secs(3));
        app.attach(session);
        app.set_viewport_height(20);
        (tmp, app)
    }

    // -- construction --------------------------------------------------------

    #[test]
    fn new_app_waits_for_manifest() {
        let app = App::new(Duration::from_secs(3));
        assert_eq!(app.phase, Phase::LoadingManifest);
        assert!(!app.quit);
        assert_eq!(app.current_index(), None);
    }

    #[tokio::test]
    async fn attach_switches_to_ready() {
        let (_tmp, app) = app_with_items(3).await;
        assert_eq!(app.phase, Phase::Ready);
        assert_eq!(app.cards.len(), 3);
        assert_eq!(app.current_index(), Some(0));
    }

    // -- navigation ----------------------------------------------------------

    #[test]
    fn navigation_on_empty_is_noop() {
        let mut app = App::new(Duration::from_secs(3));
        app.select_next();
        app.select_last();
        app.scroll_by(5);
        assert_eq!(app.scroll, 0);
        assert_eq!(app.current_index(), None);
    }

    #[tokio::test]
    async fn select_next_snaps_and_clamps() {
        let (_tmp, mut app) = app_with_items(3).await;

        app.select_next();
        assert_eq!(app.scroll, 20);
        app.select_next();
        app.select_next();
        assert_eq!(app.scroll, 40, "clamped at the last card");
        assert_eq!(app.current_index(), Some(2));
    }

    #[tokio::test]
    async fn select_previous_clamps_at_zero() {
        let (_tmp, mut app) = app_with_items(3).await;
        app.select_last();
        app.select_previous();
        assert_eq!(app.current_index(), Some(1));
        app.select_first();
        app.select_previous();
        assert_eq!(app.scroll, 0);
    }

    #[tokio::test]
    async fn fine_scroll_moves_current_past_the_midpoint() {
        let (_tmp, mut app) = app_with_items(3).await;
        app.scroll_by(9);
        assert_eq!(app.current_index(), Some(0));
        app.scroll_by(1);
        assert_eq!(app.current_index(), Some(1));
        app.scroll_by(-100);
        assert_eq!(app.scroll, 0);
    }

    #[tokio::test]
    async fn resize_keeps_the_current_card() {
        let (_tmp, mut app) = app_with_items(3).await;
        app.select_next();
        app.set_viewport_height(30);
        assert_eq!(app.scroll, 30);
        assert_eq!(app.current_index(), Some(1));
    }

    // -- engine messages -----------------------------------------------------

    #[tokio::test]
    async fn load_messages_update_cards() {
        let (_tmp, mut app) = app_with_items(2).await;

        app.handle_msg(EngineMsg::LoadState {
            id: "2".into(),
            state: LoadState::Loading,
        });
        app.handle_msg(EngineMsg::LoadProgress {
            id: "2".into(),
            loaded: 50,
            total: Some(100),
        });
        assert_eq!(app.cards[1].progress, Some((50, Some(100))));

        app.handle_msg(EngineMsg::LoadFailed {
            id: "2".into(),
            error: LoadError::Fetch(FetchError::Http {
                url: "2.mp4".into(),
                status: 500,
            }),
        });
        assert!(app.cards[1].error.as_deref().unwrap().contains("500"));
        assert_eq!(app.status, "Video 002 failed to load");
    }

    #[tokio::test]
    async fn autoplay_notice_toggles_play_button() {
        let (_tmp, mut app) = app_with_items(1).await;
        app.handle_msg(EngineMsg::Playback {
            id: "1".into(),
            notice: PlaybackNotice::AutoplayBlocked,
        });
        assert!(app.cards[0].autoplay_blocked);

        app.handle_msg(EngineMsg::Playback {
            id: "1".into(),
            notice: PlaybackNotice::Playing,
        });
        assert!(!app.cards[0].autoplay_blocked);
    }

    #[tokio::test]
    async fn offline_failure_is_shown_until_dismissed() {
        let (_tmp, mut app) = app_with_items(3).await;

        app.handle_msg(EngineMsg::Prefetch(PrefetchEvent::Progress { cached: 1, total: 3 }));
        assert_eq!(app.offline.as_ref().unwrap().message, "Saving for offline: 33% (1/3)");
        app.dismiss_status();
        assert!(app.offline.is_some(), "running download cannot be dismissed");

        app.handle_msg(EngineMsg::Prefetch(PrefetchEvent::Failed {
            cached: 1,
            total: 3,
            url: "2.mp4".into(),
            reason: "HTTP 404 fetching 2.mp4".into(),
        }));
        assert!(app.offline.as_ref().unwrap().finished);
        app.dismiss_status();
        assert!(app.offline.is_none());
    }

    #[test]
    fn manifest_failure_then_retry_requests_reload() {
        let mut app = App::new(Duration::from_secs(3));
        app.handle_msg(EngineMsg::Manifest(Err(ManifestError::Empty)));
        assert!(matches!(app.phase, Phase::ManifestFailed(_)));

        app.retry();
        assert!(app.manifest_retry);
        assert_eq!(app.phase, Phase::LoadingManifest);
    }

    #[tokio::test]
    async fn cycle_speed_sets_overlay() {
        let (_tmp, mut app) = app_with_items(1).await;
        app.cycle_speed();
        let (rate, _) = app.cards[0].speed_overlay.unwrap();
        assert_eq!(rate, 0.5);
    }

    #[tokio::test]
    async fn sync_viewport_shows_info_for_new_current_card() {
        let (_tmp, mut app) = app_with_items(2).await;
        app.sync_viewport();
        assert!(app.cards[0].info_until.is_some());
        assert!(app.cards[1].info_until.is_none());

        app.select_next();
        app.sync_viewport();
        assert!(app.cards[1].info_until.is_some());
    }
}
