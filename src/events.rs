//! Messages from background tasks to the UI thread.
//!
//! Loads, playback attempts and the offline download all run as tokio
//! tasks.  They report back over an unbounded [`mpsc`] channel that the
//! main loop drains on every tick, exactly like the feed poller does for
//! fetched items.
//!
//! [`mpsc`]: tokio::sync::mpsc

use tokio::sync::mpsc;

use crate::coordinator::LoadState;
use crate::error::{LoadError, ManifestError};
use crate::feed::FeedItem;
use crate::prefetch::PrefetchEvent;

/// Playback outcomes worth showing on a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackNotice {
    Playing,
    /// `play()` was refused until the user interacts; show a play button.
    AutoplayBlocked,
    Paused,
}

#[derive(Debug)]
pub enum EngineMsg {
    /// Startup manifest load finished.
    Manifest(Result<Vec<FeedItem>, ManifestError>),
    LoadState { id: String, state: LoadState },
    LoadProgress { id: String, loaded: u64, total: Option<u64> },
    LoadFailed { id: String, error: LoadError },
    Playback { id: String, notice: PlaybackNotice },
    Prefetch(PrefetchEvent),
}

pub type EngineTx = mpsc::UnboundedSender<EngineMsg>;
pub type EngineRx = mpsc::UnboundedReceiver<EngineMsg>;

pub fn channel() -> (EngineTx, EngineRx) {
    mpsc::unbounded_channel()
}
