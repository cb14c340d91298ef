//! Playback sinks.
//!
//! A [`PlaybackSink`] is whatever actually presents a video.  The engine
//! only needs four things from it: accept a source and say when it is ready,
//! start, stop, and report its status.  "Ready to play" is the future
//! returned by [`PlaybackSink::load`]; buffering/ready transitions are also
//! published on a [`watch`] channel for observers such as the UI.
//!
//! [`TerminalSink`] is the sink used by the terminal front end.  It keeps
//! the media in memory and tracks a playback clock; the card renderer shows
//! that clock instead of frames.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

use crate::error::PlaybackError;

/// Session-wide record of whether the user has interacted yet.
///
/// Starting playback without a prior user gesture is refused with
/// [`PlaybackError::AutoplayBlocked`] unless autoplay is allowed outright.
#[derive(Debug)]
pub struct UserActivation {
    autoplay_allowed: bool,
    activated: AtomicBool,
}

impl UserActivation {
    pub fn new(autoplay_allowed: bool) -> Self {
        Self {
            autoplay_allowed,
            activated: AtomicBool::new(false),
        }
    }

    /// Record a user gesture.  Activation is sticky for the session.
    pub fn activate(&self) {
        self.activated.store(true, Ordering::Relaxed);
    }

    pub fn allows_playback(&self) -> bool {
        self.autoplay_allowed || self.activated.load(Ordering::Relaxed)
    }
}

/// Media handed to a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSource {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkStatus {
    /// No source attached.
    Empty,
    Buffering,
    Ready,
    Playing,
    Paused,
}

#[async_trait]
pub trait PlaybackSink: Send + Sync {
    /// Attach `source`; resolves once it can start playing.
    async fn load(&self, source: MediaSource) -> Result<(), PlaybackError>;

    /// Start (or resume) playback.
    async fn play(&self) -> Result<(), PlaybackError>;

    /// Stop playback and rewind to the start.
    fn pause(&self);

    fn set_rate(&self, rate: f32);

    fn subscribe(&self) -> watch::Receiver<SinkStatus>;
}

#[derive(Debug)]
struct Clock {
    media_bytes: usize,
    content_type: Option<String>,
    rate: f32,
    started: Option<Instant>,
    offset: Duration,
}

impl Clock {
    fn position(&self) -> Duration {
        match self.started {
            Some(started) => self.offset + started.elapsed().mul_f32(self.rate),
            None => self.offset,
        }
    }
}

/// Looping, muted sink for the terminal: holds the media and a clock.
#[derive(Debug)]
pub struct TerminalSink {
    activation: Arc<UserActivation>,
    status: watch::Sender<SinkStatus>,
    clock: Mutex<Clock>,
}

impl TerminalSink {
    pub fn new(activation: Arc<UserActivation>) -> Self {
        let (status, _) = watch::channel(SinkStatus::Empty);
        Self {
            activation,
            status,
            clock: Mutex::new(Clock {
                media_bytes: 0,
                content_type: None,
                rate: 1.0,
                started: None,
                offset: Duration::ZERO,
            }),
        }
    }

    pub fn status(&self) -> SinkStatus {
        *self.status.borrow()
    }

    /// Time played since the last start, scaled by the playback rate.
    pub fn position(&self) -> Duration {
        self.clock().position()
    }

    pub fn rate(&self) -> f32 {
        self.clock().rate
    }

    /// Size and type of the attached media, if any.
    pub fn media(&self) -> Option<(usize, Option<String>)> {
        let clock = self.clock();
        (clock.media_bytes > 0).then(|| (clock.media_bytes, clock.content_type.clone()))
    }

    fn clock(&self) -> std::sync::MutexGuard<'_, Clock> {
        self.clock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PlaybackSink for TerminalSink {
    async fn load(&self, source: MediaSource) -> Result<(), PlaybackError> {
        if source.bytes.is_empty() {
            return Err(PlaybackError::EmptySource);
        }
        self.status.send_replace(SinkStatus::Buffering);
        {
            let mut clock = self.clock();
            clock.media_bytes = source.bytes.len();
            clock.content_type = source.content_type;
            clock.started = None;
            clock.offset = Duration::ZERO;
        }
        // The whole body is already in memory; readiness is one hop away.
        tokio::task::yield_now().await;
        self.status.send_replace(SinkStatus::Ready);
        Ok(())
    }

    async fn play(&self) -> Result<(), PlaybackError> {
        if !self.activation.allows_playback() {
            return Err(PlaybackError::AutoplayBlocked);
        }
        let mut clock = self.clock();
        if clock.media_bytes == 0 {
            return Err(PlaybackError::EmptySource);
        }
        if clock.started.is_none() {
            clock.started = Some(Instant::now());
        }
        drop(clock);
        self.status.send_replace(SinkStatus::Playing);
        Ok(())
    }

    fn pause(&self) {
        {
            let mut clock = self.clock();
            clock.started = None;
            clock.offset = Duration::ZERO;
        }
        self.status.send_if_modified(|status| match status {
            SinkStatus::Playing | SinkStatus::Ready => {
                *status = SinkStatus::Paused;
                true
            }
            _ => false,
        });
    }

    fn set_rate(&self, rate: f32) {
        let mut clock = self.clock();
        // Fold the time played at the old rate into the offset.
        if clock.started.is_some() {
            clock.offset = clock.position();
            clock.started = Some(Instant::now());
        }
        clock.rate = rate;
        debug!(rate, "playback rate changed");
    }

    fn subscribe(&self) -> watch::Receiver<SinkStatus> {
        self.status.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
