//! reelfeed: a vertically scrolling short-video feed for the terminal.
//!
//! ## Architecture overview
//!
//! ```text
//! ┌──────────────┐ EngineMsg  ┌──────────┐  draw()  ┌──────────┐
//! │ session.rs   │ ─────────► │  app.rs  │ ───────► │  ui.rs   │
//! │ (tokio tasks)│ (channel)  │ (state)  │          │ (render) │
//! └──────────────┘            └──────────┘          └──────────┘
//!        ▲ update_viewport()       ▲
//!        └─────────────────────────┤ handle_key_event()
//!                             ┌──────────┐
//!                             │ input.rs │
//!                             └──────────┘
//! ```
//!
//! * **`feed/`** and **`net/`**: the manifest and the transport.
//! * **`cache`** and **`intercept`**: the persistent media cache and the
//!   cache-first layer the manifest and app shell are fetched through.
//! * **`visibility`**, **`coordinator`**, **`playback`**: which cards are
//!   on screen, loading each video once, and the sinks that play them.
//! * **`prefetch`**: the user-triggered offline download.
//! * **`session`**: owns one loaded feed and wires the above together.
//! * **`app`**, **`ui`**, **`input`**: the terminal front end.

mod app;
mod cache;
mod config;
mod coordinator;
mod error;
mod events;
mod feed;
mod input;
mod intercept;
mod net;
mod playback;
mod prefetch;
mod session;
mod ui;
mod visibility;

use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use reqwest::Url;
use tokio::runtime::Handle;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use app::App;
use cache::MediaCache;
use config::Config;
use events::{EngineMsg, EngineTx};
use feed::FeedItem;
use intercept::RequestInterceptor;
use net::{HttpNetwork, ResourceFetcher};
use session::{Session, SessionSettings};

// ---------------------------------------------------------------------------
// RAII terminal guard
// ---------------------------------------------------------------------------

/// Manages terminal raw-mode and alternate-screen lifetime via [`Drop`].
struct TerminalGuard {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
}

impl TerminalGuard {
    fn new() -> Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend)?;
        Ok(Self { terminal })
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(self.terminal.backend_mut(), LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}

/// Restore the terminal before the default hook prints the panic.
fn install_panic_hook() {
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        original_hook(info);
    }));
}

/// Log to `<cache root>/reelfeed.log`; the terminal belongs to the UI.
fn init_logging(cache_root: &Path) -> Result<()> {
    fs::create_dir_all(cache_root)
        .with_context(|| format!("Failed to create cache directory: {:?}", cache_root))?;
    let log_path = cache_root.join("reelfeed.log");
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file: {:?}", log_path))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reelfeed=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .init();
    Ok(())
}

// ---------------------------------------------------------------------------
// Engine wiring
// ---------------------------------------------------------------------------

/// Long-lived services shared by every session.
struct Engine {
    runtime: Handle,
    cache: Arc<MediaCache>,
    interceptor: Arc<RequestInterceptor>,
    /// Media goes straight to the network; the coordinator does its own
    /// caching.
    media: ResourceFetcher,
    manifest_url: String,
    app_shell: Vec<String>,
    settings: SessionSettings,
    events: EngineTx,
}

impl Engine {
    /// Open and activate the cache generation, and build the transports.
    async fn start(config: &Config, runtime: Handle, events: EngineTx) -> Result<Self> {
        let cache = MediaCache::open(config.cache.root()?, &config.cache.generation)
            .await
            .context("Failed to open media cache")?;
        let removed = cache.activate().await.context("Failed to activate cache generation")?;
        if !removed.is_empty() {
            info!(?removed, "discarded old cache generations");
        }
        let cache = Arc::new(cache);

        let http = Arc::new(HttpNetwork::new(config.network.timeout())?);
        let manifest_url = config.manifest_url.clone();
        let scope = Url::parse(&manifest_url).ok();
        let app_shell = config
            .cache
            .app_shell
            .iter()
            .map(|entry| match &scope {
                Some(base) => base
                    .join(entry)
                    .map(String::from)
                    .unwrap_or_else(|_| entry.clone()),
                None => entry.clone(),
            })
            .collect();
        let interceptor = Arc::new(RequestInterceptor::new(cache.clone(), http.clone(), scope));

        Ok(Self {
            runtime,
            cache,
            interceptor,
            media: ResourceFetcher::new(http),
            manifest_url,
            app_shell,
            settings: SessionSettings::from(config),
            events,
        })
    }

    /// Fetch the manifest in the background.  The first load also installs
    /// the app shell.
    fn load_feed(&self, install: bool) {
        let interceptor = self.interceptor.clone();
        let shell = if install { self.app_shell.clone() } else { Vec::new() };
        let url = self.manifest_url.clone();
        let events = self.events.clone();

        self.runtime.spawn(async move {
            if !shell.is_empty() {
                if let Err(e) = interceptor.install(&shell).await {
                    warn!(error = %e, "app shell install failed, nothing stored");
                }
            }
            let fetcher = ResourceFetcher::new(interceptor);
            let result = feed::load_manifest(&fetcher, &url).await;
            if let Err(e) = &result {
                warn!(error = %e, url = %url, "manifest load failed");
            }
            let _ = events.send(EngineMsg::Manifest(result));
        });
    }

    fn session(&self, items: Vec<FeedItem>) -> Session {
        Session::new(
            self.runtime.clone(),
            items,
            self.cache.clone(),
            self.media.clone(),
            self.events.clone(),
            self.settings.clone(),
        )
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    install_panic_hook();

    // -- configuration -------------------------------------------------------
    let mut config = config::load()?;
    if let Some(url) = std::env::args().nth(1) {
        config.manifest_url = url;
    }
    // Logging is optional; a read-only cache root only loses the log.
    let _ = init_logging(&config.cache.root()?);
    info!(manifest = %config.manifest_url, "starting");

    // -- background engine ---------------------------------------------------
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let (tx, mut rx) = events::channel();
    let engine = runtime.block_on(Engine::start(&config, runtime.handle().clone(), tx))?;
    engine.load_feed(true);

    // -- terminal setup (RAII: Drop restores on exit or panic) ---------------
    let mut guard = TerminalGuard::new()?;
    let mut app = App::new(config.playback.info_overlay());

    // -- main event loop -----------------------------------------------------
    // ~10 fps.  Each iteration drains engine messages, renders, pushes the
    // new geometry to the session, then waits up to one tick for a key.
    let tick_rate = Duration::from_millis(100);

    loop {
        while let Ok(msg) = rx.try_recv() {
            match msg {
                EngineMsg::Manifest(Ok(items)) => app.attach(engine.session(items)),
                other => app.handle_msg(other),
            }
        }
        if app.manifest_retry {
            app.manifest_retry = false;
            engine.load_feed(false);
        }

        guard.terminal.draw(|f| ui::draw(&mut app, f))?;
        app.sync_viewport();

        if event::poll(tick_rate)? {
            if let Event::Key(key) = event::read()? {
                input::handle_key_event(&mut app, key);
            }
        }

        if app.quit {
            break;
        }
    }

    app.shutdown();
    drop(guard);
    runtime.shutdown_timeout(Duration::from_millis(500));
    info!("exited");
    Ok(())
}
