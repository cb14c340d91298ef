//! Error taxonomy shared by the loading engine.
//!
//! Each failure class gets its own type because each is handled
//! differently:
//!
//! * [`StorageError`] is always downgraded to a cache miss.
//! * [`FetchError`] fails one item (or halts the offline download).
//! * [`PlaybackError::AutoplayBlocked`] is expected and only asks the user
//!   for a gesture.
//! * [`ManifestError`] is fatal to startup and offers a retry.

use thiserror::Error;

/// A network retrieval failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The server answered with a non-2xx status.
    #[error("HTTP {status} fetching {url}")]
    Http { url: String, status: u16 },

    /// The request never produced a response (DNS, connect, timeout, reset).
    #[error("network failure fetching {url}: {message}")]
    Transport { url: String, message: String },

    /// The fetch was cancelled before it finished.
    #[error("fetch of {url} aborted")]
    Aborted { url: String },
}

impl FetchError {
    pub fn transport(url: &str, err: impl std::fmt::Display) -> Self {
        Self::Transport {
            url: url.to_string(),
            message: err.to_string(),
        }
    }

    /// The URL this error is about.
    pub fn url(&self) -> &str {
        match self {
            Self::Http { url, .. } | Self::Transport { url, .. } | Self::Aborted { url } => url,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }
}

/// The persistent cache could not be read or written.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache store error: {0}")]
    Cache(#[from] cacache::Error),

    /// Generation names become directory names, so separators are rejected.
    #[error("invalid cache generation name {0:?}")]
    InvalidGeneration(String),

    #[error("refusing to delete the active cache generation {0:?}")]
    ActiveGeneration(String),
}

/// The playback sink refused a request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlaybackError {
    /// Starting playback needs a user gesture first. Not a real failure.
    #[error("autoplay blocked until the user interacts")]
    AutoplayBlocked,

    #[error("media source is empty")]
    EmptySource,
}

/// The feed manifest could not be obtained at startup.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("could not fetch manifest: {0}")]
    Fetch(#[from] FetchError),

    #[error("manifest is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("manifest lists id {0:?} more than once")]
    DuplicateId(String),

    #[error("manifest entry {0:?} has no video source")]
    MissingSource(String),

    #[error("manifest contains no videos")]
    Empty,
}

/// Why a single item failed to load.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_error_names_status_and_url() {
        let err = FetchError::Http {
            url: "a.mp4".into(),
            status: 404,
        };
        assert_eq!(err.to_string(), "HTTP 404 fetching a.mp4");
        assert_eq!(err.url(), "a.mp4");
        assert!(!err.is_aborted());
    }

    #[test]
    fn load_error_is_transparent_over_fetch_error() {
        let err: LoadError = FetchError::Aborted { url: "b.mp4".into() }.into();
        assert_eq!(err.to_string(), "fetch of b.mp4 aborted");
    }

    #[test]
    fn manifest_error_wraps_fetch_error() {
        let err: ManifestError = FetchError::transport("videos.json", "connection refused").into();
        assert!(err.to_string().contains("connection refused"));
    }
}
