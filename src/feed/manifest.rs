//! Feed manifest loading.
//!
//! The manifest is a JSON array produced by the media preparation step:
//!
//! ```json
//! [
//!   { "id": 0, "title": "Alpine butterfly", "number": "001",
//!     "src": "videos/001-Alpine_butterfly.mp4" }
//! ]
//! ```
//!
//! `src` is resolved against the manifest URL so relative paths work the
//! same whether the manifest came from the network or from the cache.

use reqwest::Url;
use serde::Deserialize;
use tracing::{debug, info};

use super::feed_item::{FeedItem, RawId};
use crate::error::ManifestError;
use crate::net::ResourceFetcher;

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    id: RawId,
    #[serde(default)]
    title: String,
    #[serde(default)]
    number: Option<String>,
    #[serde(default)]
    src: Option<String>,
}

/// Parse manifest bytes into feed items.
///
/// This is a pure function (no I/O) so that tests can exercise the
/// validation rules without a network.  `base` is the manifest's own URL;
/// when absent, `src` values are used verbatim.
pub fn parse_manifest(body: &[u8], base: Option<&Url>) -> Result<Vec<FeedItem>, ManifestError> {
    let entries: Vec<ManifestEntry> = serde_json::from_slice(body)?;
    if entries.is_empty() {
        return Err(ManifestError::Empty);
    }

    let mut seen = std::collections::HashSet::with_capacity(entries.len());
    let mut items = Vec::with_capacity(entries.len());

    for (position, entry) in entries.into_iter().enumerate() {
        let id = entry.id.into_string();
        if !seen.insert(id.clone()) {
            return Err(ManifestError::DuplicateId(id));
        }

        let src = match entry.src.as_deref().map(str::trim) {
            Some(src) if !src.is_empty() => src.to_string(),
            _ => return Err(ManifestError::MissingSource(id)),
        };

        // Fall back to the verbatim string when it cannot be joined; the
        // fetch will then fail per item instead of failing the whole feed.
        let source_url = base
            .and_then(|base| base.join(&src).ok())
            .map(String::from)
            .unwrap_or(src);

        let number = entry
            .number
            .unwrap_or_else(|| format!("{:03}", position + 1));

        items.push(FeedItem::new(id, source_url, number, entry.title));
    }

    Ok(items)
}

/// Fetch and parse the manifest at `url`.
pub async fn load_manifest(
    fetcher: &ResourceFetcher,
    url: &str,
) -> Result<Vec<FeedItem>, ManifestError> {
    debug!(url, "loading feed manifest");
    let fetched = fetcher.fetch(url, None).await?;
    let base = Url::parse(url).ok();
    let items = parse_manifest(&fetched.bytes, base.as_ref())?;
    info!(url, count = items.len(), "feed manifest loaded");
    Ok(items)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
