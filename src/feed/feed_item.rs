//! The core data type shared across the whole engine.
//!
//! `FeedItem` is one entry of the feed manifest: a video plus the metadata
//! shown on its card.  Items are created when the manifest is loaded and
//! never change afterwards; every other component refers to them by `id`
//! (load state, playback) or by `source_url` (cache key, network request).

use serde::Deserialize;

/// A single video in the feed.  The feed is ordered by manifest position.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct FeedItem {
    /// Stable identifier from the manifest.
    ///
    /// Manifests may carry numeric or string ids; both are normalised to a
    /// string here.
    pub id: String,

    /// Absolute (or, in tests, opaque) URL of the video.  Doubles as the
    /// cache key.
    pub source_url: String,

    /// Display number, e.g. `"007"`.
    pub number: String,

    /// Human-readable title.
    pub title: String,
}

impl FeedItem {
    pub fn new(
        id: impl Into<String>,
        source_url: impl Into<String>,
        number: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source_url: source_url.into(),
            number: number.into(),
            title: title.into(),
        }
    }
}

/// Manifest ids appear both as `0` and as `"intro"` in the wild.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawId {
    Number(u64),
    Text(String),
}

impl RawId {
    pub(crate) fn into_string(self) -> String {
        match self {
            RawId::Number(n) => n.to_string(),
            RawId::Text(s) => s,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_and_text_ids_normalise_to_strings() {
        let ids: Vec<RawId> = serde_json::from_str(r#"[7, "intro"]"#).unwrap();
        let ids: Vec<String> = ids.into_iter().map(RawId::into_string).collect();
        assert_eq!(ids, vec!["7".to_string(), "intro".to_string()]);
    }

    #[test]
    fn new_accepts_borrowed_and_owned_strings() {
        let item = FeedItem::new("1", String::from("a.mp4"), "001", "Alpine butterfly");
        assert_eq!(item.id, "1");
        assert_eq!(item.source_url, "a.mp4");
        assert_eq!(item.number, "001");
        assert_eq!(item.title, "Alpine butterfly");
    }
}
