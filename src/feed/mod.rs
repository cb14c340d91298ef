//! Feed data: the item type and the manifest it is loaded from.
//!
//! ## For contributors
//!
//! Nothing outside this module parses the manifest.  If the manifest grows
//! a new field, add it to `ManifestEntry` in [`manifest`] and, if other
//! components need it, to [`FeedItem`].

mod feed_item;
mod manifest;

// Re-export the public API of this module so callers can write
// `use crate::feed::{FeedItem, load_manifest};`
pub use feed_item::FeedItem;
pub use manifest::load_manifest;
