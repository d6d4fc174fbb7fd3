//! # Sources
//!
//! Collaborators that turn user input into playable tracks.
//!
//! - [`TrackResolver`]: search term or URL → [`TrackMetadata`], and deferred
//!   references → concrete stream URLs right before playback.
//! - [`CatalogExpander`]: playlist/album URL → ordered [`TrackRef`]s, split in
//!   an eagerly resolved first batch and a remainder resolved in background.
//!
//! [`ytdlp::YtDlpClient`] implements both on top of the `yt-dlp` binary.
//! [`spotify::SpotifyClient`] is a second expander that turns Spotify links
//! into search terms. Expanders are tried in registration order.

pub mod spotify;
pub mod ytdlp;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use spotify::SpotifyClient;
pub use ytdlp::YtDlpClient;

use crate::audio::track::StreamRef;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("nothing found")]
    NotFound,
    #[error("network failure: {0}")]
    NetworkFailure(String),
    #[error("rate limited by the media service")]
    RateLimited,
}

/// Resolver output for one playable item.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackMetadata {
    pub title: String,
    pub canonical_url: String,
    pub stream: StreamRef,
    pub duration: Option<Duration>,
    pub thumbnail: Option<String>,
}

/// Reference to one playlist entry, resolvable with [`TrackResolver::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRef(pub String);

impl TrackRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaylistExpansion {
    pub first_batch: Vec<TrackRef>,
    pub remainder: Vec<TrackRef>,
}

impl PlaylistExpansion {
    /// Splits `refs` after the first `eager` entries.
    pub fn split(mut refs: Vec<TrackRef>, eager: usize) -> Self {
        let remainder = refs.split_off(eager.min(refs.len()));
        Self {
            first_batch: refs,
            remainder,
        }
    }

    pub fn len(&self) -> usize {
        self.first_batch.len() + self.remainder.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackResolver: Send + Sync {
    /// Zero or more tracks for a search term or URL.
    async fn resolve(&self, query: &str) -> Result<Vec<TrackMetadata>, ResolveError>;

    /// Concrete stream URL for a deferred reference.
    async fn resolve_stream(&self, reference: &str) -> Result<String, ResolveError>;
}

#[async_trait]
pub trait CatalogExpander: Send + Sync {
    /// Whether `query` is a playlist/album reference this expander understands.
    fn handles(&self, query: &str) -> bool;

    async fn expand_playlist(&self, url: &str, eager: usize) -> Result<PlaylistExpansion, ResolveError>;
}
