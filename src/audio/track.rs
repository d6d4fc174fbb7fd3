use chrono::{DateTime, Utc};
use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use crate::sources::TrackMetadata;

static NEXT_TRACK_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identifier of one playback context (a guild, a room...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey(pub u64);

impl From<u64> for SessionKey {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one queued track instance.
///
/// Two enqueues of the same URL produce two different ids; the controller
/// uses it to make sure it only advances past the entry that actually ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackId(u64);

impl TrackId {
    fn next() -> Self {
        Self(NEXT_TRACK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Who asked for a track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub id: u64,
    pub name: String,
}

impl Requester {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

impl fmt::Display for Requester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Where the audio for a track comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamRef {
    /// Directly playable URL.
    Resolved(String),
    /// Reference the resolver must turn into a stream URL right before playback.
    Deferred(String),
}

/// One playable item plus its requester. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    id: TrackId,
    title: String,
    canonical_url: String,
    stream: StreamRef,
    duration: Duration,
    thumbnail: Option<String>,
    requester: Requester,
    requested_at: DateTime<Utc>,
}

impl Track {
    pub fn new(
        title: impl Into<String>,
        canonical_url: impl Into<String>,
        stream: StreamRef,
        requester: Requester,
    ) -> Self {
        Self {
            id: TrackId::next(),
            title: title.into(),
            canonical_url: canonical_url.into(),
            stream,
            duration: Duration::ZERO,
            thumbnail: None,
            requester,
            requested_at: Utc::now(),
        }
    }

    /// Builds a track from resolver output, defaulting missing fields once.
    pub fn from_metadata(metadata: TrackMetadata, requester: Requester) -> Self {
        let title = if metadata.title.trim().is_empty() {
            metadata.canonical_url.clone()
        } else {
            metadata.title
        };

        Self {
            id: TrackId::next(),
            title,
            canonical_url: metadata.canonical_url,
            stream: metadata.stream,
            duration: metadata.duration.unwrap_or_default(),
            thumbnail: metadata.thumbnail.filter(|t| !t.is_empty()),
            requester,
            requested_at: Utc::now(),
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn canonical_url(&self) -> &str {
        &self.canonical_url
    }

    pub fn stream(&self) -> &StreamRef {
        &self.stream
    }

    /// Track length; `Duration::ZERO` means unknown (live streams, odd sources).
    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn thumbnail(&self) -> Option<&str> {
        self.thumbnail.as_deref()
    }

    pub fn requester(&self) -> &Requester {
        &self.requester
    }

    pub fn requested_at(&self) -> DateTime<Utc> {
        self.requested_at
    }
}
