use futures::stream::{self, StreamExt};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{
    controller::{ControllerMsg, PlaybackContext, PlaybackState},
    events::{EventBus, EventReceiver},
    registry::{Session, SessionRegistry},
    sink::SinkFactory,
    track::{Requester, SessionKey, Track},
};
use crate::sources::{CatalogExpander, ResolveError, TrackRef, TrackResolver};

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("the queue is full (max {max} tracks)")]
    QueueFull { max: usize },
    #[error("nothing to enqueue")]
    EmptyRequest,
}

/// Whether a control command changed anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    Applied,
    /// The session was absent or empty.
    NoEffect,
}

#[derive(Debug, Clone)]
pub struct PlayerSettings {
    pub progress_interval: Duration,
    pub max_queue_size: usize,
    /// Playlist entries resolved before `enqueue` returns.
    pub playlist_eager_batch: usize,
    /// Parallel resolutions for the playlist remainder.
    pub playlist_concurrency: usize,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            progress_interval: Duration::from_secs(5),
            max_queue_size: 1000,
            playlist_eager_batch: 5,
            playlist_concurrency: 4,
        }
    }
}

/// What an `enqueue` did.
#[derive(Debug, Clone)]
pub struct EnqueueOutcome {
    pub added: Vec<Track>,
    /// Queue index of the first added track (0 = plays now).
    pub position: usize,
    /// Tracks that did not fit in the queue.
    pub dropped: usize,
    /// Playlist entries still being resolved in background.
    pub pending: usize,
    /// Whether this call started playback of an idle session.
    pub started: bool,
}

impl EnqueueOutcome {
    fn pending_only(pending: usize) -> Self {
        Self {
            added: Vec::new(),
            position: 0,
            dropped: 0,
            pending,
            started: false,
        }
    }
}

/// Command surface of the playback core.
///
/// Owns the [`SessionRegistry`]; every session gets its own controller task
/// fed by the sink from the [`SinkFactory`].
#[derive(Clone)]
pub struct AudioPlayer {
    registry: SessionRegistry,
    resolver: Arc<dyn TrackResolver>,
    catalogs: Vec<Arc<dyn CatalogExpander>>,
    settings: PlayerSettings,
}

impl AudioPlayer {
    pub fn new(
        resolver: Arc<dyn TrackResolver>,
        sinks: Arc<dyn SinkFactory>,
        settings: PlayerSettings,
    ) -> (Self, EventReceiver) {
        let (events, rx) = EventBus::channel();
        let registry = SessionRegistry::new(PlaybackContext {
            resolver: resolver.clone(),
            sinks,
            events,
            progress_interval: settings.progress_interval,
            max_queue_size: settings.max_queue_size,
        });

        let player = Self {
            registry,
            resolver,
            catalogs: Vec::new(),
            settings,
        };
        (player, rx)
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn CatalogExpander>) -> Self {
        self.catalogs.push(catalog);
        self
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Resolves `query` (search term, track URL or playlist URL) and queues
    /// the result, starting playback if the session is idle.
    pub async fn enqueue(
        &self,
        key: SessionKey,
        query: &str,
        requester: Requester,
    ) -> Result<EnqueueOutcome, PlayerError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(PlayerError::EmptyRequest);
        }

        if let Some(catalog) = self.catalogs.iter().find(|c| c.handles(query)).cloned() {
            return self.enqueue_playlist(catalog, key, query, requester).await;
        }

        let tracks: Vec<Track> = self
            .resolver
            .resolve(query)
            .await?
            .into_iter()
            .map(|metadata| Track::from_metadata(metadata, requester.clone()))
            .collect();

        if tracks.is_empty() {
            return Err(ResolveError::NotFound.into());
        }
        self.enqueue_tracks(key, tracks)
    }

    /// Queues already built tracks in order, starting playback if idle.
    pub fn enqueue_tracks(&self, key: SessionKey, tracks: Vec<Track>) -> Result<EnqueueOutcome, PlayerError> {
        let mut added = tracks.clone();
        let enqueued = self.registry.enqueue(key, tracks)?;
        added.truncate(enqueued.added);

        let started = enqueued.session.state().is_idle();
        if started {
            enqueued.session.send(ControllerMsg::Kick);
        }

        Ok(EnqueueOutcome {
            added,
            position: enqueued.position,
            dropped: enqueued.dropped,
            pending: 0,
            started,
        })
    }

    async fn enqueue_playlist(
        &self,
        catalog: Arc<dyn CatalogExpander>,
        key: SessionKey,
        url: &str,
        requester: Requester,
    ) -> Result<EnqueueOutcome, PlayerError> {
        let expansion = catalog.expand_playlist(url, self.settings.playlist_eager_batch).await?;
        if expansion.is_empty() {
            return Err(ResolveError::NotFound.into());
        }
        info!(
            "📜 Playlist {}: {} now, {} in background",
            url,
            expansion.first_batch.len(),
            expansion.remainder.len()
        );

        let first = resolve_refs(&self.resolver, expansion.first_batch, &requester, self.settings.playlist_concurrency).await;
        let mut outcome = match (first.is_empty(), expansion.remainder.is_empty()) {
            (true, true) => return Err(ResolveError::NotFound.into()),
            (true, false) => EnqueueOutcome::pending_only(0),
            (false, _) => self.enqueue_tracks(key, first)?,
        };

        if !expansion.remainder.is_empty() {
            outcome.pending = expansion.remainder.len();
            self.append_in_background(key, expansion.remainder, requester);
        }
        Ok(outcome)
    }

    /// Resolves `refs` off the caller's path and appends them by key once done.
    ///
    /// The append targets whatever session holds `key` at completion time, so
    /// the tracks land after everything queued before. If the session that was
    /// live when scheduling got stopped manually, the tracks are discarded.
    fn append_in_background(&self, key: SessionKey, refs: Vec<TrackRef>, requester: Requester) {
        let origin: Option<Arc<Session>> = self.registry.get(key);
        let player = self.clone();

        tokio::spawn(async move {
            let tracks = resolve_refs(&player.resolver, refs, &requester, player.settings.playlist_concurrency).await;
            if tracks.is_empty() {
                warn!("📜 No playlist entries could be resolved for session {}", key);
                return;
            }
            if origin.as_ref().is_some_and(|session| session.was_stopped()) {
                info!("📜 Session {} was stopped, discarding {} playlist tracks", key, tracks.len());
                return;
            }

            match player.enqueue_tracks(key, tracks) {
                Ok(outcome) => info!("📜 Appended {} playlist tracks to session {}", outcome.added.len(), key),
                Err(e) => warn!("📜 Could not append playlist tracks to session {}: {}", key, e),
            }
        });
    }

    /// Stops the current track; the normal advance path picks the next one.
    ///
    /// The skip is bound to the episode current at call time, so it never
    /// reaches a track that starts after the targeted one already ended.
    pub fn skip(&self, key: SessionKey) -> ControlOutcome {
        let target = self
            .registry
            .get(key)
            .and_then(|session| session.current_episode().map(|episode| (session, episode)));
        match target {
            Some((session, episode)) if session.send(ControllerMsg::Skip { episode }) => ControlOutcome::Applied,
            _ => {
                debug!("Skip in session {} had no effect", key);
                ControlOutcome::NoEffect
            }
        }
    }

    /// Empties the queue without touching the current stream.
    pub fn clear(&self, key: SessionKey) -> ControlOutcome {
        if self.registry.clear(key) > 0 {
            ControlOutcome::Applied
        } else {
            ControlOutcome::NoEffect
        }
    }

    /// Empties the queue, stops playback and disconnects.
    pub fn clear_and_stop(&self, key: SessionKey) -> ControlOutcome {
        let Some(session) = self.registry.get(key) else {
            return ControlOutcome::NoEffect;
        };

        // Closing with the clear sends a racing enqueue to a fresh session
        // instead of into a queue the controller is about to drop.
        session.mark_stopped();
        session.with_queue(|q| {
            q.clear();
            q.close();
        });
        if session.send(ControllerMsg::Stop) {
            info!("⏹️ Stop requested for session {}", key);
            ControlOutcome::Applied
        } else {
            ControlOutcome::NoEffect
        }
    }

    pub fn toggle_loop(&self, key: SessionKey) -> bool {
        self.registry.toggle_loop(key)
    }

    pub fn is_looping(&self, key: SessionKey) -> bool {
        self.registry
            .get(key)
            .is_some_and(|session| session.with_queue(|q| q.is_looping()))
    }

    /// Read-only copy of the queue, current track first.
    pub fn list_queue(&self, key: SessionKey) -> Vec<Track> {
        self.registry.snapshot(key)
    }

    pub fn now_playing(&self, key: SessionKey) -> Option<Track> {
        self.registry.front(key)
    }

    pub fn playback_state(&self, key: SessionKey) -> PlaybackState {
        self.registry
            .get(key)
            .map(|session| session.state())
            .unwrap_or(PlaybackState::Idle)
    }

    pub fn is_active(&self, key: SessionKey) -> bool {
        matches!(self.playback_state(key), PlaybackState::Playing(_))
    }

    /// Total duration queued after the current track.
    pub fn total_remaining(&self, key: SessionKey) -> Duration {
        self.registry.remaining_duration(key)
    }
}

/// Resolves each reference to its first match, keeping input order.
async fn resolve_refs(
    resolver: &Arc<dyn TrackResolver>,
    refs: Vec<TrackRef>,
    requester: &Requester,
    concurrency: usize,
) -> Vec<Track> {
    let results: Vec<_> = stream::iter(refs)
        .map(|track_ref| {
            let resolver = Arc::clone(resolver);
            async move {
                let result = resolver.resolve(track_ref.as_str()).await;
                (track_ref, result)
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut tracks = Vec::with_capacity(results.len());
    for (track_ref, result) in results {
        match result.map(|found| found.into_iter().next()) {
            Ok(Some(metadata)) => tracks.push(Track::from_metadata(metadata, requester.clone())),
            Ok(None) => warn!("🔍 Playlist entry {} matched nothing", track_ref.as_str()),
            Err(e) => warn!("🔍 Playlist entry {} failed: {}", track_ref.as_str(), e),
        }
    }
    tracks
}
