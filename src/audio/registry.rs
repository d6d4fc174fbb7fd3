use dashmap::DashMap;
use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{
    controller::{ControllerMsg, PlaybackContext, PlaybackController, PlaybackState},
    player::PlayerError,
    queue::SessionQueue,
    sink::EpisodeId,
    track::{SessionKey, Track},
};

/// One playback context: its queue paired with the mailbox of its controller.
#[derive(Debug)]
pub struct Session {
    key: SessionKey,
    queue: Mutex<SessionQueue>,
    state: Mutex<StateSlot>,
    mailbox: mpsc::UnboundedSender<ControllerMsg>,
    stopped: AtomicBool,
}

impl Session {
    fn new(key: SessionKey, mailbox: mpsc::UnboundedSender<ControllerMsg>, max_queue_size: usize) -> Self {
        Self {
            key,
            queue: Mutex::new(SessionQueue::new(key, max_queue_size)),
            state: Mutex::new(StateSlot::default()),
            mailbox,
            stopped: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> SessionKey {
        self.key
    }

    /// Runs `f` inside this session's critical section.
    pub fn with_queue<R>(&self, f: impl FnOnce(&mut SessionQueue) -> R) -> R {
        let mut queue = self.queue.lock();
        f(&mut queue)
    }

    pub fn state(&self) -> PlaybackState {
        self.state.lock().state.clone()
    }

    /// Moves to `Starting(track)` under a fresh episode.
    pub(crate) fn begin_episode(&self, track: Track, episode: EpisodeId) {
        let mut slot = self.state.lock();
        slot.state = PlaybackState::Starting(track);
        slot.episode = Some(episode);
        slot.playing_since = None;
    }

    /// Updates the state. `Playing` keeps the episode begun for it; any
    /// other state has no skippable episode.
    pub(crate) fn set_state(&self, state: PlaybackState) {
        let mut slot = self.state.lock();
        if matches!(state, PlaybackState::Playing(_)) {
            slot.playing_since = Some(Instant::now());
        } else {
            slot.playing_since = None;
            slot.episode = None;
        }
        slot.state = state;
    }

    /// Episode a skip issued now would target, if a track is starting or playing.
    pub(crate) fn current_episode(&self) -> Option<EpisodeId> {
        self.state.lock().episode
    }

    /// When the current track reached the sink, if one is playing.
    pub fn playing_since(&self) -> Option<Instant> {
        self.state.lock().playing_since
    }

    pub(crate) fn mailbox(&self) -> mpsc::UnboundedSender<ControllerMsg> {
        self.mailbox.clone()
    }

    pub(crate) fn send(&self, msg: ControllerMsg) -> bool {
        self.mailbox.send(msg).is_ok()
    }

    pub(crate) fn mark_stopped(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Whether a manual stop was issued for this session.
    pub fn was_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.with_queue(|q| q.is_closed())
    }

    fn push(&self, tracks: Vec<Track>) -> Result<(usize, usize), Vec<Track>> {
        let mut queue = self.queue.lock();
        if queue.is_closed() {
            return Err(tracks);
        }
        let position = queue.len();
        let added = queue.extend(tracks);
        Ok((position, added))
    }
}

#[derive(Debug, Default)]
struct StateSlot {
    state: PlaybackState,
    episode: Option<EpisodeId>,
    playing_since: Option<Instant>,
}

/// Result of a successful append.
#[derive(Debug, Clone)]
pub struct Enqueued {
    pub session: Arc<Session>,
    /// Index of the first added track in the queue.
    pub position: usize,
    pub added: usize,
    pub dropped: usize,
}

/// Maps session keys to their live sessions.
///
/// Entries are created lazily on first enqueue and removed only by their own
/// controller when it tears the session down. Operations on different keys
/// never contend beyond the map shard lookup.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<SessionKey, Arc<Session>>>,
    context: Arc<PlaybackContext>,
}

impl SessionRegistry {
    pub(crate) fn new(context: PlaybackContext) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            context: Arc::new(context),
        }
    }

    /// Idempotent; spawns the session's controller the first time.
    pub fn get_or_create(&self, key: SessionKey) -> Arc<Session> {
        if let Some(session) = self.sessions.get(&key) {
            return session.clone();
        }

        self.sessions
            .entry(key)
            .or_insert_with(|| self.spawn_session(key))
            .clone()
    }

    pub fn get(&self, key: SessionKey) -> Option<Arc<Session>> {
        self.sessions.get(&key).map(|s| s.clone())
    }

    pub fn contains(&self, key: SessionKey) -> bool {
        self.sessions.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Appends `tracks` in order. Never starts playback.
    ///
    /// A session that closed between lookup and append is replaced by a
    /// fresh one, so tracks are never handed to a controller that is exiting.
    pub fn enqueue(&self, key: SessionKey, mut tracks: Vec<Track>) -> Result<Enqueued, PlayerError> {
        if tracks.is_empty() {
            return Err(PlayerError::EmptyRequest);
        }

        loop {
            let session = self.get_or_create(key);
            let requested = tracks.len();
            match session.push(tracks) {
                Ok((_, 0)) => {
                    return Err(PlayerError::QueueFull {
                        max: self.context.max_queue_size,
                    })
                }
                Ok((position, added)) => {
                    return Ok(Enqueued {
                        session,
                        position,
                        added,
                        dropped: requested - added,
                    })
                }
                Err(rejected) => {
                    debug!("♻️ Session {} closed during enqueue, recreating", key);
                    self.remove_session(&session);
                    tracks = rejected;
                }
            }
        }
    }

    pub fn pop_front(&self, key: SessionKey) -> Option<Track> {
        self.get(key)?.with_queue(SessionQueue::pop_front)
    }

    pub fn rotate_front(&self, key: SessionKey) {
        if let Some(session) = self.get(key) {
            session.with_queue(SessionQueue::rotate_front);
        }
    }

    /// Empties the queue and disables loop. Returns how many tracks were removed.
    pub fn clear(&self, key: SessionKey) -> usize {
        self.get(key)
            .map(|session| session.with_queue(SessionQueue::clear))
            .unwrap_or(0)
    }

    /// Flips loop mode and returns the new state; `false` for unknown sessions.
    pub fn toggle_loop(&self, key: SessionKey) -> bool {
        match self.get(key) {
            Some(session) => session.with_queue(SessionQueue::toggle_loop),
            None => {
                debug!("Loop toggle ignored, no session {}", key);
                false
            }
        }
    }

    pub fn snapshot(&self, key: SessionKey) -> Vec<Track> {
        self.get(key)
            .map(|session| session.with_queue(|q| q.snapshot()))
            .unwrap_or_default()
    }

    pub fn front(&self, key: SessionKey) -> Option<Track> {
        self.get(key)?.with_queue(|q| q.front().cloned())
    }

    pub fn remaining_duration(&self, key: SessionKey) -> Duration {
        self.get(key)
            .map(|session| session.with_queue(|q| q.remaining_duration()))
            .unwrap_or_default()
    }

    /// Removes `session` only if it is still the registered one for its key.
    pub(crate) fn remove_session(&self, session: &Arc<Session>) -> bool {
        let removed = self
            .sessions
            .remove_if(&session.key(), |_, current| Arc::ptr_eq(current, session))
            .is_some();
        if removed {
            info!("👋 Session {} removed from registry", session.key());
        }
        removed
    }

    fn spawn_session(&self, key: SessionKey) -> Arc<Session> {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session::new(key, tx, self.context.max_queue_size));
        let controller = PlaybackController::new(session.clone(), self.clone(), &self.context, rx);

        tokio::spawn(controller.run());
        info!("🆕 Session {} created", key);
        session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        events::EventBus,
        testing::{track, FakeSinks, ScriptedResolver},
    };
    use pretty_assertions::assert_eq;

    fn registry(max_queue_size: usize) -> SessionRegistry {
        let (events, _rx) = EventBus::channel();
        SessionRegistry::new(PlaybackContext {
            resolver: Arc::new(ScriptedResolver::default()),
            sinks: Arc::new(FakeSinks::default()),
            events,
            progress_interval: Duration::from_secs(3600),
            max_queue_size,
        })
    }

    fn titles(tracks: &[Track]) -> Vec<&str> {
        tracks.iter().map(Track::title).collect()
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let registry = registry(10);

        let a = registry.get_or_create(SessionKey(1));
        let b = registry.get_or_create(SessionKey(1));

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_concatenates_in_call_order() {
        let registry = registry(10);
        registry.enqueue(SessionKey(1), vec![track("a", 1), track("b", 1)]).unwrap();
        let second = registry.enqueue(SessionKey(1), vec![track("c", 1)]).unwrap();

        assert_eq!(second.position, 2);
        assert_eq!(titles(&registry.snapshot(SessionKey(1))), vec!["a", "b", "c"]);
        assert!(registry.snapshot(SessionKey(2)).is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_reports_dropped_and_full() {
        let registry = registry(2);
        let first = registry
            .enqueue(SessionKey(1), vec![track("a", 1), track("b", 1), track("c", 1)])
            .unwrap();

        assert_eq!((first.added, first.dropped), (2, 1));
        assert!(matches!(
            registry.enqueue(SessionKey(1), vec![track("d", 1)]),
            Err(PlayerError::QueueFull { max: 2 })
        ));
        assert!(matches!(registry.enqueue(SessionKey(1), Vec::new()), Err(PlayerError::EmptyRequest)));
    }

    #[tokio::test]
    async fn test_enqueue_into_closed_session_recreates_it() {
        let registry = registry(10);
        let old = registry.get_or_create(SessionKey(1));
        old.with_queue(SessionQueue::close);

        let enqueued = registry.enqueue(SessionKey(1), vec![track("a", 1)]).unwrap();

        assert!(!Arc::ptr_eq(&old, &enqueued.session));
        assert!(old.with_queue(|q| q.is_empty()));
        assert_eq!(titles(&registry.snapshot(SessionKey(1))), vec!["a"]);
    }

    #[tokio::test]
    async fn test_queue_operations_by_key() {
        let registry = registry(10);
        registry
            .enqueue(SessionKey(1), vec![track("a", 10), track("b", 20), track("c", 30)])
            .unwrap();

        registry.rotate_front(SessionKey(1));
        assert_eq!(titles(&registry.snapshot(SessionKey(1))), vec!["b", "c", "a"]);
        assert_eq!(registry.remaining_duration(SessionKey(1)), Duration::from_secs(40));

        let popped = registry.pop_front(SessionKey(1)).unwrap();
        assert_eq!(popped.title(), "b");
        assert_eq!(registry.front(SessionKey(1)).unwrap().title(), "c");

        assert!(registry.toggle_loop(SessionKey(1)));
        assert_eq!(registry.clear(SessionKey(1)), 2);
        let session = registry.get(SessionKey(1)).unwrap();
        assert!(!session.with_queue(|q| q.is_looping()));
    }

    #[tokio::test]
    async fn test_unknown_session_operations_are_no_ops() {
        let registry = registry(10);

        assert!(registry.pop_front(SessionKey(9)).is_none());
        assert_eq!(registry.clear(SessionKey(9)), 0);
        assert!(!registry.toggle_loop(SessionKey(9)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_episode_is_skippable_only_while_starting_or_playing() {
        let registry = registry(10);
        let session = registry.get_or_create(SessionKey(1));
        assert_eq!(session.current_episode(), None);

        session.begin_episode(track("a", 1), EpisodeId(7));
        assert_eq!(session.current_episode(), Some(EpisodeId(7)));
        assert!(session.playing_since().is_none());

        session.set_state(PlaybackState::Playing(track("a", 1)));
        assert_eq!(session.current_episode(), Some(EpisodeId(7)));
        assert!(session.playing_since().is_some());

        session.set_state(PlaybackState::Advancing);
        assert_eq!(session.current_episode(), None);
        assert!(session.playing_since().is_none());
    }

    #[tokio::test]
    async fn test_remove_session_ignores_replaced_entries() {
        let registry = registry(10);
        let old = registry.get_or_create(SessionKey(1));
        assert!(registry.remove_session(&old));

        let new = registry.get_or_create(SessionKey(1));
        assert!(!registry.remove_session(&old));
        assert!(registry.contains(SessionKey(1)));
        assert!(registry.remove_session(&new));
    }
}
