use std::{collections::VecDeque, time::Duration};
use tracing::{debug, info};

use super::track::{SessionKey, Track, TrackId};

/// Ordered tracks of one session.
///
/// The playing track stays at the front while it plays so loop mode can
/// rotate it to the back; it only leaves the sequence on a non-loop advance.
#[derive(Debug)]
pub struct SessionQueue {
    key: SessionKey,
    tracks: VecDeque<Track>,
    looping: bool,
    max_size: usize,
    closed: bool,
}

/// How an advance changed the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Popped,
    Rotated,
    /// The front was no longer the finished track (cleared or replaced).
    Stale,
}

impl SessionQueue {
    pub fn new(key: SessionKey, max_size: usize) -> Self {
        Self {
            key,
            tracks: VecDeque::new(),
            looping: false,
            max_size,
            closed: false,
        }
    }

    pub fn key(&self) -> SessionKey {
        self.key
    }

    /// Appends in input order, as many as fit. Returns how many were added.
    pub fn extend(&mut self, tracks: Vec<Track>) -> usize {
        let available = self.max_size.saturating_sub(self.tracks.len());
        let to_add = tracks.len().min(available);

        self.tracks.extend(tracks.into_iter().take(to_add));
        info!("➕ {} track(s) queued in session {} ({} total)", to_add, self.key, self.tracks.len());
        to_add
    }

    pub fn front(&self) -> Option<&Track> {
        self.tracks.front()
    }

    pub fn pop_front(&mut self) -> Option<Track> {
        let popped = self.tracks.pop_front();
        if let Some(track) = &popped {
            debug!("➡️ Removed from session {}: {}", self.key, track.title());
        }
        popped
    }

    pub fn rotate_front(&mut self) {
        if let Some(front) = self.tracks.pop_front() {
            debug!("🔁 Rotated to the back of session {}: {}", self.key, front.title());
            self.tracks.push_back(front);
        }
    }

    /// Advances past `finished` only if it is still the front entry.
    pub fn advance(&mut self, finished: TrackId, rotate: bool) -> Advance {
        if self.tracks.front().map(Track::id) != Some(finished) {
            return Advance::Stale;
        }

        if rotate {
            self.rotate_front();
            Advance::Rotated
        } else {
            self.pop_front();
            Advance::Popped
        }
    }

    /// Removes `id` only if it is still the front entry.
    pub fn drop_front(&mut self, id: TrackId) -> Option<Track> {
        if self.tracks.front().map(Track::id) == Some(id) {
            self.pop_front()
        } else {
            None
        }
    }

    /// Empties the queue and turns loop mode off. Returns how many were removed.
    pub fn clear(&mut self) -> usize {
        let cleared = self.tracks.len();
        self.tracks.clear();
        self.looping = false;
        info!("🗑️ Session {} cleared: {} track(s) removed", self.key, cleared);
        cleared
    }

    pub fn toggle_loop(&mut self) -> bool {
        self.looping = !self.looping;
        if self.looping {
            info!("🔁 Loop enabled in session {}", self.key);
        } else {
            info!("➡️ Loop disabled in session {}", self.key);
        }
        self.looping
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn snapshot(&self) -> Vec<Track> {
        self.tracks.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Time left after the current track; unknown durations count as zero.
    pub fn remaining_duration(&self) -> Duration {
        self.tracks.iter().skip(1).map(Track::duration).sum()
    }

    /// A closed queue accepts nothing; its session is being torn down.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::track::{Requester, StreamRef};
    use pretty_assertions::assert_eq;

    fn track(title: &str, secs: u64) -> Track {
        Track::new(
            title,
            format!("https://example.com/{title}"),
            StreamRef::Resolved(format!("https://cdn.example.com/{title}.ogg")),
            Requester::new(1, "tester"),
        )
        .with_duration(Duration::from_secs(secs))
    }

    fn titles(queue: &SessionQueue) -> Vec<String> {
        queue.snapshot().iter().map(|t| t.title().to_string()).collect()
    }

    #[test]
    fn test_extend_keeps_call_order() {
        let mut queue = SessionQueue::new(SessionKey(1), 100);
        queue.extend(vec![track("a", 1), track("b", 1)]);
        queue.extend(vec![track("c", 1)]);

        assert_eq!(titles(&queue), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_extend_truncates_at_capacity() {
        let mut queue = SessionQueue::new(SessionKey(1), 2);
        let added = queue.extend(vec![track("a", 1), track("b", 1), track("c", 1)]);

        assert_eq!(added, 2);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.extend(vec![track("d", 1)]), 0);
    }

    #[test]
    fn test_advance_pops_or_rotates_only_matching_front() {
        let mut queue = SessionQueue::new(SessionKey(1), 100);
        queue.extend(vec![track("a", 1), track("b", 1)]);
        let a = queue.front().map(Track::id).unwrap();

        assert_eq!(queue.advance(a, true), Advance::Rotated);
        assert_eq!(titles(&queue), vec!["b", "a"]);

        // `a` is no longer in front: nothing moves.
        assert_eq!(queue.advance(a, false), Advance::Stale);
        assert_eq!(titles(&queue), vec!["b", "a"]);

        let b = queue.front().map(Track::id).unwrap();
        assert_eq!(queue.advance(b, false), Advance::Popped);
        assert_eq!(titles(&queue), vec!["a"]);
    }

    #[test]
    fn test_toggle_loop_twice_restores_state() {
        let mut queue = SessionQueue::new(SessionKey(1), 100);

        assert!(queue.toggle_loop());
        assert!(!queue.toggle_loop());
        assert!(!queue.is_looping());
    }

    #[test]
    fn test_clear_disables_loop() {
        let mut queue = SessionQueue::new(SessionKey(1), 100);
        queue.extend(vec![track("a", 1)]);
        queue.toggle_loop();

        assert_eq!(queue.clear(), 1);
        assert!(queue.is_empty());
        assert!(!queue.is_looping());
    }

    #[test]
    fn test_remaining_duration_skips_current() {
        let mut queue = SessionQueue::new(SessionKey(1), 100);
        queue.extend(vec![track("a", 30), track("b", 45), track("c", 0)]);

        assert_eq!(queue.remaining_duration(), Duration::from_secs(45));
    }
}
