use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use super::track::{SessionKey, Track};
use crate::sources::ResolveError;

/// Notifications for the presentation layer.
#[derive(Debug, Clone)]
pub enum PlaybackEvent {
    NowPlaying {
        session: SessionKey,
        track: Track,
    },
    Progress {
        session: SessionKey,
        track: Track,
        elapsed: Duration,
    },
    TrackSkipped {
        session: SessionKey,
        track: Track,
        reason: SkipReason,
    },
    SessionClosed {
        session: SessionKey,
        reason: CloseReason,
    },
}

impl PlaybackEvent {
    pub fn session(&self) -> SessionKey {
        match self {
            PlaybackEvent::NowPlaying { session, .. }
            | PlaybackEvent::Progress { session, .. }
            | PlaybackEvent::TrackSkipped { session, .. }
            | PlaybackEvent::SessionClosed { session, .. } => *session,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// No stream could be obtained; the track was dropped.
    ResolutionFailed(ResolveError),
    /// The sink failed mid-playback; the queue advanced as usual.
    PlaybackFailed(String),
    /// A looped track failed again and was dropped instead of rotated.
    RepeatedFailure(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    QueueExhausted,
    Stopped,
}

pub type EventReceiver = mpsc::UnboundedReceiver<PlaybackEvent>;

/// Fire-and-forget sender; delivery failures never reach playback.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: mpsc::UnboundedSender<PlaybackEvent>,
}

impl EventBus {
    pub fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: PlaybackEvent) {
        if let Err(e) = self.tx.send(event) {
            debug!("📭 Nobody listening for playback events, dropped {:?}", e.0.session());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_receiver_is_harmless() {
        let (bus, rx) = EventBus::channel();
        drop(rx);

        bus.emit(PlaybackEvent::SessionClosed {
            session: SessionKey(3),
            reason: CloseReason::Stopped,
        });
    }
}
