use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{
    events::{EventBus, PlaybackEvent},
    track::{SessionKey, Track},
};

/// Periodic progress notifications for one episode.
///
/// Never shared across tracks: the controller spawns one when an episode
/// starts and awaits [`ProgressReporter::cancel`] before the next one.
#[derive(Debug)]
pub struct ProgressReporter {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ProgressReporter {
    pub fn spawn(session: SessionKey, track: Track, interval: Duration, events: EventBus) -> Self {
        let token = CancellationToken::new();
        let child = token.clone();

        let handle = tokio::spawn(async move {
            let duration = track.duration();
            let mut ticks: u32 = 0;

            loop {
                tokio::select! {
                    biased;
                    _ = child.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                ticks = ticks.saturating_add(1);
                let (elapsed, finished) = elapsed_at(ticks, interval, duration);
                events.emit(PlaybackEvent::Progress {
                    session,
                    track: track.clone(),
                    elapsed,
                });

                if finished {
                    break;
                }
            }

            debug!("⏱️ Progress reporter for '{}' finished after {} tick(s)", track.title(), ticks);
        });

        Self { token, handle }
    }

    /// Cancels the reporter and waits until it has stopped.
    pub async fn cancel(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            debug!("Progress reporter ended abnormally: {:?}", e);
        }
    }
}

/// Elapsed time after `ticks` intervals and whether the episode is over.
///
/// A zero `duration` is unknown: elapsed keeps growing and never finishes.
pub fn elapsed_at(ticks: u32, interval: Duration, duration: Duration) -> (Duration, bool) {
    let raw = interval.saturating_mul(ticks);
    if duration.is_zero() {
        return (raw, false);
    }
    let elapsed = raw.min(duration);
    (elapsed, elapsed >= duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::track::{Requester, StreamRef};
    use pretty_assertions::assert_eq;

    fn track(secs: u64) -> Track {
        Track::new(
            "tick",
            "https://example.com/tick",
            StreamRef::Resolved("https://cdn.example.com/tick.ogg".to_string()),
            Requester::new(1, "tester"),
        )
        .with_duration(Duration::from_secs(secs))
    }

    #[test]
    fn test_elapsed_is_capped_at_duration() {
        let interval = Duration::from_secs(5);
        let duration = Duration::from_secs(12);

        assert_eq!(elapsed_at(1, interval, duration), (Duration::from_secs(5), false));
        assert_eq!(elapsed_at(2, interval, duration), (Duration::from_secs(10), false));
        assert_eq!(elapsed_at(3, interval, duration), (Duration::from_secs(12), true));
    }

    #[test]
    fn test_unknown_duration_never_finishes() {
        let interval = Duration::from_secs(5);

        assert_eq!(elapsed_at(100, interval, Duration::ZERO), (Duration::from_secs(500), false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reporter_stops_at_duration() {
        let (bus, mut rx) = EventBus::channel();
        let reporter = ProgressReporter::spawn(SessionKey(1), track(12), Duration::from_secs(5), bus);

        let mut seen = Vec::new();
        while let Some(PlaybackEvent::Progress { elapsed, .. }) = rx.recv().await {
            seen.push(elapsed.as_secs());
            if seen.len() == 3 {
                break;
            }
        }
        assert_eq!(seen, vec![5, 10, 12]);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());
        reporter.cancel().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_ticks() {
        let (bus, mut rx) = EventBus::channel();
        let reporter = ProgressReporter::spawn(SessionKey(1), track(0), Duration::from_secs(5), bus);

        tokio::time::sleep(Duration::from_secs(11)).await;
        reporter.cancel().await;

        let mut ticks = 0;
        while rx.try_recv().is_ok() {
            ticks += 1;
        }
        assert_eq!(ticks, 2);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(rx.try_recv().is_err());
    }
}
