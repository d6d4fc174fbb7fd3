use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{
    events::{CloseReason, EventBus, PlaybackEvent, SkipReason},
    progress::ProgressReporter,
    queue::{Advance, SessionQueue},
    registry::{Session, SessionRegistry},
    sink::{AudioSink, CompletionNotifier, EpisodeId, SinkFactory},
    track::{StreamRef, Track},
};
use crate::sources::{ResolveError, TrackResolver};

/// Times a looped track may fail in the sink before it is dropped
/// instead of rotated.
const MAX_LOOP_FAILURES: u32 = 1;

/// Messages consumed by a session's controller, in arrival order.
#[derive(Debug)]
pub(crate) enum ControllerMsg {
    /// Tracks were enqueued; start if idle.
    Kick,
    /// The sink finished an episode.
    Completed {
        episode: EpisodeId,
        error: Option<String>,
    },
    /// Skip the start attempt or playback of `episode`; later episodes ignore it.
    Skip { episode: EpisodeId },
    Stop,
}

/// Observable playback state of a session.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum PlaybackState {
    #[default]
    Idle,
    /// Resolving the stream of the front track.
    Starting(Track),
    Playing(Track),
    Advancing,
}

impl PlaybackState {
    pub fn is_idle(&self) -> bool {
        matches!(self, PlaybackState::Idle)
    }

    pub fn track(&self) -> Option<&Track> {
        match self {
            PlaybackState::Starting(track) | PlaybackState::Playing(track) => Some(track),
            _ => None,
        }
    }
}

/// Collaborators shared by every controller of a registry.
pub(crate) struct PlaybackContext {
    pub resolver: Arc<dyn TrackResolver>,
    pub sinks: Arc<dyn SinkFactory>,
    pub events: EventBus,
    pub progress_interval: Duration,
    pub max_queue_size: usize,
}

enum Phase {
    Idle,
    Playing {
        episode: EpisodeId,
        track: Track,
        reporter: ProgressReporter,
    },
}

enum Flow {
    Continue,
    Exit,
}

enum Resolution {
    Ready(Result<String, ResolveError>),
    /// A skip arrived while resolving.
    Discarded,
    Stopped,
}

enum Next {
    Track(Track),
    Exhausted,
}

/// Sole authority over one session's audio sink.
///
/// Runs as its own task and handles one [`ControllerMsg`] at a time, so queue
/// advances, sink commands and progress reporters of a session never overlap.
pub(crate) struct PlaybackController {
    session: Arc<Session>,
    registry: SessionRegistry,
    sink: Arc<dyn AudioSink>,
    resolver: Arc<dyn TrackResolver>,
    events: EventBus,
    progress_interval: Duration,
    mailbox: mpsc::UnboundedReceiver<ControllerMsg>,
    phase: Phase,
    episodes: u64,
    failures: HashMap<String, u32>,
}

impl PlaybackController {
    pub(crate) fn new(
        session: Arc<Session>,
        registry: SessionRegistry,
        context: &PlaybackContext,
        mailbox: mpsc::UnboundedReceiver<ControllerMsg>,
    ) -> Self {
        Self {
            sink: context.sinks.sink_for(session.key()),
            resolver: context.resolver.clone(),
            events: context.events.clone(),
            progress_interval: context.progress_interval,
            session,
            registry,
            mailbox,
            phase: Phase::Idle,
            episodes: 0,
            failures: HashMap::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        debug!("🎛️ Controller for session {} started", self.session.key());

        while let Some(msg) = self.mailbox.recv().await {
            let flow = match msg {
                ControllerMsg::Kick => self.on_kick().await,
                ControllerMsg::Completed { episode, error } => self.on_completed(episode, error).await,
                ControllerMsg::Skip { episode } => self.on_skip(episode).await,
                ControllerMsg::Stop => self.on_stop().await,
            };

            if let Flow::Exit = flow {
                break;
            }
        }

        debug!("🎛️ Controller for session {} exited", self.session.key());
    }

    async fn on_kick(&mut self) -> Flow {
        match self.phase {
            Phase::Idle => self.start().await,
            Phase::Playing { .. } => Flow::Continue,
        }
    }

    /// Starts the front track, dropping unplayable ones until one plays or
    /// the queue runs out. Every failed attempt removes or rotates the front,
    /// and rotations are capped per track, so the loop always terminates.
    async fn start(&mut self) -> Flow {
        loop {
            let next = self.session.with_queue(|q| match q.front() {
                Some(track) => Next::Track(track.clone()),
                None => {
                    q.close();
                    Next::Exhausted
                }
            });

            let track = match next {
                Next::Track(track) => track,
                Next::Exhausted => return self.teardown(CloseReason::QueueExhausted).await,
            };

            self.episodes += 1;
            let episode = EpisodeId(self.episodes);
            self.session.begin_episode(track.clone(), episode);
            let resolution = match track.stream() {
                StreamRef::Resolved(url) => Resolution::Ready(Ok(url.clone())),
                StreamRef::Deferred(reference) => self.resolve_interruptible(reference, episode).await,
            };

            let stream_url = match resolution {
                Resolution::Ready(Ok(url)) => url,
                Resolution::Ready(Err(e)) => {
                    warn!("❌ Could not resolve '{}': {}", track.title(), e);
                    self.session.set_state(PlaybackState::Advancing);
                    self.session.with_queue(|q| q.drop_front(track.id()));
                    self.events.emit(PlaybackEvent::TrackSkipped {
                        session: self.session.key(),
                        track,
                        reason: SkipReason::ResolutionFailed(e),
                    });
                    continue;
                }
                Resolution::Discarded => {
                    info!("⏭️ '{}' skipped before it started", track.title());
                    self.session.set_state(PlaybackState::Advancing);
                    self.session.with_queue(|q| {
                        let rotate = q.is_looping();
                        q.advance(track.id(), rotate)
                    });
                    continue;
                }
                Resolution::Stopped => return self.teardown(CloseReason::Stopped).await,
            };

            let notifier = CompletionNotifier::new(self.session.mailbox(), episode);

            match self.sink.play(&stream_url, notifier).await {
                Ok(()) => {
                    info!("🎵 Session {} playing '{}' (episode {})", self.session.key(), track.title(), episode);
                    let reporter = ProgressReporter::spawn(
                        self.session.key(),
                        track.clone(),
                        self.progress_interval,
                        self.events.clone(),
                    );
                    self.session.set_state(PlaybackState::Playing(track.clone()));
                    self.events.emit(PlaybackEvent::NowPlaying {
                        session: self.session.key(),
                        track: track.clone(),
                    });
                    self.phase = Phase::Playing {
                        episode,
                        track,
                        reporter,
                    };
                    return Flow::Continue;
                }
                Err(e) => {
                    error!("❌ Sink refused '{}': {}", track.title(), e);
                    self.session.set_state(PlaybackState::Advancing);
                    self.advance_past(&track, Some(e.to_string()));
                }
            }
        }
    }

    /// Resolves a deferred stream while still draining the mailbox.
    ///
    /// Resolution is never cancelled; a skip or stop received meanwhile only
    /// decides what happens with its result.
    async fn resolve_interruptible(&mut self, reference: &str, current: EpisodeId) -> Resolution {
        let resolver = self.resolver.clone();
        let resolution = resolver.resolve_stream(reference);
        tokio::pin!(resolution);

        let mut discarded = false;
        let mut stopped = false;

        loop {
            tokio::select! {
                result = &mut resolution => {
                    return if stopped {
                        Resolution::Stopped
                    } else if discarded {
                        Resolution::Discarded
                    } else {
                        Resolution::Ready(result)
                    };
                }
                msg = self.mailbox.recv() => match msg {
                    Some(ControllerMsg::Skip { episode }) if episode == current => discarded = true,
                    Some(ControllerMsg::Skip { episode }) => {
                        debug!("Ignoring skip aimed at episode {}", episode);
                    }
                    Some(ControllerMsg::Stop) => stopped = true,
                    Some(ControllerMsg::Kick) => {}
                    Some(ControllerMsg::Completed { episode, .. }) => {
                        debug!("Ignoring stale completion of episode {}", episode);
                    }
                    None => return Resolution::Stopped,
                },
            }
        }
    }

    async fn on_completed(&mut self, episode: EpisodeId, error: Option<String>) -> Flow {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Playing {
                episode: current,
                track,
                reporter,
            } if current == episode => {
                reporter.cancel().await;
                self.session.set_state(PlaybackState::Advancing);
                if let Some(e) = &error {
                    warn!("⚠️ Playback of '{}' failed: {}", track.title(), e);
                } else {
                    debug!("✅ Finished '{}'", track.title());
                }
                self.advance_past(&track, error);
                self.start().await
            }
            other => {
                self.phase = other;
                debug!("Ignoring stale completion of episode {}", episode);
                Flow::Continue
            }
        }
    }

    /// Pops or rotates the finished track and reports sink failures.
    fn advance_past(&mut self, track: &Track, error: Option<String>) {
        let failures = match &error {
            Some(_) => {
                let count = self.failures.entry(track.canonical_url().to_string()).or_insert(0);
                *count += 1;
                *count
            }
            None => {
                self.failures.remove(track.canonical_url());
                0
            }
        };

        let (advance, looping) = self.session.with_queue(|q| {
            let looping = q.is_looping();
            let rotate = looping && failures <= MAX_LOOP_FAILURES;
            (q.advance(track.id(), rotate), looping)
        });
        debug!("Session {} advance: {:?}", self.session.key(), advance);

        let Some(error) = error else {
            return;
        };

        let reason = if looping && advance == Advance::Popped {
            warn!("🚫 '{}' failed {} times in loop mode, dropping it", track.title(), failures);
            self.failures.remove(track.canonical_url());
            SkipReason::RepeatedFailure(error)
        } else {
            SkipReason::PlaybackFailed(error)
        };

        self.events.emit(PlaybackEvent::TrackSkipped {
            session: self.session.key(),
            track: track.clone(),
            reason,
        });
    }

    async fn on_skip(&mut self, target: EpisodeId) -> Flow {
        let Phase::Playing { episode, track, .. } = &self.phase else {
            debug!("Nothing to skip in session {}", self.session.key());
            return Flow::Continue;
        };
        let episode = *episode;
        if episode != target {
            debug!("Ignoring skip aimed at episode {}, now playing {}", target, episode);
            return Flow::Continue;
        }
        info!("⏭️ Skipping '{}'", track.title());

        // The sink's completion drives the advance; if it cannot stop, advance here.
        if let Err(e) = self.sink.stop().await {
            warn!("Sink could not stop episode {}: {}", episode, e);
            return self.on_completed(episode, None).await;
        }
        Flow::Continue
    }

    async fn on_stop(&mut self) -> Flow {
        if let Phase::Playing { reporter, .. } = std::mem::replace(&mut self.phase, Phase::Idle) {
            reporter.cancel().await;
            if let Err(e) = self.sink.stop().await {
                debug!("Sink stop during teardown failed: {}", e);
            }
        }
        self.teardown(CloseReason::Stopped).await
    }

    /// Closes the session, removes it from the registry and disconnects.
    /// Disconnect failures are logged and otherwise ignored.
    async fn teardown(&mut self, reason: CloseReason) -> Flow {
        self.session.with_queue(SessionQueue::close);
        self.session.set_state(PlaybackState::Idle);
        self.registry.remove_session(&self.session);

        if let Err(e) = self.sink.disconnect().await {
            warn!("🔌 Disconnect of session {} failed (ignored): {}", self.session.key(), e);
        }

        info!("📭 Session {} closed: {:?}", self.session.key(), reason);
        self.events.emit(PlaybackEvent::SessionClosed {
            session: self.session.key(),
            reason,
        });
        Flow::Exit
    }
}
