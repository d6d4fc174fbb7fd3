use async_trait::async_trait;
use std::{fmt, sync::Arc};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use super::{controller::ControllerMsg, track::SessionKey};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("no voice connection for session {0}")]
    NotConnected(SessionKey),
    #[error("audio sink failure: {0}")]
    Failed(String),
}

/// One start attempt of one track. Completions and skips carry it so the
/// controller can tell which attempt they belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EpisodeId(pub(crate) u64);

impl fmt::Display for EpisodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Completion callback handed to the sink with every `play`.
///
/// Completing only enqueues a message on the owning session's mailbox, so it
/// is safe to call from any thread or runtime, and consuming `self` makes a
/// second completion for the same episode impossible.
#[derive(Debug)]
pub struct CompletionNotifier {
    mailbox: mpsc::UnboundedSender<ControllerMsg>,
    episode: EpisodeId,
}

impl CompletionNotifier {
    pub(crate) fn new(mailbox: mpsc::UnboundedSender<ControllerMsg>, episode: EpisodeId) -> Self {
        Self { mailbox, episode }
    }

    pub fn episode(&self) -> EpisodeId {
        self.episode
    }

    /// Reports the end of the episode, with the error that ended it if any.
    pub fn complete(self, error: Option<String>) {
        let msg = ControllerMsg::Completed {
            episode: self.episode,
            error,
        };
        if self.mailbox.send(msg).is_err() {
            debug!("🔇 Episode {} completed after its session closed", self.episode);
        }
    }
}

/// Renders resolved streams to a live voice connection.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Starts rendering `stream_url`. The sink must eventually call
    /// `on_complete` exactly once unless `play` itself returns an error.
    async fn play(&self, stream_url: &str, on_complete: CompletionNotifier) -> Result<(), SinkError>;

    /// Stops the current stream; this raises its completion.
    async fn stop(&self) -> Result<(), SinkError>;

    async fn is_active(&self) -> bool;

    async fn disconnect(&self) -> Result<(), SinkError>;
}

/// Hands out the sink bound to a session's voice connection.
pub trait SinkFactory: Send + Sync {
    fn sink_for(&self, session: SessionKey) -> Arc<dyn AudioSink>;
}
