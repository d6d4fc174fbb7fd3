//! Test doubles for the audio core.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::{collections::HashSet, sync::Arc, time::Duration};
use tokio::sync::Semaphore;

use super::{
    events::{EventReceiver, PlaybackEvent},
    sink::{AudioSink, CompletionNotifier, SinkError, SinkFactory},
    track::{Requester, SessionKey, StreamRef, Track},
};
use crate::sources::{CatalogExpander, PlaylistExpansion, ResolveError, TrackMetadata, TrackRef, TrackResolver};

pub fn requester() -> Requester {
    Requester::new(42, "tester")
}

/// Track with an already resolved stream `stream://<title>`.
pub fn track(title: &str, secs: u64) -> Track {
    Track::new(
        title,
        format!("https://example.com/{title}"),
        StreamRef::Resolved(format!("stream://{title}")),
        requester(),
    )
    .with_duration(Duration::from_secs(secs))
}

/// Track whose stream must be resolved from `ref://<title>`.
pub fn deferred(title: &str, secs: u64) -> Track {
    Track::new(
        title,
        format!("https://example.com/{title}"),
        StreamRef::Deferred(format!("ref://{title}")),
        requester(),
    )
    .with_duration(Duration::from_secs(secs))
}

pub fn titles(tracks: &[Track]) -> Vec<String> {
    tracks.iter().map(|t| t.title().to_string()).collect()
}

/// Next non-progress event, failing the test after two seconds.
pub async fn next_event(rx: &mut EventReceiver) -> PlaybackEvent {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for a playback event")
            .expect("event channel closed");
        if !matches!(event, PlaybackEvent::Progress { .. }) {
            return event;
        }
    }
}

/// Title carried by a NowPlaying event, panicking on anything else.
pub async fn expect_now_playing(rx: &mut EventReceiver) -> String {
    match next_event(rx).await {
        PlaybackEvent::NowPlaying { track, .. } => track.title().to_string(),
        other => panic!("expected NowPlaying, got {other:?}"),
    }
}

#[derive(Default)]
struct FakeSinkState {
    played: Vec<String>,
    pending: Option<CompletionNotifier>,
    failing: HashSet<String>,
    stops: usize,
    disconnects: usize,
}

/// Records commands and holds the completion of the current stream until
/// the test calls [`FakeSink::finish`].
#[derive(Default)]
pub struct FakeSink {
    state: Mutex<FakeSinkState>,
}

impl FakeSink {
    /// Raises the completion of the current stream.
    pub fn finish(&self, error: Option<&str>) {
        let notifier = self.state.lock().pending.take().expect("nothing is playing");
        notifier.complete(error.map(str::to_string));
    }

    pub fn fail_on(&self, stream_url: &str) {
        self.state.lock().failing.insert(stream_url.to_string());
    }

    pub fn played(&self) -> Vec<String> {
        self.state.lock().played.clone()
    }

    pub fn stops(&self) -> usize {
        self.state.lock().stops
    }

    pub fn disconnects(&self) -> usize {
        self.state.lock().disconnects
    }
}

#[async_trait]
impl AudioSink for FakeSink {
    async fn play(&self, stream_url: &str, on_complete: CompletionNotifier) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        state.played.push(stream_url.to_string());
        if state.failing.contains(stream_url) {
            return Err(SinkError::Failed(format!("cannot decode {stream_url}")));
        }
        state.pending = Some(on_complete);
        Ok(())
    }

    async fn stop(&self) -> Result<(), SinkError> {
        let pending = {
            let mut state = self.state.lock();
            state.stops += 1;
            state.pending.take()
        };
        if let Some(notifier) = pending {
            notifier.complete(None);
        }
        Ok(())
    }

    async fn is_active(&self) -> bool {
        self.state.lock().pending.is_some()
    }

    async fn disconnect(&self) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        state.disconnects += 1;
        if state.disconnects > 1 {
            return Err(SinkError::Failed("already disconnected".to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeSinks {
    sinks: DashMap<SessionKey, Arc<FakeSink>>,
}

impl FakeSinks {
    pub fn get(&self, key: SessionKey) -> Arc<FakeSink> {
        self.sinks.entry(key).or_default().clone()
    }
}

impl SinkFactory for FakeSinks {
    fn sink_for(&self, session: SessionKey) -> Arc<dyn AudioSink> {
        self.get(session)
    }
}

/// Resolves `q` to a track titled `q` with stream `stream://q`.
///
/// Queries or references listed in `gated` wait for [`ScriptedResolver::release`];
/// those listed in `failing` return `NotFound`.
pub struct ScriptedResolver {
    gated: HashSet<String>,
    failing: HashSet<String>,
    gate: Semaphore,
}

impl Default for ScriptedResolver {
    fn default() -> Self {
        Self {
            gated: HashSet::new(),
            failing: HashSet::new(),
            gate: Semaphore::new(0),
        }
    }
}

impl ScriptedResolver {
    pub fn gated(mut self, keys: &[&str]) -> Self {
        self.gated.extend(keys.iter().map(|k| k.to_string()));
        self
    }

    pub fn failing(mut self, keys: &[&str]) -> Self {
        self.failing.extend(keys.iter().map(|k| k.to_string()));
        self
    }

    pub fn release(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }

    async fn wait_if_gated(&self, key: &str) {
        if self.gated.contains(key) {
            let _ = self.gate.acquire().await;
        }
    }
}

#[async_trait]
impl TrackResolver for ScriptedResolver {
    async fn resolve(&self, query: &str) -> Result<Vec<TrackMetadata>, ResolveError> {
        self.wait_if_gated(query).await;
        if self.failing.contains(query) {
            return Err(ResolveError::NotFound);
        }
        Ok(vec![TrackMetadata {
            title: query.to_string(),
            canonical_url: format!("https://example.com/{query}"),
            stream: StreamRef::Resolved(format!("stream://{query}")),
            duration: Some(Duration::from_secs(30)),
            thumbnail: None,
        }])
    }

    async fn resolve_stream(&self, reference: &str) -> Result<String, ResolveError> {
        self.wait_if_gated(reference).await;
        if self.failing.contains(reference) {
            return Err(ResolveError::NotFound);
        }
        Ok(reference.replacen("ref://", "stream://", 1))
    }
}

/// Expands `playlist:*` into a fixed list of references.
pub struct FakeCatalog {
    pub refs: Vec<&'static str>,
}

#[async_trait]
impl CatalogExpander for FakeCatalog {
    fn handles(&self, query: &str) -> bool {
        query.starts_with("playlist:")
    }

    async fn expand_playlist(&self, _url: &str, eager: usize) -> Result<PlaylistExpansion, ResolveError> {
        let refs = self.refs.iter().map(|r| TrackRef(r.to_string())).collect();
        Ok(PlaylistExpansion::split(refs, eager))
    }
}
