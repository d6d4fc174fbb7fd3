use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use reqwest::Client as HttpClient;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    error::JoinResult,
    input::{HttpRequest, Input},
    tracks::{PlayMode, TrackHandle},
    Event as VoiceEvent, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::audio::{
    sink::{AudioSink, CompletionNotifier, SinkError, SinkFactory},
    track::SessionKey,
};

/// Builds one [`SongbirdSink`] per guild on a shared songbird manager.
pub struct SongbirdSinks {
    manager: Arc<Songbird>,
    http: HttpClient,
    channels: Arc<DashMap<GuildId, ChannelId>>,
}

impl SongbirdSinks {
    pub fn new(manager: Arc<Songbird>, http: HttpClient) -> Self {
        Self {
            manager,
            http,
            channels: Arc::new(DashMap::new()),
        }
    }

    /// Joins `channel` unless already there and remembers it for rejoins.
    pub async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> JoinResult<()> {
        self.channels.insert(guild_id, channel_id);
        join_channel(&self.manager, guild_id, channel_id).await
    }

    /// Channel the bot currently sits in for `guild_id`.
    pub async fn current_channel(&self, guild_id: GuildId) -> Option<ChannelId> {
        let call = self.manager.get(guild_id)?;
        let channel = call.lock().await.current_channel()?;
        Some(ChannelId::new(channel.0.get()))
    }

    pub fn forget(&self, guild_id: GuildId) {
        self.channels.remove(&guild_id);
    }
}

async fn join_channel(manager: &Songbird, guild_id: GuildId, channel_id: ChannelId) -> JoinResult<()> {
    if let Some(call) = manager.get(guild_id) {
        let current = call.lock().await.current_channel();
        if current.is_some_and(|c| c.0.get() == channel_id.get()) {
            return Ok(());
        }
    }

    manager.join(guild_id, channel_id).await?;
    info!("🔊 Joined voice channel {} in guild {}", channel_id, guild_id);
    Ok(())
}

impl SinkFactory for SongbirdSinks {
    fn sink_for(&self, session: SessionKey) -> Arc<dyn AudioSink> {
        Arc::new(SongbirdSink {
            guild_id: GuildId::new(session.0),
            manager: self.manager.clone(),
            http: self.http.clone(),
            channels: self.channels.clone(),
            current: Mutex::new(None),
        })
    }
}

/// Plays streams on the guild's songbird call.
///
/// The bot joins the voice channel before enqueueing. A session recreated
/// after a disconnect rejoins the last channel the bot was asked to join.
pub struct SongbirdSink {
    guild_id: GuildId,
    manager: Arc<Songbird>,
    http: HttpClient,
    channels: Arc<DashMap<GuildId, ChannelId>>,
    current: Mutex<Option<TrackHandle>>,
}

impl SongbirdSink {
    async fn call(&self) -> Result<Arc<tokio::sync::Mutex<songbird::Call>>, SinkError> {
        if let Some(call) = self.manager.get(self.guild_id) {
            return Ok(call);
        }

        let not_connected = SinkError::NotConnected(SessionKey(self.guild_id.get()));
        let Some(channel_id) = self.channels.get(&self.guild_id).map(|c| *c) else {
            return Err(not_connected);
        };
        join_channel(&self.manager, self.guild_id, channel_id)
            .await
            .map_err(|e| SinkError::Failed(format!("could not rejoin: {e}")))?;
        self.manager.get(self.guild_id).ok_or(not_connected)
    }
}

#[async_trait]
impl AudioSink for SongbirdSink {
    async fn play(&self, stream_url: &str, on_complete: CompletionNotifier) -> Result<(), SinkError> {
        let call = self.call().await?;

        let input: Input = HttpRequest::new(self.http.clone(), stream_url.to_string()).into();
        let handle = {
            let mut call = call.lock().await;
            call.play_only_input(input)
        };

        // Errored tracks raise both Error and End; the notifier fires once.
        let episode = on_complete.episode();
        let notifier = Arc::new(Mutex::new(Some(on_complete)));
        for event in [TrackEvent::End, TrackEvent::Error] {
            handle
                .add_event(
                    VoiceEvent::Track(event),
                    EpisodeEndHandler {
                        guild_id: self.guild_id,
                        notifier: notifier.clone(),
                    },
                )
                .map_err(|e| SinkError::Failed(e.to_string()))?;
        }

        debug!("🔊 Guild {} streaming episode {}", self.guild_id, episode);
        *self.current.lock() = Some(handle);
        Ok(())
    }

    async fn stop(&self) -> Result<(), SinkError> {
        let Some(handle) = self.current.lock().take() else {
            return Ok(());
        };
        handle.stop().map_err(|e| SinkError::Failed(e.to_string()))
    }

    async fn is_active(&self) -> bool {
        let handle = self.current.lock().clone();
        match handle {
            Some(handle) => handle
                .get_info()
                .await
                .map(|state| state.playing == PlayMode::Play)
                .unwrap_or(false),
            None => false,
        }
    }

    async fn disconnect(&self) -> Result<(), SinkError> {
        self.current.lock().take();
        if self.manager.get(self.guild_id).is_none() {
            return Err(SinkError::NotConnected(SessionKey(self.guild_id.get())));
        }

        self.manager
            .remove(self.guild_id)
            .await
            .map_err(|e| SinkError::Failed(e.to_string()))?;
        info!("👋 Left voice in guild {}", self.guild_id);
        Ok(())
    }
}

struct EpisodeEndHandler {
    guild_id: GuildId,
    notifier: Arc<Mutex<Option<CompletionNotifier>>>,
}

#[async_trait]
impl VoiceEventHandler for EpisodeEndHandler {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        let error = match ctx {
            EventContext::Track(tracks) => tracks.iter().find_map(|(state, _)| match &state.playing {
                PlayMode::Errored(e) => Some(e.to_string()),
                _ => None,
            }),
            _ => None,
        };

        if let Some(notifier) = self.notifier.lock().take() {
            if let Some(e) = &error {
                warn!("❌ Track error in guild {}: {}", self.guild_id, e);
            }
            notifier.complete(error);
        }

        None
    }
}
