use anyhow::Result;
use dashmap::DashMap;
use serenity::{
    all::{ChannelId, Http, MessageId},
    builder::{CreateMessage, EditMessage},
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use crate::{
    audio::{
        events::{EventReceiver, PlaybackEvent},
        player::AudioPlayer,
        track::{SessionKey, Track},
    },
    ui::{buttons, embeds},
};

/// Posts playback events to the text channel a session was started from.
pub struct Announcer {
    http: Arc<Http>,
    player: AudioPlayer,
    channels: DashMap<SessionKey, ChannelId>,
    now_playing: DashMap<SessionKey, MessageId>,
}

impl Announcer {
    pub fn new(http: Arc<Http>, player: AudioPlayer) -> Self {
        Self {
            http,
            player,
            channels: DashMap::new(),
            now_playing: DashMap::new(),
        }
    }

    /// Routes later announcements of `session` to `channel`. The binding
    /// outlives the session so a playlist remainder that recreates it is
    /// still announced.
    pub fn bind(&self, session: SessionKey, channel: ChannelId) {
        self.channels.insert(session, channel);
    }

    /// Drains `events` until every sender is gone.
    pub async fn run(self: Arc<Self>, mut events: EventReceiver) {
        info!("📣 Announcer started");
        while let Some(event) = events.recv().await {
            let session = event.session();
            if let Err(e) = self.announce(event).await {
                warn!("📣 Could not announce for session {}: {:?}", session, e);
            }
        }
        info!("📣 Announcer stopped");
    }

    async fn announce(&self, event: PlaybackEvent) -> Result<()> {
        let Some(channel) = self.channels.get(&event.session()).map(|c| *c) else {
            debug!("No text channel bound for session {}", event.session());
            return Ok(());
        };

        match event {
            PlaybackEvent::NowPlaying { session, track } => {
                let message = CreateMessage::new()
                    .embed(self.now_playing_embed(session, &track, Duration::ZERO))
                    .components(buttons::create_player_buttons(self.player.is_looping(session)));
                let sent = channel.send_message(&self.http, message).await?;
                self.now_playing.insert(session, sent.id);
            }
            PlaybackEvent::Progress { session, track, elapsed } => {
                let Some(message_id) = self.now_playing.get(&session).map(|m| *m) else {
                    return Ok(());
                };
                let edit = EditMessage::new().embed(self.now_playing_embed(session, &track, elapsed));
                channel.edit_message(&self.http, message_id, edit).await?;
            }
            PlaybackEvent::TrackSkipped { track, reason, .. } => {
                let message = CreateMessage::new().embed(embeds::create_skipped_embed(&track, &reason));
                channel.send_message(&self.http, message).await?;
            }
            PlaybackEvent::SessionClosed { session, reason } => {
                self.now_playing.remove(&session);
                let message = CreateMessage::new().embed(embeds::create_session_closed_embed(reason));
                channel.send_message(&self.http, message).await?;
            }
        }

        Ok(())
    }

    fn now_playing_embed(&self, session: SessionKey, track: &Track, elapsed: Duration) -> serenity::builder::CreateEmbed {
        embeds::create_now_playing_embed(track, elapsed, self.player.is_looping(session))
    }
}
