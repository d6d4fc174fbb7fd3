//! # Bot Module
//!
//! Discord glue around the playback core.
//!
//! [`JukeboxBot`] implements Serenity's [`EventHandler`]: prefix commands,
//! slash commands and player buttons all go through the same command
//! dispatch onto [`AudioPlayer`] calls, voice state updates drive
//! auto-leave, and the [`announcer::Announcer`] turns playback events into
//! channel messages. Audio goes out through [`voice::SongbirdSinks`].

use anyhow::Result;
use serenity::{
    all::{
        ChannelId, CommandInteraction, ComponentInteraction, Context, CreateInteractionResponse,
        CreateInteractionResponseMessage, EditInteractionResponse, EventHandler, GuildId, Interaction, Message, Ready,
        User, UserId, VoiceState,
    },
    async_trait,
    builder::{CreateActionRow, CreateEmbed, CreateMessage},
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub mod announcer;
pub mod commands;
pub mod voice;

use crate::{
    audio::{
        player::{AudioPlayer, ControlOutcome, PlayerError},
        track::{Requester, SessionKey},
    },
    config::Config,
    sources::ResolveError,
    ui::{
        buttons::{create_player_buttons, ButtonAction},
        embeds::{self, create_error_embed, create_info_embed, create_success_embed},
    },
};
use announcer::Announcer;
use commands::Command;
use voice::SongbirdSinks;

/// Answer to a command, whichever way it was issued.
struct Reply {
    embed: CreateEmbed,
    components: Vec<CreateActionRow>,
}

impl From<CreateEmbed> for Reply {
    fn from(embed: CreateEmbed) -> Self {
        Self {
            embed,
            components: Vec::new(),
        }
    }
}

pub struct JukeboxBot {
    config: Arc<Config>,
    player: AudioPlayer,
    sinks: Arc<SongbirdSinks>,
    announcer: Arc<Announcer>,
}

impl JukeboxBot {
    pub fn new(config: Arc<Config>, player: AudioPlayer, sinks: Arc<SongbirdSinks>, announcer: Arc<Announcer>) -> Self {
        Self {
            config,
            player,
            sinks,
            announcer,
        }
    }

    /// Runs `command` for `author`; failures end up in the reply embed.
    async fn execute(&self, ctx: &Context, guild_id: GuildId, channel_id: ChannelId, author: &User, command: Command) -> Reply {
        let key = session_key(guild_id);
        debug!("⌨️ {} in guild {} by {}", command.name(), guild_id, author.name);

        let embed = match command {
            Command::Play(query) => self.play(ctx, guild_id, channel_id, author, &query).await,
            Command::Skip => match self.player.skip(key) {
                ControlOutcome::Applied => create_success_embed("Skipped", "Moving on to the next track"),
                ControlOutcome::NoEffect => create_info_embed("⏭️ Skip", "Nothing is playing"),
            },
            Command::Stop => {
                self.sinks.forget(guild_id);
                match self.player.clear_and_stop(key) {
                    ControlOutcome::Applied => create_success_embed("Stopped", "Queue cleared, leaving the channel"),
                    ControlOutcome::NoEffect => create_info_embed("⏹️ Stop", "Nothing is playing"),
                }
            }
            Command::Clear => match self.player.clear(key) {
                ControlOutcome::Applied => create_success_embed("Queue cleared", "The current track keeps playing"),
                ControlOutcome::NoEffect => create_info_embed("🧹 Clear", "The queue is already empty"),
            },
            Command::Loop => self.loop_embed(key),
            Command::Queue => self.queue_embed(key),
            Command::NowPlaying => match self.player.playback_state(key).track().cloned() {
                Some(track) => embeds::create_now_playing_embed(&track, progress_of(&self.player, key), self.player.is_looping(key)),
                None => create_info_embed("🎵 Now Playing", "Nothing is playing"),
            },
            Command::Controls => {
                return Reply {
                    embed: create_info_embed("🎛️ Controls", "Control the player with the buttons below"),
                    components: create_player_buttons(self.player.is_looping(key)),
                }
            }
            Command::Help => embeds::create_help_embed(&self.config.command_prefix),
            Command::Unknown(name) => create_error_embed(
                "Unknown command",
                &format!("`{}{}` does not exist, try `{}help`", self.config.command_prefix, name, self.config.command_prefix),
            ),
        };

        embed.into()
    }

    async fn play(&self, ctx: &Context, guild_id: GuildId, channel_id: ChannelId, author: &User, query: &str) -> CreateEmbed {
        if query.trim().is_empty() {
            let usage = format!("Usage: `{}play <search or url>`", self.config.command_prefix);
            return create_error_embed("Missing query", &usage);
        }

        let Some(voice_channel) = author_voice_channel(ctx, guild_id, author.id) else {
            return create_error_embed("Not in voice", "Join a voice channel first");
        };

        if let Err(e) = self.sinks.join(guild_id, voice_channel).await {
            error!("❌ Could not join voice in guild {}: {:?}", guild_id, e);
            return create_error_embed("Voice error", "Could not join your voice channel");
        }

        let key = session_key(guild_id);
        self.announcer.bind(key, channel_id);

        let requester = Requester::new(author.id.get(), author.name.clone());
        match self.player.enqueue(key, query, requester).await {
            Ok(outcome) if outcome.added.is_empty() => create_info_embed(
                "⏳ Loading playlist",
                &format!("{} tracks are being added in background", outcome.pending),
            ),
            Ok(outcome) => embeds::create_added_embed(&outcome),
            Err(e) => {
                warn!("⚠️ play '{}' failed in guild {}: {}", query, guild_id, e);
                player_error_embed(&e)
            }
        }
    }

    async fn handle_message(&self, ctx: &Context, msg: &Message, guild_id: GuildId, command: Command) -> Result<()> {
        let reply = self.execute(ctx, guild_id, msg.channel_id, &msg.author, command).await;
        let message = CreateMessage::new().embed(reply.embed).components(reply.components);
        msg.channel_id.send_message(&ctx.http, message).await?;
        Ok(())
    }

    async fn handle_slash(&self, ctx: &Context, interaction: &CommandInteraction) -> Result<()> {
        let Some(guild_id) = interaction.guild_id else {
            let response = CreateInteractionResponseMessage::new()
                .embed(create_error_embed("Server only", "Use this command inside a server"))
                .ephemeral(true);
            interaction
                .create_response(&ctx.http, CreateInteractionResponse::Message(response))
                .await?;
            return Ok(());
        };

        let command = Command::from_interaction(interaction);
        info!("📝 /{} used by {} in guild {}", interaction.data.name, interaction.user.name, guild_id);

        // Resolving a query can outlast the interaction deadline.
        let ephemeral = matches!(command, Command::Controls | Command::Queue);
        interaction
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new().ephemeral(ephemeral)),
            )
            .await?;

        let reply = self
            .execute(ctx, guild_id, interaction.channel_id, &interaction.user, command)
            .await;
        interaction
            .edit_response(
                &ctx.http,
                EditInteractionResponse::new().embed(reply.embed).components(reply.components),
            )
            .await?;
        Ok(())
    }

    async fn handle_button(&self, ctx: &Context, component: &ComponentInteraction) -> Result<()> {
        let Some(action) = ButtonAction::from_custom_id(&component.data.custom_id) else {
            return Ok(());
        };
        let Some(guild_id) = component.guild_id else {
            return Ok(());
        };

        let command = match action {
            ButtonAction::Skip => Command::Skip,
            ButtonAction::Stop => Command::Stop,
            ButtonAction::Loop => Command::Loop,
            ButtonAction::Queue => Command::Queue,
        };
        let reply = self
            .execute(ctx, guild_id, component.channel_id, &component.user, command)
            .await;

        let response = CreateInteractionResponseMessage::new().embed(reply.embed).ephemeral(true);
        component
            .create_response(&ctx.http, CreateInteractionResponse::Message(response))
            .await?;
        Ok(())
    }

    fn loop_embed(&self, key: SessionKey) -> CreateEmbed {
        if !self.player.registry().contains(key) {
            return create_info_embed("🔁 Loop", "Nothing is playing");
        }
        if self.player.toggle_loop(key) {
            create_success_embed("Loop on", "The queue will repeat")
        } else {
            create_info_embed("🔁 Loop off", "Tracks leave the queue once played")
        }
    }

    fn queue_embed(&self, key: SessionKey) -> CreateEmbed {
        embeds::create_queue_embed(
            &self.player.list_queue(key),
            self.player.is_looping(key),
            self.player.total_remaining(key),
        )
    }

    /// Stops the session when the bot is disconnected or left alone.
    async fn check_auto_leave(&self, ctx: &Context, guild_id: GuildId, old: Option<&VoiceState>, new: &VoiceState) {
        let key = session_key(guild_id);
        if !self.player.registry().contains(key) {
            return;
        }

        let bot_id = ctx.cache.current_user().id;
        if new.user_id == bot_id && old.is_some_and(|o| o.channel_id.is_some()) && new.channel_id.is_none() {
            info!("🔌 Disconnected from voice in guild {}", guild_id);
            self.sinks.forget(guild_id);
            self.player.clear_and_stop(key);
            return;
        }

        let Some(bot_channel) = self.sinks.current_channel(guild_id).await else {
            return;
        };
        if listeners_in(ctx, guild_id, bot_channel, bot_id) == Some(0) {
            info!("🚪 Alone in voice channel {} of guild {}, leaving", bot_channel, guild_id);
            self.sinks.forget(guild_id);
            self.player.clear_and_stop(key);
        }
    }
}

#[async_trait]
impl EventHandler for JukeboxBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} is online!", ready.user.name);
        info!("📊 Connected to {} guilds", ready.guilds.len());

        let guild = self.config.command_guild_id.map(GuildId::new);
        match commands::register_slash_commands(&ctx, guild).await {
            Ok(()) => info!("📝 Slash commands registered ({})", guild.map_or("global".to_string(), |g| g.to_string())),
            Err(e) => error!("❌ Could not register slash commands: {:?}", e),
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let Some(guild_id) = msg.guild_id else {
            return;
        };
        let Some(command) = Command::parse(&msg.content, &self.config.command_prefix) else {
            return;
        };

        if let Err(e) = self.handle_message(&ctx, &msg, guild_id, command).await {
            error!("Error handling command: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        match interaction {
            Interaction::Command(command) => {
                if let Err(e) = self.handle_slash(&ctx, &command).await {
                    error!("Error handling slash command: {:?}", e);
                }
            }
            Interaction::Component(component) => {
                if let Err(e) = self.handle_button(&ctx, &component).await {
                    error!("Error handling button: {:?}", e);
                }
            }
            _ => {}
        }
    }

    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        if let Some(guild_id) = new.guild_id {
            self.check_auto_leave(&ctx, guild_id, old.as_ref(), &new).await;
        }
    }
}

pub fn session_key(guild_id: GuildId) -> SessionKey {
    SessionKey(guild_id.get())
}

fn author_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = ctx.cache.guild(guild_id)?;
    guild.voice_states.get(&user_id).and_then(|state| state.channel_id)
}

/// Non-bot members in `channel`, or `None` if the guild is not cached.
fn listeners_in(ctx: &Context, guild_id: GuildId, channel: ChannelId, bot_id: UserId) -> Option<usize> {
    let guild = ctx.cache.guild(guild_id)?;
    let count = guild
        .voice_states
        .values()
        .filter(|state| state.channel_id == Some(channel) && state.user_id != bot_id)
        .filter(|state| !state.member.as_ref().is_some_and(|m| m.user.bot))
        .count();
    Some(count)
}

fn progress_of(player: &AudioPlayer, key: SessionKey) -> std::time::Duration {
    player
        .registry()
        .get(key)
        .and_then(|session| session.playing_since())
        .map(|since| since.elapsed())
        .unwrap_or_default()
}

fn player_error_embed(error: &PlayerError) -> CreateEmbed {
    match error {
        PlayerError::Resolve(ResolveError::NotFound) => create_error_embed("Not found", "No results for that query"),
        PlayerError::Resolve(ResolveError::RateLimited) => {
            create_error_embed("Rate limited", "The media service is throttling us, try again later")
        }
        PlayerError::Resolve(ResolveError::NetworkFailure(e)) => create_error_embed("Network error", e),
        PlayerError::QueueFull { max } => create_error_embed("Queue full", &format!("The queue holds at most {} tracks", max)),
        PlayerError::EmptyRequest => create_error_embed("Missing query", "Tell me what to play"),
    }
}
