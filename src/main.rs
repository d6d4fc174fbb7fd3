use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tracing::{error, info};

use jukebox::{
    audio::player::AudioPlayer,
    bot::{announcer::Announcer, voice::SongbirdSinks, JukeboxBot},
    config::Config,
    sources::{SpotifyClient, YtDlpClient},
};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("jukebox=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Starting Jukebox v{}", env!("CARGO_PKG_VERSION"));

    let health_check_only = std::env::args().any(|arg| arg == "--health-check");
    let config = if health_check_only {
        Config::default()
    } else {
        Config::load()?
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .enable_all()
        .build()?;

    if health_check_only {
        return runtime.block_on(health_check(&config));
    }
    runtime.block_on(run(config))
}

async fn run(config: Config) -> Result<()> {
    info!("{}", config.summary());
    let config = Arc::new(config);

    let resolver = Arc::new(YtDlpClient::from_config(&config));
    let songbird = Songbird::serenity();
    let http_client = reqwest::Client::new();
    let sinks = Arc::new(SongbirdSinks::new(songbird.clone(), http_client.clone()));

    let (mut player, events) = AudioPlayer::new(resolver.clone(), sinks.clone(), config.player_settings());
    // Expanders are tried in registration order.
    if let Some(spotify) = SpotifyClient::from_config(&config) {
        info!("🟢 Spotify links enabled");
        player = player.with_catalog(Arc::new(spotify.with_http(http_client)));
    }
    let player = player.with_catalog(resolver);

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let http = Arc::new(serenity::http::Http::new(&config.discord_token));
    let announcer = Arc::new(Announcer::new(http, player.clone()));
    tokio::spawn(announcer.clone().run(events));

    let handler = JukeboxBot::new(config.clone(), player, sinks, announcer);
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Could not listen for Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Shutdown signal received, closing...");
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot started");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    Ok(())
}

async fn health_check(config: &Config) -> Result<()> {
    let yt_dlp = async_process::Command::new(&config.ytdlp_path)
        .arg("--version")
        .output()
        .await?;

    let ffmpeg = async_process::Command::new("ffmpeg")
        .arg("-version")
        .output()
        .await?;

    if yt_dlp.status.success() && ffmpeg.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Missing dependencies: yt-dlp or ffmpeg");
    }
}
