use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr, time::Duration};

use crate::audio::player::PlayerSettings;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    #[serde(skip_serializing, default)]
    pub discord_token: String,
    pub command_prefix: String,
    /// Registers slash commands in this guild only; global when unset.
    pub command_guild_id: Option<u64>,

    // Playback
    #[serde(with = "humantime_serde_compat")]
    pub progress_interval: Duration,
    pub max_queue_size: usize,

    // Playlists
    pub playlist_eager_batch: usize,
    pub max_playlist_size: usize,
    pub playlist_concurrency: usize,

    // yt-dlp
    pub ytdlp_path: String,
    pub ytdlp_cookies: Option<PathBuf>,
    #[serde(with = "humantime_serde_compat")]
    pub resolve_timeout: Duration,

    // Spotify (optional, both required to enable links)
    pub spotify_client_id: Option<String>,
    #[serde(skip_serializing, default)]
    pub spotify_client_secret: Option<String>,

    // Runtime
    pub worker_threads: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let config = Self {
            discord_token: std::env::var("DISCORD_TOKEN").context("DISCORD_TOKEN is not set")?,
            command_prefix: std::env::var("COMMAND_PREFIX").unwrap_or(defaults.command_prefix),
            command_guild_id: env_optional("GUILD_ID")
                .map(|id| id.trim().parse())
                .transpose()
                .context("invalid GUILD_ID")?,

            progress_interval: env_duration("PROGRESS_INTERVAL", defaults.progress_interval)?,
            max_queue_size: env_parse("MAX_QUEUE_SIZE", defaults.max_queue_size)?,

            playlist_eager_batch: env_parse("PLAYLIST_EAGER_BATCH", defaults.playlist_eager_batch)?,
            max_playlist_size: env_parse("MAX_PLAYLIST_SIZE", defaults.max_playlist_size)?,
            playlist_concurrency: env_parse("PLAYLIST_CONCURRENCY", defaults.playlist_concurrency)?,

            ytdlp_path: std::env::var("YTDLP_PATH").unwrap_or(defaults.ytdlp_path),
            ytdlp_cookies: match std::env::var("YTDLP_COOKIES") {
                Ok(path) if !path.trim().is_empty() => Some(PathBuf::from(path)),
                _ => defaults.ytdlp_cookies,
            },
            resolve_timeout: env_duration("RESOLVE_TIMEOUT", defaults.resolve_timeout)?,

            spotify_client_id: env_optional("SPOTIFY_CLIENT_ID"),
            spotify_client_secret: env_optional("SPOTIFY_CLIENT_SECRET"),

            worker_threads: match std::env::var("WORKER_THREADS") {
                Ok(val) if !val.trim().is_empty() => val.trim().parse().context("WORKER_THREADS")?,
                _ => defaults.worker_threads,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Sanity checks that catch common mistakes before the bot connects.
    pub fn validate(&self) -> Result<()> {
        if self.command_guild_id == Some(0) {
            anyhow::bail!("GUILD_ID must be a non-zero snowflake");
        }

        if self.command_prefix.trim().is_empty() {
            anyhow::bail!("Command prefix must not be empty");
        }

        if self.progress_interval < Duration::from_secs(1) {
            anyhow::bail!(
                "Progress interval must be at least 1s, got: {}",
                humantime::format_duration(self.progress_interval)
            );
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.playlist_eager_batch == 0 || self.playlist_concurrency == 0 {
            anyhow::bail!("Playlist batch and concurrency must be greater than 0");
        }

        if self.worker_threads == 0 {
            anyhow::bail!("Worker threads must be greater than 0");
        }

        Ok(())
    }

    /// Loggable summary without secrets.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Commands: prefix '{}', slash {}\n  \
            Playback: progress every {}, {} queue max\n  \
            Playlists: {} eager, {} max, {} parallel\n  \
            yt-dlp: {} (cookies: {}, timeout {})\n  \
            Spotify: {}\n  \
            Runtime: {} worker threads",
            self.command_prefix,
            self.command_guild_id.map_or("global".to_string(), |id| format!("guild {id}")),
            humantime::format_duration(self.progress_interval),
            self.max_queue_size,
            self.playlist_eager_batch,
            self.max_playlist_size,
            self.playlist_concurrency,
            self.ytdlp_path,
            self.ytdlp_cookies
                .as_ref()
                .map_or("none".to_string(), |p| p.display().to_string()),
            humantime::format_duration(self.resolve_timeout),
            if self.spotify_credentials().is_some() { "enabled" } else { "disabled" },
            self.worker_threads,
        )
    }

    /// Client id and secret, when both are set.
    pub fn spotify_credentials(&self) -> Option<(&str, &str)> {
        match (&self.spotify_client_id, &self.spotify_client_secret) {
            (Some(id), Some(secret)) => Some((id, secret)),
            _ => None,
        }
    }

    pub fn player_settings(&self) -> PlayerSettings {
        PlayerSettings::from(self)
    }
}

impl Default for Config {
    fn default() -> Self {
        let cookies = PathBuf::from("cookies.txt");
        Self {
            discord_token: String::new(),
            command_prefix: "#".to_string(),
            command_guild_id: None,

            progress_interval: Duration::from_secs(5),
            max_queue_size: 1000,

            playlist_eager_batch: 5,
            max_playlist_size: 100,
            playlist_concurrency: 4,

            ytdlp_path: "yt-dlp".to_string(),
            ytdlp_cookies: cookies.exists().then_some(cookies),
            resolve_timeout: Duration::from_secs(30),

            spotify_client_id: None,
            spotify_client_secret: None,

            worker_threads: num_cpus::get(),
        }
    }
}

impl From<&Config> for PlayerSettings {
    fn from(config: &Config) -> Self {
        Self {
            progress_interval: config.progress_interval,
            max_queue_size: config.max_queue_size,
            playlist_eager_batch: config.playlist_eager_batch,
            playlist_concurrency: config.playlist_concurrency,
        }
    }
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(val) if !val.trim().is_empty() => val.trim().parse().with_context(|| format!("invalid {name}")),
        _ => Ok(default),
    }
}

fn env_optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|val| !val.trim().is_empty())
}

/// Accepts `5s`, `1m 30s` or a bare number of seconds.
fn env_duration(name: &str, default: Duration) -> Result<Duration> {
    match std::env::var(name) {
        Ok(val) if !val.trim().is_empty() => parse_duration(&val).with_context(|| format!("invalid {name}")),
        _ => Ok(default),
    }
}

fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    Ok(humantime::parse_duration(raw)?)
}

/// Serializes durations as humantime strings.
mod humantime_serde_compat {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config {
            discord_token: "token".to_string(),
            ..Config::default()
        };

        assert!(config.validate().is_ok());
        assert_eq!(config.command_prefix, "#");
        assert_eq!(config.progress_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_validate_rejects_zero_queue() {
        let config = Config {
            max_queue_size: 0,
            ..Config::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_duration_forms() {
        assert_eq!(parse_duration("7").unwrap(), Duration::from_secs(7));
        assert_eq!(parse_duration("1m 30s").unwrap(), Duration::from_secs(90));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_player_settings_from_config() {
        let config = Config {
            max_queue_size: 12,
            playlist_eager_batch: 3,
            ..Config::default()
        };

        let settings = config.player_settings();

        assert_eq!(settings.max_queue_size, 12);
        assert_eq!(settings.playlist_eager_batch, 3);
        assert_eq!(settings.progress_interval, config.progress_interval);
    }

    #[test]
    fn test_summary_hides_token() {
        let config = Config {
            discord_token: "super-secret".to_string(),
            ..Config::default()
        };

        let summary = config.summary();

        assert!(!summary.contains("super-secret"));
        assert!(summary.contains("prefix '#'"));
    }

    #[test]
    fn test_serde_round_trips_durations() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();

        let back: Config = serde_json::from_str(&json).unwrap();

        assert_eq!(back.resolve_timeout, config.resolve_timeout);
    }

    #[test]
    fn test_serialized_config_has_no_secrets() {
        let config = Config {
            discord_token: "super-secret".to_string(),
            spotify_client_id: Some("client".to_string()),
            spotify_client_secret: Some("spotify-secret".to_string()),
            ..Config::default()
        };

        let json = serde_json::to_string(&config).unwrap();

        assert!(!json.contains("super-secret"));
        assert!(!json.contains("spotify-secret"));
        assert!(json.contains("client"));
        assert!(config.summary().contains("Spotify: enabled"));
    }

    #[test]
    fn test_spotify_needs_both_credentials() {
        let config = Config {
            spotify_client_id: Some("client".to_string()),
            ..Config::default()
        };

        assert_eq!(config.spotify_credentials(), None);
        assert!(config.summary().contains("Spotify: disabled"));
    }
}
