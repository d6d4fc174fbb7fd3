use anyhow::Result;
use serenity::{
    all::{Command as ApplicationCommand, CommandInteraction, CommandOptionType, GuildId},
    builder::{CreateCommand, CreateCommandOption},
    prelude::Context,
};

/// Command understood by the bot, typed with the prefix or as a slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Play(String),
    Skip,
    Stop,
    Clear,
    Loop,
    Queue,
    NowPlaying,
    /// Posts the player buttons.
    Controls,
    Help,
    Unknown(String),
}

impl Command {
    /// Parses a message; `None` when it does not start with `prefix`.
    pub fn parse(content: &str, prefix: &str) -> Option<Self> {
        let body = content.trim_start().strip_prefix(prefix)?;
        let (name, args) = match body.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (body, ""),
        };
        if name.is_empty() {
            return None;
        }

        let command = match name.to_lowercase().as_str() {
            "play" | "p" => Command::Play(args.to_string()),
            "skip" | "s" => Command::Skip,
            "stop" | "leave" => Command::Stop,
            "clear" => Command::Clear,
            "loop" => Command::Loop,
            "queue" | "q" => Command::Queue,
            "np" | "nowplaying" => Command::NowPlaying,
            "controls" | "c" => Command::Controls,
            "help" | "h" => Command::Help,
            other => Command::Unknown(other.to_string()),
        };
        Some(command)
    }

    pub fn from_interaction(interaction: &CommandInteraction) -> Self {
        let query = interaction
            .data
            .options
            .iter()
            .find(|opt| opt.name == "query")
            .and_then(|opt| opt.value.as_str())
            .unwrap_or_default();
        Self::from_slash(&interaction.data.name, query)
    }

    fn from_slash(name: &str, query: &str) -> Self {
        match name {
            "play" => Command::Play(query.trim().to_string()),
            "skip" => Command::Skip,
            "stop" => Command::Stop,
            "queue" => Command::Queue,
            "controls" => Command::Controls,
            other => Command::Unknown(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Command::Play(_) => "play",
            Command::Skip => "skip",
            Command::Stop => "stop",
            Command::Clear => "clear",
            Command::Loop => "loop",
            Command::Queue => "queue",
            Command::NowPlaying => "np",
            Command::Controls => "controls",
            Command::Help => "help",
            Command::Unknown(name) => name,
        }
    }
}

/// Registers the slash commands for one guild (quick to propagate while
/// developing) or globally.
pub async fn register_slash_commands(ctx: &Context, guild_id: Option<GuildId>) -> Result<()> {
    let commands = slash_commands();
    match guild_id {
        Some(guild_id) => {
            guild_id.set_commands(&ctx.http, commands).await?;
        }
        None => {
            ApplicationCommand::set_global_commands(&ctx.http, commands).await?;
        }
    }
    Ok(())
}

pub fn slash_commands() -> Vec<CreateCommand> {
    vec![
        play_command(),
        CreateCommand::new("skip").description("Skip the current track"),
        CreateCommand::new("stop").description("Stop, clear the queue and leave"),
        CreateCommand::new("queue").description("Show the queue"),
        CreateCommand::new("controls").description("Show the player buttons"),
    ]
}

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Play a track or playlist from YouTube or Spotify")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "query", "Search terms, YouTube or Spotify link")
                .required(true),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_play_keeps_full_query() {
        assert_eq!(
            Command::parse("#play  daft punk   around the world ", "#"),
            Some(Command::Play("daft punk   around the world".to_string()))
        );
        assert_eq!(Command::parse("#p", "#"), Some(Command::Play(String::new())));
    }

    #[test]
    fn test_parse_aliases_and_case() {
        assert_eq!(Command::parse("#SKIP", "#"), Some(Command::Skip));
        assert_eq!(Command::parse("#nowplaying", "#"), Some(Command::NowPlaying));
        assert_eq!(Command::parse("!!queue", "!!"), Some(Command::Queue));
        assert_eq!(Command::parse("#controls", "#"), Some(Command::Controls));
    }

    #[test]
    fn test_slash_names_map_to_commands() {
        assert_eq!(
            Command::from_slash("play", "  lofi beats "),
            Command::Play("lofi beats".to_string())
        );
        assert_eq!(Command::from_slash("controls", ""), Command::Controls);
        assert_eq!(Command::from_slash("stop", ""), Command::Stop);
        assert_eq!(Command::from_slash("dance", ""), Command::Unknown("dance".to_string()));
    }

    #[test]
    fn test_every_registered_slash_command_is_understood() {
        for command in slash_commands() {
            let json = serde_json::to_value(&command).unwrap();
            let name = json["name"].as_str().unwrap();

            assert!(
                !matches!(Command::from_slash(name, "x"), Command::Unknown(_)),
                "/{name} has no handler"
            );
        }
    }

    #[test]
    fn test_parse_ignores_other_messages() {
        assert_eq!(Command::parse("hello #play", "#"), None);
        assert_eq!(Command::parse("#", "#"), None);
        assert_eq!(Command::parse("# play", "#"), None);
        assert_eq!(Command::parse("#dance", "#"), Some(Command::Unknown("dance".to_string())));
    }
}
