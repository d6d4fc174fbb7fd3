use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::audio::{
    events::{CloseReason, SkipReason},
    player::EnqueueOutcome,
    track::Track,
};

/// Standard color palette.
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

const STANDARD_FOOTER: &str = "🎵 Jukebox";
const QUEUE_PAGE_SIZE: usize = 10;
const BAR_WIDTH: usize = 20;

pub fn create_now_playing_embed(track: &Track, elapsed: Duration, looping: bool) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title(if looping { "🔂 Now Playing" } else { "🎵 Now Playing" })
        .description(format!("**{}**", track.title()))
        .url(track.canonical_url())
        .color(colors::SUCCESS_GREEN)
        .field("⏱️ Progress", progress_line(elapsed, track.duration()), false)
        .field("👤 Requested by", format!("<@{}>", track.requester().id), true);

    if let Some(thumbnail) = track.thumbnail() {
        embed = embed.thumbnail(thumbnail);
    }

    embed
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Reply to a successful `play`.
pub fn create_added_embed(outcome: &EnqueueOutcome) -> CreateEmbed {
    let first = outcome.added.first();
    let mut embed = match (outcome.added.len(), first) {
        (1, Some(track)) if outcome.pending == 0 => {
            let mut embed = CreateEmbed::default()
                .title("✅ Added to Queue")
                .description(format!("**{}**", track.title()))
                .url(track.canonical_url())
                .color(colors::SUCCESS_GREEN)
                .field("⏱️ Duration", format_duration(track.duration()), true);
            if let Some(thumbnail) = track.thumbnail() {
                embed = embed.thumbnail(thumbnail);
            }
            embed
        }
        (count, _) => CreateEmbed::default()
            .title("📋 Playlist Added")
            .description(format!("Added **{}** tracks to the queue", count))
            .color(colors::MUSIC_PURPLE),
    };

    embed = if outcome.position == 0 {
        embed.field("📍 Position", "Playing now", true)
    } else {
        embed.field("📍 Position", format!("#{}", outcome.position), true)
    };

    if outcome.pending > 0 {
        embed = embed.field("⏳ Loading", format!("{} more in background", outcome.pending), true);
    }
    if outcome.dropped > 0 {
        embed = embed
            .field("⚠️ Queue full", format!("{} tracks did not fit", outcome.dropped), true)
            .color(colors::WARNING_ORANGE);
    }

    embed.footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_queue_embed(tracks: &[Track], looping: bool, remaining: Duration) -> CreateEmbed {
    let embed = CreateEmbed::default()
        .title("📋 Queue")
        .color(colors::INFO_BLUE)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER));

    let Some((current, upcoming)) = tracks.split_first() else {
        return embed
            .description("😴 **The queue is empty**")
            .color(colors::NEUTRAL_GRAY);
    };

    let status = if looping { "🔂" } else { "▶️" };
    let mut lines: Vec<String> = upcoming
        .iter()
        .take(QUEUE_PAGE_SIZE)
        .enumerate()
        .map(|(i, track)| queue_line(i + 1, track))
        .collect();
    if upcoming.len() > QUEUE_PAGE_SIZE {
        lines.push(format!("... and {} more", upcoming.len() - QUEUE_PAGE_SIZE));
    }

    embed
        .field(format!("{} Playing", status), format!("**{}**", current.title()), false)
        .field(
            "⏭️ Up next",
            if lines.is_empty() {
                "Nothing".to_string()
            } else {
                lines.join("\n")
            },
            false,
        )
        .field("⏱️ Remaining", clock(remaining), true)
        .field("📊 Tracks", tracks.len().to_string(), true)
}

/// `n. title [m:ss]` plus a relative "queued" timestamp Discord renders.
fn queue_line(position: usize, track: &Track) -> String {
    format!(
        "`{}.` {} `[{}]` · <t:{}:R>",
        position,
        track.title(),
        format_duration(track.duration()),
        track.requested_at().timestamp()
    )
}

pub fn create_skipped_embed(track: &Track, reason: &SkipReason) -> CreateEmbed {
    let detail = match reason {
        SkipReason::ResolutionFailed(e) => format!("Could not load it: {}", e),
        SkipReason::PlaybackFailed(e) => format!("Playback failed: {}", e),
        SkipReason::RepeatedFailure(e) => format!("Failed again in loop mode, removed: {}", e),
    };

    CreateEmbed::default()
        .title("⚠️ Track Skipped")
        .description(format!("**{}**\n{}", track.title(), detail))
        .color(colors::WARNING_ORANGE)
}

pub fn create_session_closed_embed(reason: CloseReason) -> CreateEmbed {
    let description = match reason {
        CloseReason::QueueExhausted => "The queue is finished. Leaving the voice channel 👋",
        CloseReason::Stopped => "Playback stopped and queue cleared 👋",
    };

    create_info_embed("📭 Session Ended", description)
}

pub fn create_help_embed(prefix: &str) -> CreateEmbed {
    let commands = [
        ("play <query|url>", "Search, or add a YouTube/Spotify track or playlist"),
        ("skip", "Skip the current track"),
        ("stop", "Stop, clear the queue and leave"),
        ("clear", "Clear the queue, keep the current track"),
        ("loop", "Toggle loop mode"),
        ("queue", "Show the queue"),
        ("np", "Show the current track"),
        ("controls", "Show the player buttons"),
        ("help", "Show this message"),
    ];

    let body = commands
        .iter()
        .map(|(usage, about)| format!("`{}{}` · {}", prefix, usage, about))
        .collect::<Vec<_>>()
        .join("\n");

    CreateEmbed::default()
        .title("🎵 Commands")
        .description(body)
        .field("⚡ Slash commands", "`/play` `/skip` `/stop` `/queue` `/controls`", false)
        .color(colors::MUSIC_PURPLE)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_error_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("❌ {}", title))
        .description(description)
        .color(colors::ERROR_RED)
}

pub fn create_success_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("✅ {}", title))
        .description(description)
        .color(colors::SUCCESS_GREEN)
}

pub fn create_info_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(title)
        .description(description)
        .color(colors::INFO_BLUE)
}

/// `elapsed / total` line with a bar; live tracks show elapsed only.
pub fn progress_line(elapsed: Duration, total: Duration) -> String {
    if total.is_zero() {
        return format!("🔴 Live · {}", clock(elapsed));
    }
    format!(
        "`{}` {} / {}",
        progress_bar(elapsed, total, BAR_WIDTH),
        clock(elapsed),
        clock(total)
    )
}

pub fn progress_bar(elapsed: Duration, total: Duration, width: usize) -> String {
    if total.is_zero() || width == 0 {
        return "▬".repeat(width);
    }
    let ratio = (elapsed.as_secs_f64() / total.as_secs_f64()).clamp(0.0, 1.0);
    let knob = ((ratio * width as f64) as usize).min(width - 1);

    let mut bar = String::with_capacity(width * 3);
    bar.push_str(&"▬".repeat(knob));
    bar.push('🔘');
    bar.push_str(&"▬".repeat(width - knob - 1));
    bar
}

/// `m:ss`, or `h:mm:ss` past an hour; `Live` for an unknown length.
pub fn format_duration(duration: Duration) -> String {
    if duration.is_zero() {
        return "Live".to_string();
    }
    clock(duration)
}

fn clock(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(5)), "0:05");
        assert_eq!(format_duration(Duration::from_secs(185)), "3:05");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1:02:05");
        assert_eq!(format_duration(Duration::ZERO), "Live");
        assert_eq!(clock(Duration::ZERO), "0:00");
    }

    #[test]
    fn test_progress_bar_positions_knob() {
        let total = Duration::from_secs(100);

        assert!(progress_bar(Duration::ZERO, total, 10).starts_with('🔘'));
        assert!(progress_bar(total, total, 10).ends_with('🔘'));
        assert_eq!(progress_bar(Duration::from_secs(50), total, 10).chars().position(|c| c == '🔘'), Some(5));
        assert_eq!(progress_bar(Duration::from_secs(30), total, 10).chars().count(), 10);
    }

    #[test]
    fn test_queue_line_shows_when_track_was_queued() {
        let track = crate::audio::testing::track("Intro", 185);
        let line = queue_line(3, &track);

        assert_eq!(
            line,
            format!("`3.` Intro `[3:05]` · <t:{}:R>", track.requested_at().timestamp())
        );
    }

    #[test]
    fn test_progress_line_for_live_track() {
        assert_eq!(progress_line(Duration::from_secs(65), Duration::ZERO), "🔴 Live · 1:05");
    }
}
