//! # Audio Module
//!
//! Per-session playback queues and the state machine that drives them.
//!
//! ## Architecture
//!
//! ### [`player`] - Command surface
//! [`AudioPlayer`] is what the bot talks to: enqueue (with playlist
//! expansion), skip, clear, stop, loop and read-only queue views.
//!
//! ### [`registry`] and [`queue`] - Sessions
//! One [`Session`](registry::Session) per key (a Discord guild), created on
//! first enqueue and removed when its controller tears it down. The queue's
//! front track is the one playing; loop mode rotates it to the back instead
//! of dropping it.
//!
//! ### [`controller`] - Playback state machine
//! Each session runs its own controller task, the only code that talks to
//! the session's [`AudioSink`](sink::AudioSink). Enqueues, skips, stops and
//! sink completions reach it through one mailbox, so they are handled one at
//! a time and a late completion of an old track can never advance the queue
//! twice.
//!
//! ### [`progress`] and [`events`] - Notifications
//! While a track plays, a reporter emits periodic progress; every state
//! change is published as a [`PlaybackEvent`](events::PlaybackEvent).
//!
//! ## Example
//!
//! ```rust,no_run
//! use jukebox::audio::{player::{AudioPlayer, PlayerSettings}, track::{Requester, SessionKey}};
//! # use std::sync::Arc;
//! # async fn example(
//! #     resolver: Arc<dyn jukebox::sources::TrackResolver>,
//! #     sinks: Arc<dyn jukebox::audio::sink::SinkFactory>,
//! # ) -> anyhow::Result<()> {
//! let (player, mut events) = AudioPlayer::new(resolver, sinks, PlayerSettings::default());
//!
//! player.enqueue(SessionKey(1), "lofi beats", Requester::new(7, "ana")).await?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod controller;
pub mod events;
pub mod player;
pub mod progress;
pub mod queue;
pub mod registry;
pub mod sink;
pub mod track;

#[cfg(test)]
pub(crate) mod testing;

pub use controller::PlaybackState;
pub use events::{CloseReason, PlaybackEvent, SkipReason};
pub use player::{AudioPlayer, ControlOutcome, EnqueueOutcome, PlayerError, PlayerSettings};
pub use track::{Requester, SessionKey, StreamRef, Track};
