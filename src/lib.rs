//! Jukebox: per-guild playback queues and session state machine for a
//! Discord music bot.

pub mod audio;
pub mod bot;
pub mod config;
pub mod sources;
pub mod ui;
