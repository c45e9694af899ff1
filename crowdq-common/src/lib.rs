//! # crowdq Common Library
//!
//! Shared code for the crowdq voting service including:
//! - Error taxonomy (Error enum)
//! - Configuration loading and resolution
//! - Wire/domain types (songs, voter tiers, song updates, session snapshots)
//! - Bearer token and credential helpers

pub mod config;
pub mod error;
pub mod model;
pub mod token;

pub use error::{Error, Result};
pub use model::{
    AccountLevel, CurrentlyPlaying, QueuedSong, SessionId, SessionLifecycle, SessionSnapshot,
    SimpleSong, SongUpdate, VoteAction, VoteDirection, VoterTier,
};
