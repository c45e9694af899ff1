//! Wire and domain types shared by the crowdq crates
//!
//! Field names serialize in camelCase and enum values in SCREAMING_CASE so the
//! JSON matches the operation contract existing clients already speak.

// Sub-modules (supporting types)
mod snapshot;
mod song;
mod vote_types;

pub use snapshot::{SessionLifecycle, SessionSnapshot};
pub use song::{CurrentlyPlaying, QueuedSong, SimpleSong, SongUpdate};
pub use vote_types::{AccountLevel, VoteAction, VoteDirection, VoterTier};

/// Session identifier (six-digit integer)
pub type SessionId = u32;

/// Lowest session id handed out
pub const SESSION_ID_MIN: SessionId = 100_000;

/// Highest session id handed out
pub const SESSION_ID_MAX: SessionId = 999_999;
