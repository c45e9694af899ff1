//! Session snapshot type definitions
//!
//! A snapshot is an immutable, versioned projection of one session. Readers
//! and subscribers only ever see whole snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::song::{CurrentlyPlaying, QueuedSong};
use super::SessionId;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionLifecycle {
    Active,
    /// Terminal; mutations are rejected
    Ended,
}

impl std::fmt::Display for SessionLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionLifecycle::Active => write!(f, "ACTIVE"),
            SessionLifecycle::Ended => write!(f, "ENDED"),
        }
    }
}

/// Read-only projection of a session at one version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub state: SessionLifecycle,
    /// Strictly increasing per session; starts at 1
    pub version: u64,
    pub currently_playing: CurrentlyPlaying,
    /// Ordered by descending votes, ties in insertion order
    pub queue: Vec<QueuedSong>,
    pub number_of_voters: usize,
    /// 0 means unlimited
    pub maximum_voters: usize,
    pub generated_at: DateTime<Utc>,
}

impl SessionSnapshot {
    /// Whether this is the last snapshot the session will ever publish
    pub fn is_terminal(&self) -> bool {
        self.state == SessionLifecycle::Ended
    }

    /// Votes of a queued song, if present
    pub fn votes_for(&self, song_id: &str) -> Option<i64> {
        self.queue
            .iter()
            .find(|row| row.simple_song.id == song_id)
            .map(|row| row.votes)
    }
}
