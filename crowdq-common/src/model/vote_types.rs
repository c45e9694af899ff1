//! Vote and voter tier type definitions

use serde::{Deserialize, Serialize};

/// Voting power class of a voter within one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoterTier {
    /// Session creator or admin-level account: unlimited votes, may end the session
    Admin,
    /// One ordinary vote per song plus consumable bonus votes
    Privileged,
    /// Exactly one outstanding vote per song
    Free,
}

impl std::fmt::Display for VoterTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VoterTier::Admin => write!(f, "ADMIN"),
            VoterTier::Privileged => write!(f, "PRIVILEGED"),
            VoterTier::Free => write!(f, "FREE"),
        }
    }
}

/// Account attribute deciding the tier an account votes with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountLevel {
    #[default]
    Free,
    Privileged,
    /// Votes as ADMIN in every session and may manage other accounts
    Admin,
}

impl AccountLevel {
    /// Tier an account of this level gets in a session it did not create
    pub fn voter_tier(self) -> VoterTier {
        match self {
            AccountLevel::Free => VoterTier::Free,
            AccountLevel::Privileged => VoterTier::Privileged,
            AccountLevel::Admin => VoterTier::Admin,
        }
    }
}

/// Direction of a vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoteDirection {
    Up,
    Down,
}

impl VoteDirection {
    /// +1 for UP, -1 for DOWN
    pub fn sign(self) -> i64 {
        match self {
            VoteDirection::Up => 1,
            VoteDirection::Down => -1,
        }
    }

    /// Direction a non-zero ledger value represents
    pub fn of(value: i64) -> Option<Self> {
        match value.signum() {
            1 => Some(VoteDirection::Up),
            -1 => Some(VoteDirection::Down),
            _ => None,
        }
    }
}

impl std::fmt::Display for VoteDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VoteDirection::Up => write!(f, "UP"),
            VoteDirection::Down => write!(f, "DOWN"),
        }
    }
}

/// What a song update does with the vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoteAction {
    Add,
    Remove,
}

impl std::fmt::Display for VoteAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VoteAction::Add => write!(f, "ADD"),
            VoteAction::Remove => write!(f, "REMOVE"),
        }
    }
}
