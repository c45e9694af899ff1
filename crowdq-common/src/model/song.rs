//! Song identity and song update types

use serde::{Deserialize, Serialize};

use super::vote_types::{VoteAction, VoteDirection};
use crate::{Error, Result};

/// Catalog identity of a song
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleSong {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub image: String,
}

/// One queue row as clients see it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedSong {
    pub simple_song: SimpleSong,
    pub votes: i64,
}

/// Currently-playing slot of a session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentlyPlaying {
    /// None until the queue has been advanced at least once
    pub simple_song: Option<SimpleSong>,
    pub playing: bool,
}

/// Input of the `updateQueue` operation
///
/// `title`, `artist` and `image` are only required the first time a song is
/// added to a session's queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongUpdate {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub vote: VoteDirection,
    pub action: VoteAction,
}

impl SongUpdate {
    /// Vote-only update for a song already in the queue
    pub fn vote(id: impl Into<String>, vote: VoteDirection, action: VoteAction) -> Self {
        Self {
            id: id.into(),
            title: None,
            artist: None,
            image: None,
            vote,
            action,
        }
    }

    /// ADD update carrying full metadata
    pub fn add_song(song: &SimpleSong, vote: VoteDirection) -> Self {
        Self {
            id: song.id.clone(),
            title: Some(song.title.clone()),
            artist: Some(song.artist.clone()),
            image: Some(song.image.clone()),
            vote,
            action: VoteAction::Add,
        }
    }

    /// Reject updates that cannot refer to any song
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidArgument("song id must not be empty".to_string()));
        }
        Ok(())
    }

    /// Build the song identity for a first ADD
    ///
    /// Fails with `InvalidArgument` naming every missing metadata field.
    pub fn to_new_song(&self) -> Result<SimpleSong> {
        let mut missing = Vec::new();
        if self.title.is_none() {
            missing.push("title");
        }
        if self.artist.is_none() {
            missing.push("artist");
        }
        if self.image.is_none() {
            missing.push("image");
        }
        if !missing.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "song {} is not queued yet; missing {}",
                self.id,
                missing.join(", ")
            )));
        }

        Ok(SimpleSong {
            id: self.id.clone(),
            title: self.title.clone().unwrap_or_default(),
            artist: self.artist.clone().unwrap_or_default(),
            image: self.image.clone().unwrap_or_default(),
        })
    }
}
