//! Vote-ordered song queue of one session
//!
//! Every queued song carries a tally and a ledger of the signed vote each
//! voter currently holds on it. The tally always equals the sum of the
//! ledger. Updates are planned against the current state first and only
//! committed when the plan succeeds, so a rejected update changes nothing.

use std::cmp::Reverse;
use std::collections::HashMap;
use tracing::debug;

use crowdq_common::{
    CurrentlyPlaying, Error, QueuedSong, Result, SimpleSong, SongUpdate, VoteAction, VoteDirection,
    VoterTier,
};

use crate::accounts::AccountId;
use crate::registry::{VoterId, VoterRecord};

#[derive(Debug, Clone)]
struct QueueEntry {
    song: SimpleSong,
    tally: i64,
    ledger: HashMap<VoterId, i64>,
    /// Bonus votes each account spent on this song; never refunded
    bonus_spent: HashMap<AccountId, u32>,
    /// Insertion order, breaks tally ties
    seq: u64,
}

/// Song moved into the currently-playing slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayedSong {
    pub song: SimpleSong,
    /// Bonus votes spent on the song, by account, in account order
    pub bonus_spent: Vec<(AccountId, u32)>,
}

/// Song an update refers to
enum Target {
    Queued(usize),
    New(SimpleSong),
}

/// Outcome of planning one vote against a held ledger value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct VotePlan {
    new_value: i64,
    consumes_bonus: bool,
}

/// Decide the voter's new ledger value, or None for a no-op
fn plan_vote(
    tier: VoterTier,
    bonus_votes: u32,
    held: i64,
    vote: VoteDirection,
    action: VoteAction,
) -> Option<VotePlan> {
    let sign = vote.sign();
    let plan = |new_value| Some(VotePlan { new_value, consumes_bonus: false });

    match action {
        VoteAction::Remove => {
            if VoteDirection::of(held) == Some(vote) {
                plan(0)
            } else {
                None
            }
        }
        VoteAction::Add => match tier {
            VoterTier::Admin => plan(held + sign),
            VoterTier::Free => {
                if held == sign {
                    None
                } else {
                    plan(sign)
                }
            }
            VoterTier::Privileged => {
                if VoteDirection::of(held) != Some(vote) {
                    plan(sign)
                } else if vote == VoteDirection::Up && bonus_votes > 0 {
                    Some(VotePlan {
                        new_value: held + 1,
                        consumes_bonus: true,
                    })
                } else {
                    None
                }
            }
        },
    }
}

/// Queue, ledgers and currently-playing slot of one session
#[derive(Debug, Default)]
pub struct QueueEngine {
    entries: Vec<QueueEntry>,
    next_seq: u64,
    currently_playing: CurrentlyPlaying,
}

impl QueueEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, song_id: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.song.id == song_id)
    }

    /// Apply one song update on behalf of `voter`
    ///
    /// Returns whether the queue changed. Redundant votes are no-ops and
    /// return `Ok(false)`. On error neither the queue nor `voter` is touched.
    pub fn apply(&mut self, voter: &mut VoterRecord, update: &SongUpdate) -> Result<bool> {
        update.validate()?;

        let target = match self.position(&update.id) {
            Some(i) => Target::Queued(i),
            None => match update.action {
                VoteAction::Remove => {
                    return Err(Error::NotFound(format!("song {} is not queued", update.id)));
                }
                VoteAction::Add => {
                    if update.title.is_none() && update.artist.is_none() && update.image.is_none() {
                        return Err(Error::NotFound(format!("song {} is not queued", update.id)));
                    }
                    Target::New(update.to_new_song()?)
                }
            },
        };

        let held = match &target {
            Target::Queued(i) => self.entries[*i].ledger.get(&voter.voter_id).copied().unwrap_or(0),
            Target::New(_) => 0,
        };

        let Some(plan) = plan_vote(voter.tier, voter.bonus_votes, held, update.vote, update.action) else {
            debug!(
                "No-op {} {} on {} from {} voter",
                update.action, update.vote, update.id, voter.tier
            );
            return Ok(false);
        };

        // Commit
        let index = match target {
            Target::Queued(i) => i,
            Target::New(song) => {
                self.entries.push(QueueEntry {
                    song,
                    tally: 0,
                    ledger: HashMap::new(),
                    bonus_spent: HashMap::new(),
                    seq: self.next_seq,
                });
                self.next_seq += 1;
                self.entries.len() - 1
            }
        };

        let entry = &mut self.entries[index];
        entry.tally += plan.new_value - held;
        if plan.new_value == 0 {
            entry.ledger.remove(&voter.voter_id);
        } else {
            entry.ledger.insert(voter.voter_id.clone(), plan.new_value);
        }

        if plan.consumes_bonus {
            voter.bonus_votes -= 1;
            if let Some(account_id) = voter.account_id {
                *entry.bonus_spent.entry(account_id).or_insert(0) += 1;
            }
        }
        if update.action == VoteAction::Add {
            match update.vote {
                VoteDirection::Up => voter.songs_up_voted += 1,
                VoteDirection::Down => voter.songs_down_voted += 1,
            }
        }

        self.entries.sort_by_key(|entry| (Reverse(entry.tally), entry.seq));
        Ok(true)
    }

    /// Move the head of the queue into the currently-playing slot
    ///
    /// Returns None when the queue is empty.
    pub fn advance(&mut self) -> Option<PlayedSong> {
        if self.entries.is_empty() {
            return None;
        }
        let entry = self.entries.remove(0);
        self.currently_playing = CurrentlyPlaying {
            simple_song: Some(entry.song.clone()),
            playing: true,
        };

        let mut bonus_spent: Vec<(AccountId, u32)> = entry.bonus_spent.into_iter().collect();
        bonus_spent.sort_unstable();
        Some(PlayedSong {
            song: entry.song,
            bonus_spent,
        })
    }

    /// Queue rows in display order
    pub fn rows(&self) -> Vec<QueuedSong> {
        self.entries
            .iter()
            .map(|entry| QueuedSong {
                simple_song: entry.song.clone(),
                votes: entry.tally,
            })
            .collect()
    }

    pub fn currently_playing(&self) -> &CurrentlyPlaying {
        &self.currently_playing
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn tally(&self, song_id: &str) -> Option<i64> {
        self.position(song_id).map(|i| self.entries[i].tally)
    }

    /// Vote `voter_id` currently holds on a song (0 if none)
    pub fn held_vote(&self, song_id: &str, voter_id: &str) -> i64 {
        self.position(song_id)
            .and_then(|i| self.entries[i].ledger.get(voter_id).copied())
            .unwrap_or(0)
    }

    /// Every tally equals its ledger sum and no ledger holds a zero
    pub fn is_consistent(&self) -> bool {
        self.entries.iter().all(|entry| {
            entry.ledger.values().sum::<i64>() == entry.tally
                && entry.ledger.values().all(|value| *value != 0)
        })
    }
}
