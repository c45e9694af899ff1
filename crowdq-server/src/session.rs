//! Session lifecycle and per-session state
//!
//! Each session lives behind its own `SessionHandle`. Mutations take the
//! handle's mutex, so updates to one session are serialized while different
//! sessions proceed independently. Every committed change bumps the version,
//! stores a fresh immutable snapshot for readers and publishes it to
//! subscribers before the mutex is released.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crowdq_common::config::TomlConfig;
use crowdq_common::token::generate_session_id;
use crowdq_common::{
    AccountLevel, Error, Result, SessionId, SessionLifecycle, SessionSnapshot, SimpleSong,
    SongUpdate, VoterTier,
};

use crate::accounts::{AccountId, AccountStore};
use crate::broadcaster::{SnapshotStream, StateBroadcaster};
use crate::catalog::MusicCatalog;
use crate::queue::QueueEngine;
use crate::registry::{tier_for, Caller, VoterId, VoterRegistry, VoterView};

/// Session policy knobs taken from configuration
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    pub allow_anonymous_create: bool,
    pub free_account_max_voters: usize,
    pub idle_timeout: Duration,
    pub retention: Duration,
    pub voter_idle_timeout: Duration,
    pub broadcast_capacity: usize,
}

impl SessionPolicy {
    pub fn from_config(config: &TomlConfig) -> Self {
        Self {
            allow_anonymous_create: config.sessions.allow_anonymous_create,
            free_account_max_voters: config.sessions.free_account_max_voters,
            idle_timeout: config.sessions.idle_timeout(),
            retention: config.sessions.retention(),
            voter_idle_timeout: config.voting.voter_idle_timeout(),
            broadcast_capacity: config.broadcast.capacity,
        }
    }
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self::from_config(&TomlConfig::default())
    }
}

/// What one reaper pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub sessions_ended: usize,
    pub sessions_purged: usize,
    pub voters_expired: usize,
}

#[derive(Debug)]
struct SessionInner {
    lifecycle: SessionLifecycle,
    queue: QueueEngine,
    voters: VoterRegistry,
    version: u64,
    last_activity: Instant,
    ended_at: Option<Instant>,
}

impl SessionInner {
    fn snapshot(&self, session_id: SessionId) -> SessionSnapshot {
        SessionSnapshot {
            session_id,
            state: self.lifecycle,
            version: self.version,
            currently_playing: self.queue.currently_playing().clone(),
            queue: self.queue.rows(),
            number_of_voters: self.voters.active_count(),
            maximum_voters: self.voters.max_voters(),
            generated_at: Utc::now(),
        }
    }

    fn ensure_active(&self, session_id: SessionId) -> Result<()> {
        match self.lifecycle {
            SessionLifecycle::Active => Ok(()),
            SessionLifecycle::Ended => Err(Error::InvalidState(format!("session {} has ended", session_id))),
        }
    }
}

#[derive(Debug, Clone)]
struct Published {
    snapshot: Arc<SessionSnapshot>,
    ended_at: Option<Instant>,
}

/// One session: mutable state behind a mutex, last snapshot behind a lock
#[derive(Debug)]
struct SessionHandle {
    id: SessionId,
    /// Voter id of the creator, who votes as ADMIN
    creator: VoterId,
    creator_account: Option<AccountId>,
    inner: Mutex<SessionInner>,
    latest: RwLock<Published>,
    broadcaster: StateBroadcaster,
}

impl SessionHandle {
    fn new(id: SessionId, creator: &Caller, maximum_voters: usize, policy: &SessionPolicy) -> Self {
        let now = Instant::now();
        let inner = SessionInner {
            lifecycle: SessionLifecycle::Active,
            queue: QueueEngine::new(),
            voters: VoterRegistry::new(maximum_voters, policy.voter_idle_timeout),
            version: 1,
            last_activity: now,
            ended_at: None,
        };
        let snapshot = Arc::new(inner.snapshot(id));

        Self {
            id,
            creator: creator.voter_id(),
            creator_account: creator.account_id(),
            inner: Mutex::new(inner),
            latest: RwLock::new(Published {
                snapshot,
                ended_at: None,
            }),
            broadcaster: StateBroadcaster::new(policy.broadcast_capacity),
        }
    }

    /// Bump the version and publish the current state
    ///
    /// Must be called with `inner` locked.
    async fn commit(&self, inner: &mut SessionInner) -> Arc<SessionSnapshot> {
        inner.version += 1;
        let snapshot = Arc::new(inner.snapshot(self.id));
        *self.latest.write().await = Published {
            snapshot: snapshot.clone(),
            ended_at: inner.ended_at,
        };
        self.broadcaster.publish(snapshot.clone());
        snapshot
    }

    async fn latest(&self) -> Arc<SessionSnapshot> {
        self.latest.read().await.snapshot.clone()
    }

    fn is_admin(&self, caller: &Caller) -> bool {
        tier_for(caller, Some(self.creator.as_str())).0 == VoterTier::Admin
    }
}

/// Owner of all sessions
pub struct SessionManager {
    sessions: RwLock<HashMap<SessionId, Arc<SessionHandle>>>,
    accounts: Arc<dyn AccountStore>,
    policy: SessionPolicy,
}

impl SessionManager {
    pub fn new(accounts: Arc<dyn AccountStore>, policy: SessionPolicy) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            accounts,
            policy,
        }
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Handle of a session that is still readable
    async fn handle(&self, session_id: SessionId) -> Result<Arc<SessionHandle>> {
        let handle = self
            .sessions
            .read()
            .await
            .get(&session_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("session {}", session_id)))?;

        let ended_at = handle.latest.read().await.ended_at;
        if let Some(ended_at) = ended_at {
            if ended_at.elapsed() > self.policy.retention {
                return Err(Error::NotFound(format!("session {}", session_id)));
            }
        }
        Ok(handle)
    }

    /// `createSession`: start a new ACTIVE session owned by `caller`
    ///
    /// An account hosts at most one ACTIVE session. The claim on the account
    /// is a compare-and-set against the account store, so concurrent creates
    /// for one account leave exactly one session behind.
    pub async fn create_session(&self, caller: &Caller) -> Result<SessionId> {
        let maximum_voters = match caller.account() {
            Some(account) => match account.level {
                AccountLevel::Free => self.policy.free_account_max_voters,
                AccountLevel::Privileged | AccountLevel::Admin => 0,
            },
            None => {
                if !self.policy.allow_anonymous_create {
                    return Err(Error::PermissionDenied(
                        "an account is required to create a session".to_string(),
                    ));
                }
                self.policy.free_account_max_voters
            }
        };

        // A stale claim on an ended or purged session may be replaced
        let mut replacing = None;
        if let Some(account_id) = caller.account_id() {
            replacing = self.accounts.account(account_id).await?.active_session;
            if let Some(existing) = replacing {
                if self.is_active(existing).await {
                    return Err(Error::InvalidState(format!(
                        "account {} already hosts session {}",
                        account_id, existing
                    )));
                }
            }
        }

        let session_id = {
            let mut sessions = self.sessions.write().await;
            let mut session_id = generate_session_id();
            while sessions.contains_key(&session_id) {
                session_id = generate_session_id();
            }
            let handle = SessionHandle::new(session_id, caller, maximum_voters, &self.policy);
            sessions.insert(session_id, Arc::new(handle));
            session_id
        };

        if let Some(account_id) = caller.account_id() {
            let claim = self
                .accounts
                .replace_active_session(account_id, replacing, Some(session_id))
                .await;
            if let Err(e) = claim {
                self.sessions.write().await.remove(&session_id);
                debug!("Discarded session {}: {}", session_id, e);
                return Err(e);
            }
        }

        info!(
            "Created session {} for {} (maximum voters: {})",
            session_id,
            caller.voter_id(),
            maximum_voters
        );
        Ok(session_id)
    }

    async fn is_active(&self, session_id: SessionId) -> bool {
        match self.handle(session_id).await {
            Ok(handle) => !handle.latest().await.is_terminal(),
            Err(_) => false,
        }
    }

    /// `endSession`: ACTIVE → ENDED, creator or ADMIN only
    ///
    /// Returns the terminal snapshot.
    pub async fn end_session(&self, session_id: SessionId, caller: &Caller) -> Result<Arc<SessionSnapshot>> {
        let handle = self.handle(session_id).await?;
        let snapshot = {
            let mut inner = handle.inner.lock().await;
            inner.ensure_active(session_id)?;
            if !handle.is_admin(caller) {
                return Err(Error::PermissionDenied(format!(
                    "only the session creator or an admin may end session {}",
                    session_id
                )));
            }
            Self::finish(&handle, &mut inner).await
        };

        info!("Session {} ended by {}", session_id, caller.voter_id());
        self.release_creator(&handle).await;
        Ok(snapshot)
    }

    async fn finish(handle: &SessionHandle, inner: &mut SessionInner) -> Arc<SessionSnapshot> {
        inner.lifecycle = SessionLifecycle::Ended;
        inner.ended_at = Some(Instant::now());
        handle.commit(inner).await
    }

    async fn release_creator(&self, handle: &SessionHandle) {
        let Some(account_id) = handle.creator_account else {
            return;
        };
        match self
            .accounts
            .replace_active_session(account_id, Some(handle.id), None)
            .await
        {
            Ok(()) => {}
            // Already replaced by a newer session
            Err(Error::InvalidState(_)) => {}
            Err(Error::NotFound(_)) => debug!("Creator of session {} no longer exists", handle.id),
            Err(e) => warn!("Failed to clear active session of account {}: {}", account_id, e),
        }
    }

    /// `sessionState`: latest committed snapshot
    pub async fn session_state(&self, session_id: SessionId) -> Result<Arc<SessionSnapshot>> {
        Ok(self.handle(session_id).await?.latest().await)
    }

    /// `updateQueue`: apply one vote/queue change as `caller`
    pub async fn update_queue(
        &self,
        session_id: SessionId,
        caller: &Caller,
        update: &SongUpdate,
    ) -> Result<Arc<SessionSnapshot>> {
        let handle = self.handle(session_id).await?;
        let mut guard = handle.inner.lock().await;
        let inner = &mut *guard;
        inner.ensure_active(session_id)?;

        let now = Instant::now();
        let voters_before = inner.voters.active_count();
        let mut voter = inner.voters.admit(caller, Some(handle.creator.as_str()), now)?;
        let changed = inner.queue.apply(&mut voter, update)?;
        inner.voters.store(voter);
        inner.last_activity = now;

        if changed || inner.voters.active_count() != voters_before {
            debug!(
                "Session {}: {} {} on {} by {}",
                session_id,
                update.action,
                update.vote,
                update.id,
                caller.voter_id()
            );
            Ok(handle.commit(inner).await)
        } else {
            Ok(handle.latest().await)
        }
    }

    /// `voter`: the caller's record in a session
    ///
    /// On an ACTIVE session this registers the caller if needed. ENDED
    /// sessions only report existing records.
    pub async fn voter(&self, session_id: SessionId, caller: &Caller) -> Result<VoterView> {
        let handle = self.handle(session_id).await?;
        let mut guard = handle.inner.lock().await;
        let inner = &mut *guard;

        if inner.lifecycle == SessionLifecycle::Ended {
            return inner
                .voters
                .lookup(caller)
                .map(VoterView::from)
                .ok_or_else(|| Error::NotFound(format!("no voter record in session {}", session_id)));
        }

        let now = Instant::now();
        let voters_before = inner.voters.active_count();
        let record = inner.voters.identify(caller, Some(handle.creator.as_str()), now)?;
        inner.last_activity = now;
        if inner.voters.active_count() != voters_before {
            handle.commit(inner).await;
        }
        Ok(VoterView::from(&record))
    }

    /// `advanceQueue`: move the top song into currently-playing (ADMIN only)
    ///
    /// Bonus votes spent on the song are debited from the accounts that
    /// spent them once it plays.
    pub async fn advance_queue(&self, session_id: SessionId, caller: &Caller) -> Result<Arc<SessionSnapshot>> {
        let handle = self.handle(session_id).await?;
        let (snapshot, played) = {
            let mut guard = handle.inner.lock().await;
            let inner = &mut *guard;
            inner.ensure_active(session_id)?;

            if !handle.is_admin(caller) {
                return Err(Error::PermissionDenied(format!(
                    "only an admin may advance the queue of session {}",
                    session_id
                )));
            }

            inner.last_activity = Instant::now();
            match inner.queue.advance() {
                Some(played) => (handle.commit(inner).await, played),
                None => return Ok(handle.latest().await),
            }
        };

        info!(
            "Session {} now playing {} ({})",
            session_id, played.song.title, played.song.id
        );
        for (account_id, votes) in played.bonus_spent {
            if let Err(e) = self.accounts.subtract_bonus_votes(account_id, votes).await {
                warn!("Failed to debit {} bonus votes from account {}: {}", votes, account_id, e);
            }
        }
        Ok(snapshot)
    }

    /// `musicSearch`: delegate to the catalog for a known session
    pub async fn search(
        &self,
        session_id: SessionId,
        query: &str,
        catalog: &dyn MusicCatalog,
    ) -> Result<Vec<SimpleSong>> {
        self.handle(session_id).await?;
        if query.trim().is_empty() {
            return Err(Error::InvalidArgument("search query must not be empty".to_string()));
        }
        let songs = catalog.search(query).await?;
        debug!(
            "Search '{}' in session {} via {} returned {} songs",
            query,
            session_id,
            catalog.source_id(),
            songs.len()
        );
        Ok(songs)
    }

    /// `subscribeSessionState`: stream of snapshots starting with the current one
    pub async fn subscribe(&self, session_id: SessionId) -> Result<SnapshotStream> {
        let handle = self.handle(session_id).await?;
        let receiver = handle.broadcaster.receiver();
        let current = handle.latest().await;
        debug!(
            "Subscriber joined session {} at version {} ({} subscribers)",
            session_id,
            current.version,
            handle.broadcaster.subscriber_count()
        );
        Ok(handle.broadcaster.subscribe_from(receiver, current))
    }

    /// End idle sessions, expire idle voters and purge ended sessions
    pub async fn reap(&self, now: Instant) -> ReapReport {
        let handles: Vec<Arc<SessionHandle>> = self.sessions.read().await.values().cloned().collect();
        let mut report = ReapReport::default();
        let mut purge = Vec::new();
        let mut released = Vec::new();

        for handle in handles {
            let mut guard = handle.inner.lock().await;
            let inner = &mut *guard;
            match inner.lifecycle {
                SessionLifecycle::Active => {
                    let expired = inner.voters.expire_idle(now);
                    report.voters_expired += expired;

                    if now.saturating_duration_since(inner.last_activity) > self.policy.idle_timeout {
                        info!("Session {} idle, ending", handle.id);
                        Self::finish(&handle, inner).await;
                        report.sessions_ended += 1;
                        released.push(handle.clone());
                    } else if expired > 0 {
                        handle.commit(inner).await;
                    }
                }
                SessionLifecycle::Ended => {
                    let expired = inner
                        .ended_at
                        .map(|at| now.saturating_duration_since(at) > self.policy.retention)
                        .unwrap_or(true);
                    if expired {
                        purge.push(handle.id);
                    }
                }
            }
        }

        for handle in &released {
            self.release_creator(handle).await;
        }

        if !purge.is_empty() {
            let mut sessions = self.sessions.write().await;
            for session_id in &purge {
                sessions.remove(session_id);
            }
            report.sessions_purged = purge.len();
            info!("Purged {} ended sessions", purge.len());
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::{Account, InMemoryAccounts, NewAccount};
    use crowdq_common::{VoteAction, VoteDirection};

    fn song(id: &str) -> SimpleSong {
        SimpleSong {
            id: id.to_string(),
            title: format!("Song {}", id),
            artist: "Artist".to_string(),
            image: "https://img.example.com/a.jpg".to_string(),
        }
    }

    async fn account(accounts: &InMemoryAccounts, email: &str) -> Account {
        let token = accounts
            .create_account(NewAccount {
                first_name: "Host".to_string(),
                last_name: String::new(),
                email: email.to_string(),
                password: "pw".to_string(),
            })
            .await
            .unwrap();
        accounts.account_for_token(&token).await.unwrap()
    }

    fn manager(accounts: Arc<InMemoryAccounts>) -> SessionManager {
        SessionManager::new(accounts, SessionPolicy::default())
    }

    #[tokio::test]
    async fn test_create_requires_account_by_default() {
        let accounts = Arc::new(InMemoryAccounts::new(1));
        let sessions = manager(accounts);
        let err = sessions
            .create_session(&Caller::from_voter_token("t"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_create_records_active_session() {
        let accounts = Arc::new(InMemoryAccounts::new(1));
        let sessions = manager(accounts.clone());
        let host = account(&accounts, "host@example.com").await;

        let id = sessions.create_session(&Caller::from_account(host.clone())).await.unwrap();
        assert!((100_000..=999_999).contains(&id));

        let host = accounts.account(host.id).await.unwrap();
        assert_eq!(host.active_session, Some(id));

        let state = sessions.session_state(id).await.unwrap();
        assert_eq!(state.version, 1);
        assert_eq!(state.maximum_voters, 50);

        // A second ACTIVE session for the same account is refused
        let err = sessions.create_session(&Caller::from_account(host)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_concurrent_creates_leave_one_session() {
        let accounts = Arc::new(InMemoryAccounts::new(1));
        let sessions = manager(accounts.clone());
        let host = Caller::from_account(account(&accounts, "host@example.com").await);

        let (a, b) = tokio::join!(sessions.create_session(&host), sessions.create_session(&host));
        let created: Vec<SessionId> = [&a, &b].into_iter().filter_map(|r| r.as_ref().ok().copied()).collect();
        assert_eq!(created.len(), 1);
        assert!([a, b].into_iter().any(|r| matches!(r, Err(Error::InvalidState(_)))));

        assert_eq!(sessions.session_count().await, 1);
        let stored = accounts.account(host.account_id().unwrap()).await.unwrap();
        assert_eq!(stored.active_session, Some(created[0]));
    }

    #[tokio::test]
    async fn test_stale_claim_is_replaced() {
        let accounts = Arc::new(InMemoryAccounts::new(1));
        let sessions = manager(accounts.clone());
        let host = account(&accounts, "host@example.com").await;

        // Claim left behind by a session this manager never saw
        accounts.replace_active_session(host.id, None, Some(111111)).await.unwrap();
        let id = sessions.create_session(&Caller::from_account(host.clone())).await.unwrap();
        assert_eq!(accounts.account(host.id).await.unwrap().active_session, Some(id));
    }

    #[tokio::test]
    async fn test_creator_votes_as_admin_and_can_end() {
        let accounts = Arc::new(InMemoryAccounts::new(1));
        let sessions = manager(accounts.clone());
        let host = Caller::from_account(account(&accounts, "host@example.com").await);
        let id = sessions.create_session(&host).await.unwrap();

        assert_eq!(sessions.voter(id, &host).await.unwrap().tier, VoterTier::Admin);

        let guest = Caller::from_voter_token("guest");
        let err = sessions.end_session(id, &guest).await.unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));

        sessions.end_session(id, &host).await.unwrap();
        let err = sessions.end_session(id, &host).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        let host_account = accounts.account(host.account_id().unwrap()).await.unwrap();
        assert_eq!(host_account.active_session, None);
    }

    #[tokio::test]
    async fn test_update_after_end_is_invalid_state() {
        let accounts = Arc::new(InMemoryAccounts::new(1));
        let sessions = manager(accounts.clone());
        let host = Caller::from_account(account(&accounts, "host@example.com").await);
        let id = sessions.create_session(&host).await.unwrap();
        sessions.end_session(id, &host).await.unwrap();

        let update = SongUpdate::add_song(&song("a"), VoteDirection::Up);
        let err = sessions.update_queue(id, &host, &update).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        let state = sessions.session_state(id).await.unwrap();
        assert!(state.is_terminal());
    }

    #[tokio::test]
    async fn test_failed_update_leaves_no_trace() {
        let accounts = Arc::new(InMemoryAccounts::new(1));
        let sessions = manager(accounts.clone());
        let host = Caller::from_account(account(&accounts, "host@example.com").await);
        let id = sessions.create_session(&host).await.unwrap();

        let guest = Caller::from_voter_token("guest");
        let update = SongUpdate::vote("missing", VoteDirection::Up, VoteAction::Add);
        assert!(sessions.update_queue(id, &guest, &update).await.is_err());

        let state = sessions.session_state(id).await.unwrap();
        assert_eq!(state.version, 1);
        assert_eq!(state.number_of_voters, 0);
    }

    #[tokio::test]
    async fn test_advance_queue_admin_only() {
        let accounts = Arc::new(InMemoryAccounts::new(1));
        let sessions = manager(accounts.clone());
        let host = Caller::from_account(account(&accounts, "host@example.com").await);
        let id = sessions.create_session(&host).await.unwrap();

        let guest = Caller::from_voter_token("guest");
        sessions
            .update_queue(id, &guest, &SongUpdate::add_song(&song("a"), VoteDirection::Up))
            .await
            .unwrap();

        let err = sessions.advance_queue(id, &guest).await.unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));

        let state = sessions.advance_queue(id, &host).await.unwrap();
        assert!(state.queue.is_empty());
        assert_eq!(
            state.currently_playing.simple_song.as_ref().map(|s| s.id.as_str()),
            Some("a")
        );

        // Empty queue: no new version
        let again = sessions.advance_queue(id, &host).await.unwrap();
        assert_eq!(again.version, state.version);
    }

    #[tokio::test]
    async fn test_reaper_ends_idle_and_purges_after_retention() {
        let accounts = Arc::new(InMemoryAccounts::new(1));
        let sessions = manager(accounts.clone());
        let host = Caller::from_account(account(&accounts, "host@example.com").await);
        let id = sessions.create_session(&host).await.unwrap();

        let policy = sessions.policy().clone();
        let later = Instant::now() + policy.idle_timeout + Duration::from_secs(1);
        let report = sessions.reap(later).await;
        assert_eq!(report.sessions_ended, 1);
        assert!(sessions.session_state(id).await.unwrap().is_terminal());

        let much_later = later + policy.retention + Duration::from_secs(1);
        let report = sessions.reap(much_later).await;
        assert_eq!(report.sessions_purged, 1);
        assert!(matches!(sessions.session_state(id).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_search_validation() {
        let accounts = Arc::new(InMemoryAccounts::new(1));
        let sessions = manager(accounts.clone());
        let catalog = crate::catalog::StaticCatalog::demo();
        let host = Caller::from_account(account(&accounts, "host@example.com").await);

        let err = sessions.search(1, "jackie", &catalog).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let id = sessions.create_session(&host).await.unwrap();
        let err = sessions.search(id, "  ", &catalog).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(!sessions.search(id, "jackie", &catalog).await.unwrap().is_empty());
    }
}
