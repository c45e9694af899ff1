//! Voter identity and per-session voter records
//!
//! [`IdentityResolver`] turns the bearer credentials of a request into a
//! [`Caller`]. Each session owns a [`VoterRegistry`] that binds callers to
//! [`VoterRecord`]s and derives their [`VoterTier`].

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

use crowdq_common::config::AuthConfig;
use crowdq_common::token::generate_token;
use crowdq_common::{Error, Result, VoterTier};

use crate::accounts::{Account, AccountId, AccountStore};
use crate::tokens::TokenTable;

/// Key of a voter record: `account:<id>` or `voter:<token>`
pub type VoterId = String;

// ========================================
// Credentials and caller identity
// ========================================

/// Bearer tokens presented with a request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub account_token: Option<String>,
    pub voter_token: Option<String>,
}

impl Credentials {
    pub fn account(token: impl Into<String>) -> Self {
        Self {
            account_token: Some(token.into()),
            voter_token: None,
        }
    }

    pub fn voter(token: impl Into<String>) -> Self {
        Self {
            account_token: None,
            voter_token: Some(token.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone)]
enum Identity {
    Account(Account),
    Voter(String),
}

/// Resolved identity of a request
#[derive(Debug, Clone)]
pub struct Caller {
    identity: Identity,
    issued_token: Option<String>,
}

impl Caller {
    /// Caller authenticated by an account token
    pub fn from_account(account: Account) -> Self {
        Self {
            identity: Identity::Account(account),
            issued_token: None,
        }
    }

    /// Caller identified by a voter token
    pub fn from_voter_token(token: impl Into<String>) -> Self {
        Self {
            identity: Identity::Voter(token.into()),
            issued_token: None,
        }
    }

    pub fn account(&self) -> Option<&Account> {
        match &self.identity {
            Identity::Account(account) => Some(account),
            Identity::Voter(_) => None,
        }
    }

    pub fn account_id(&self) -> Option<AccountId> {
        self.account().map(|account| account.id)
    }

    /// Voter token minted for this request, if the caller presented none
    pub fn issued_token(&self) -> Option<&str> {
        self.issued_token.as_deref()
    }

    pub fn voter_id(&self) -> VoterId {
        match &self.identity {
            Identity::Account(account) => format!("account:{}", account.id),
            Identity::Voter(token) => format!("voter:{}", token),
        }
    }
}

/// Maps request credentials to callers
///
/// Also issues anonymous voter tokens. Only tokens issued here, and not yet
/// expired, are accepted back as voter credentials.
pub struct IdentityResolver {
    accounts: Arc<dyn AccountStore>,
    voter_tokens: RwLock<TokenTable<()>>,
}

impl IdentityResolver {
    pub fn new(accounts: Arc<dyn AccountStore>) -> Self {
        Self::with_token_idle_timeout(accounts, AuthConfig::default().token_idle_timeout())
    }

    pub fn with_token_idle_timeout(accounts: Arc<dyn AccountStore>, token_idle_timeout: Duration) -> Self {
        Self {
            accounts,
            voter_tokens: RwLock::new(TokenTable::new(token_idle_timeout)),
        }
    }

    /// `voterToken` operation
    pub async fn issue_voter_token(&self) -> String {
        self.voter_tokens.write().await.issue((), Instant::now())
    }

    /// Resolve credentials into a caller
    ///
    /// An account token takes precedence over a voter token. Unknown tokens of
    /// either kind are `PermissionDenied`. Without credentials a voter token is
    /// issued and reported through [`Caller::issued_token`]; pass the outcome
    /// of the request through [`settle`](Self::settle) so a token that never
    /// reaches the client is revoked.
    pub async fn resolve(&self, credentials: &Credentials) -> Result<Caller> {
        if let Some(caller) = self.resolve_presented(credentials).await? {
            return Ok(caller);
        }

        let token = self.issue_voter_token().await;
        debug!("Issued voter token for anonymous caller");
        Ok(Caller {
            identity: Identity::Voter(token.clone()),
            issued_token: Some(token),
        })
    }

    /// Resolve credentials without ever issuing a token
    ///
    /// For requests whose response cannot carry a token back. A caller
    /// without credentials gets a throwaway voter identity that no session
    /// knows and that cannot be presented again.
    pub async fn resolve_without_issuing(&self, credentials: &Credentials) -> Result<Caller> {
        match self.resolve_presented(credentials).await? {
            Some(caller) => Ok(caller),
            None => Ok(Caller::from_voter_token(generate_token())),
        }
    }

    async fn resolve_presented(&self, credentials: &Credentials) -> Result<Option<Caller>> {
        if let Some(token) = &credentials.account_token {
            let account = self.accounts.account_for_token(token).await?;
            return Ok(Some(Caller::from_account(account)));
        }

        if let Some(token) = &credentials.voter_token {
            if self.voter_tokens.write().await.touch(token, Instant::now()).is_none() {
                return Err(Error::PermissionDenied("unrecognized voter token".to_string()));
            }
            return Ok(Some(Caller::from_voter_token(token.clone())));
        }

        Ok(None)
    }

    /// Revoke the token issued for `caller` when its request failed
    pub async fn settle<T>(&self, caller: &Caller, outcome: Result<T>) -> Result<T> {
        if outcome.is_err() {
            if let Some(token) = caller.issued_token() {
                self.voter_tokens.write().await.revoke(token);
                debug!("Revoked voter token issued for a failed request");
            }
        }
        outcome
    }

    /// Drop idle voter and account tokens; returns how many went
    pub async fn expire_idle_tokens(&self, now: Instant) -> usize {
        let voters = self.voter_tokens.write().await.expire_idle(now);
        voters + self.accounts.expire_idle_tokens(now).await
    }

    /// Voter tokens currently accepted
    pub async fn voter_token_count(&self) -> usize {
        self.voter_tokens.read().await.len()
    }

    /// Resolve credentials that must carry an account token
    pub async fn require_account(&self, credentials: &Credentials) -> Result<Account> {
        match &credentials.account_token {
            Some(token) => self.accounts.account_for_token(token).await,
            None => Err(Error::PermissionDenied("account authentication required".to_string())),
        }
    }
}

// ========================================
// Voter records
// ========================================

/// Per-session voting state of one voter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoterRecord {
    pub voter_id: VoterId,
    pub tier: VoterTier,
    pub account_id: Option<AccountId>,
    pub songs_up_voted: u32,
    pub songs_down_voted: u32,
    pub bonus_votes: u32,
    pub last_seen: Instant,
    /// False once the voter has been idle past the voter timeout
    pub active: bool,
}

/// Wire form of a voter record (`voter` query)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterView {
    #[serde(rename = "type")]
    pub tier: VoterTier,
    pub songs_up_voted: u32,
    pub songs_down_voted: u32,
    pub bonus_votes: u32,
}

impl From<&VoterRecord> for VoterView {
    fn from(record: &VoterRecord) -> Self {
        Self {
            tier: record.tier,
            songs_up_voted: record.songs_up_voted,
            songs_down_voted: record.songs_down_voted,
            bonus_votes: record.bonus_votes,
        }
    }
}

/// Tier and starting bonus balance of a caller in a session
///
/// `creator` is the voter id of whoever created the session.
pub fn tier_for(caller: &Caller, creator: Option<&str>) -> (VoterTier, u32) {
    if creator == Some(caller.voter_id().as_str()) {
        return (VoterTier::Admin, 0);
    }
    match caller.account() {
        Some(account) => match account.level.voter_tier() {
            VoterTier::Privileged => (VoterTier::Privileged, account.bonus_votes),
            tier => (tier, 0),
        },
        None => (VoterTier::Free, 0),
    }
}

/// Voter records of one session
#[derive(Debug)]
pub struct VoterRegistry {
    records: HashMap<VoterId, VoterRecord>,
    /// 0 means unlimited
    max_voters: usize,
    idle_timeout: Duration,
}

impl VoterRegistry {
    pub fn new(max_voters: usize, idle_timeout: Duration) -> Self {
        Self {
            records: HashMap::new(),
            max_voters,
            idle_timeout,
        }
    }

    /// Voters currently counting toward `numberOfVoters`
    pub fn active_count(&self) -> usize {
        self.records.values().filter(|record| record.active).count()
    }

    pub fn max_voters(&self) -> usize {
        self.max_voters
    }

    fn is_full(&self) -> bool {
        self.max_voters != 0 && self.active_count() >= self.max_voters
    }

    /// Record the caller would vote with, without storing it
    ///
    /// Existing records are returned re-activated with `last_seen` refreshed.
    /// Admitting a new or inactive non-ADMIN voter into a full session is
    /// `PermissionDenied`.
    pub fn admit(&self, caller: &Caller, creator: Option<&str>, now: Instant) -> Result<VoterRecord> {
        let voter_id = caller.voter_id();

        let mut record = match self.records.get(&voter_id) {
            Some(existing) => existing.clone(),
            None => {
                let (tier, bonus_votes) = tier_for(caller, creator);
                VoterRecord {
                    voter_id,
                    tier,
                    account_id: caller.account_id(),
                    songs_up_voted: 0,
                    songs_down_voted: 0,
                    bonus_votes,
                    last_seen: now,
                    active: false,
                }
            }
        };

        if !record.active && record.tier != VoterTier::Admin && self.is_full() {
            return Err(Error::PermissionDenied("session is full".to_string()));
        }

        record.active = true;
        record.last_seen = now;
        Ok(record)
    }

    /// Insert or replace a record produced by [`admit`](Self::admit)
    pub fn store(&mut self, record: VoterRecord) {
        self.records.insert(record.voter_id.clone(), record);
    }

    /// Admit and store in one step
    pub fn identify(&mut self, caller: &Caller, creator: Option<&str>, now: Instant) -> Result<VoterRecord> {
        let record = self.admit(caller, creator, now)?;
        self.store(record.clone());
        Ok(record)
    }

    /// Existing record of a caller; never creates one
    pub fn lookup(&self, caller: &Caller) -> Option<&VoterRecord> {
        self.records.get(&caller.voter_id())
    }

    /// Mark non-ADMIN voters idle past the timeout as inactive
    ///
    /// Returns how many records were deactivated.
    pub fn expire_idle(&mut self, now: Instant) -> usize {
        let idle_timeout = self.idle_timeout;
        let mut expired = 0;
        for record in self.records.values_mut() {
            if record.active
                && record.tier != VoterTier::Admin
                && now.saturating_duration_since(record.last_seen) > idle_timeout
            {
                record.active = false;
                expired += 1;
            }
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::{InMemoryAccounts, NewAccount};
    use crowdq_common::AccountLevel;

    fn account(id: AccountId, level: AccountLevel, bonus_votes: u32) -> Account {
        Account {
            id,
            first_name: "Test".to_string(),
            last_name: String::new(),
            email: format!("user{}@example.com", id),
            level,
            bonus_votes,
            active_session: None,
        }
    }

    #[test]
    fn test_tier_derivation() {
        let creator = Caller::from_account(account(1, AccountLevel::Free, 0));
        let creator_id = creator.voter_id();
        let creator_key = Some(creator_id.as_str());

        assert_eq!(tier_for(&creator, creator_key), (VoterTier::Admin, 0));
        assert_eq!(
            tier_for(&Caller::from_account(account(2, AccountLevel::Admin, 0)), creator_key).0,
            VoterTier::Admin
        );
        assert_eq!(
            tier_for(&Caller::from_account(account(3, AccountLevel::Privileged, 2)), creator_key),
            (VoterTier::Privileged, 2)
        );
        assert_eq!(
            tier_for(&Caller::from_account(account(4, AccountLevel::Free, 0)), creator_key).0,
            VoterTier::Free
        );
        assert_eq!(tier_for(&Caller::from_voter_token("t"), creator_key).0, VoterTier::Free);
    }

    #[test]
    fn test_anonymous_creator_is_admin() {
        let caller = Caller::from_voter_token("abc");
        let creator = caller.voter_id();
        assert_eq!(tier_for(&caller, Some(creator.as_str())).0, VoterTier::Admin);
    }

    #[test]
    fn test_capacity_limits_new_voters_only() {
        let now = Instant::now();
        let mut registry = VoterRegistry::new(1, Duration::from_secs(60));

        let first = Caller::from_voter_token("one");
        registry.identify(&first, None, now).unwrap();

        let second = Caller::from_voter_token("two");
        let err = registry.identify(&second, None, now).unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));

        // Existing voters keep access
        registry.identify(&first, None, now).unwrap();
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn test_admin_exempt_from_capacity() {
        let now = Instant::now();
        let mut registry = VoterRegistry::new(1, Duration::from_secs(60));
        registry.identify(&Caller::from_voter_token("one"), None, now).unwrap();

        let admin = Caller::from_account(account(9, AccountLevel::Admin, 0));
        let record = registry.identify(&admin, None, now).unwrap();
        assert_eq!(record.tier, VoterTier::Admin);
        assert_eq!(registry.active_count(), 2);
    }

    #[test]
    fn test_idle_voters_expire_and_keep_counters() {
        let start = Instant::now();
        let mut registry = VoterRegistry::new(0, Duration::from_secs(10));
        let caller = Caller::from_account(account(3, AccountLevel::Privileged, 1));

        let mut record = registry.identify(&caller, None, start).unwrap();
        record.songs_up_voted = 2;
        record.bonus_votes = 0;
        registry.store(record);

        assert_eq!(registry.expire_idle(start + Duration::from_secs(5)), 0);
        assert_eq!(registry.expire_idle(start + Duration::from_secs(11)), 1);
        assert_eq!(registry.active_count(), 0);

        let again = registry
            .identify(&caller, None, start + Duration::from_secs(12))
            .unwrap();
        assert!(again.active);
        assert_eq!(again.songs_up_voted, 2);
        assert_eq!(again.bonus_votes, 0);
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn test_admit_does_not_store() {
        let registry = VoterRegistry::new(0, Duration::from_secs(10));
        registry
            .admit(&Caller::from_voter_token("x"), None, Instant::now())
            .unwrap();
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn test_resolver_issues_and_validates_voter_tokens() {
        let accounts = Arc::new(InMemoryAccounts::new(1));
        let resolver = IdentityResolver::new(accounts.clone());

        let anonymous = resolver.resolve(&Credentials::anonymous()).await.unwrap();
        let issued = anonymous.issued_token().unwrap().to_string();

        let again = resolver.resolve(&Credentials::voter(issued.clone())).await.unwrap();
        assert!(again.issued_token().is_none());
        assert_eq!(again.voter_id(), anonymous.voter_id());

        let err = resolver.resolve(&Credentials::voter("forged")).await.unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_anonymous_tokens_do_not_accumulate() {
        let accounts = Arc::new(InMemoryAccounts::new(1));
        let resolver = IdentityResolver::with_token_idle_timeout(accounts, Duration::from_secs(60));

        // Failed requests take their token back
        for _ in 0..1000 {
            let caller = resolver.resolve(&Credentials::anonymous()).await.unwrap();
            let outcome: Result<()> = Err(Error::NotFound("session".to_string()));
            assert!(resolver.settle(&caller, outcome).await.is_err());
        }
        assert_eq!(resolver.voter_token_count().await, 0);

        // Requests that cannot return a token never mint one
        for _ in 0..1000 {
            let caller = resolver
                .resolve_without_issuing(&Credentials::anonymous())
                .await
                .unwrap();
            assert!(caller.issued_token().is_none());
        }
        assert_eq!(resolver.voter_token_count().await, 0);

        // Delivered tokens are kept until they go idle
        let kept = resolver.resolve(&Credentials::anonymous()).await.unwrap();
        resolver.settle(&kept, Ok(())).await.unwrap();
        assert_eq!(resolver.voter_token_count().await, 1);

        let later = Instant::now() + Duration::from_secs(61);
        assert_eq!(resolver.expire_idle_tokens(later).await, 1);
        let token = kept.issued_token().unwrap().to_string();
        assert!(resolver.resolve(&Credentials::voter(token)).await.is_err());
    }

    #[tokio::test]
    async fn test_resolver_prefers_account_token() {
        let accounts = Arc::new(InMemoryAccounts::new(1));
        let token = accounts
            .create_account(NewAccount {
                first_name: "A".to_string(),
                last_name: String::new(),
                email: "a@example.com".to_string(),
                password: "pw".to_string(),
            })
            .await
            .unwrap();
        let resolver = IdentityResolver::new(accounts);

        let credentials = Credentials {
            account_token: Some(token),
            voter_token: Some("ignored".to_string()),
        };
        let caller = resolver.resolve(&credentials).await.unwrap();
        assert!(caller.account().is_some());

        let err = resolver.resolve(&Credentials::account("bogus")).await.unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
        assert!(resolver.require_account(&Credentials::anonymous()).await.is_err());
    }
}
