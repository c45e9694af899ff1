//! Account directory
//!
//! Accounts, passwords and account bearer tokens belong to an external
//! service. The voting core only needs the small surface in [`AccountStore`];
//! [`InMemoryAccounts`] implements it for single-process deployments and tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crowdq_common::config::{AuthConfig, SeedAccount};
use crowdq_common::token::{generate_salt, hash_password, verify_password};
use crowdq_common::{AccountLevel, Error, Result, SessionId};

use crate::tokens::TokenTable;

/// Account identifier
pub type AccountId = u64;

/// Account attributes visible to the voting core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: AccountId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub level: AccountLevel,
    /// Remaining bonus balance of a PRIVILEGED account
    ///
    /// Each session a voter joins starts from this balance. Bonus votes spent
    /// on a song are debited here once the song is played.
    pub bonus_votes: u32,
    pub active_session: Option<SessionId>,
}

/// Input of `createAccount`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAccount {
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub email: String,
    pub password: String,
}

/// Input of `login`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountLogin {
    pub email: String,
    pub password: String,
}

/// Account operations the voting service depends on
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Register a FREE-level account and return its bearer token
    async fn create_account(&self, new_account: NewAccount) -> Result<String>;

    /// Exchange credentials for a fresh bearer token
    async fn login(&self, login: &AccountLogin) -> Result<String>;

    /// Resolve a bearer token; unknown tokens are `PermissionDenied`
    async fn account_for_token(&self, token: &str) -> Result<Account>;

    /// Look up an account by id
    async fn account(&self, id: AccountId) -> Result<Account>;

    /// Delete `target`; allowed for the account itself or an ADMIN-level account
    async fn delete_account(&self, requester: &Account, target: AccountId) -> Result<()>;

    /// Compare-and-set the session an account is hosting
    ///
    /// Succeeds only while the stored value still equals `current`;
    /// otherwise the account moved on and the result is `InvalidState`.
    async fn replace_active_session(
        &self,
        id: AccountId,
        current: Option<SessionId>,
        new: Option<SessionId>,
    ) -> Result<()>;

    /// Take spent bonus votes off an account's balance
    async fn subtract_bonus_votes(&self, id: AccountId, votes: u32) -> Result<()>;

    /// Drop bearer tokens idle past the store's timeout; returns how many
    async fn expire_idle_tokens(&self, now: Instant) -> usize;
}

#[derive(Debug, Clone)]
struct StoredAccount {
    account: Account,
    salt: String,
    password_hash: String,
}

#[derive(Debug)]
struct Directory {
    accounts: HashMap<AccountId, StoredAccount>,
    by_email: HashMap<String, AccountId>,
    tokens: TokenTable<AccountId>,
    next_id: AccountId,
}

impl Directory {
    fn new(token_idle_timeout: Duration) -> Self {
        Self {
            accounts: HashMap::new(),
            by_email: HashMap::new(),
            tokens: TokenTable::new(token_idle_timeout),
            next_id: 0,
        }
    }

    fn stored_mut(&mut self, id: AccountId) -> Result<&mut StoredAccount> {
        self.accounts
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("account {}", id)))
    }

    fn insert(&mut self, new_account: NewAccount, level: AccountLevel, bonus_votes: u32) -> Result<AccountId> {
        let email = normalize_email(&new_account.email);
        if !is_plausible_email(&email) {
            return Err(Error::InvalidArgument(format!("invalid email: {}", new_account.email)));
        }
        if new_account.password.is_empty() {
            return Err(Error::InvalidArgument("password must not be empty".to_string()));
        }
        if self.by_email.contains_key(&email) {
            return Err(Error::Conflict(format!("{} already has an account", email)));
        }

        self.next_id += 1;
        let id = self.next_id;
        let salt = generate_salt();
        let password_hash = hash_password(&new_account.password, &salt);

        self.accounts.insert(
            id,
            StoredAccount {
                account: Account {
                    id,
                    first_name: new_account.first_name,
                    last_name: new_account.last_name,
                    email: email.clone(),
                    level,
                    bonus_votes,
                    active_session: None,
                },
                salt,
                password_hash,
            },
        );
        self.by_email.insert(email, id);
        Ok(id)
    }

    fn issue_token(&mut self, id: AccountId) -> String {
        self.tokens.issue(id, Instant::now())
    }
}

/// Single-process account directory
pub struct InMemoryAccounts {
    directory: RwLock<Directory>,
    privileged_bonus_votes: u32,
}

impl InMemoryAccounts {
    /// Create an empty directory
    ///
    /// `privileged_bonus_votes` is the bonus balance given to seeded
    /// PRIVILEGED accounts that do not specify their own.
    pub fn new(privileged_bonus_votes: u32) -> Self {
        Self::with_token_idle_timeout(privileged_bonus_votes, AuthConfig::default().token_idle_timeout())
    }

    /// Create an empty directory whose tokens lapse after `token_idle_timeout`
    pub fn with_token_idle_timeout(privileged_bonus_votes: u32, token_idle_timeout: Duration) -> Self {
        Self {
            directory: RwLock::new(Directory::new(token_idle_timeout)),
            privileged_bonus_votes,
        }
    }

    /// Add an account with an explicit level (config seeding)
    pub async fn seed(&self, seed: &SeedAccount) -> Result<AccountId> {
        let bonus_votes = match seed.level {
            AccountLevel::Privileged => seed.bonus_votes.unwrap_or(self.privileged_bonus_votes),
            _ => seed.bonus_votes.unwrap_or(0),
        };
        let new_account = NewAccount {
            first_name: seed.first_name.clone(),
            last_name: seed.last_name.clone(),
            email: seed.email.clone(),
            password: seed.password.clone(),
        };

        let id = self
            .directory
            .write()
            .await
            .insert(new_account, seed.level, bonus_votes)?;
        info!("Seeded {} account {} ({})", seed.level.voter_tier(), id, seed.email);
        Ok(id)
    }
}

#[async_trait]
impl AccountStore for InMemoryAccounts {
    async fn create_account(&self, new_account: NewAccount) -> Result<String> {
        let mut directory = self.directory.write().await;
        let id = directory.insert(new_account, AccountLevel::Free, 0)?;
        info!("Created account {}", id);
        Ok(directory.issue_token(id))
    }

    async fn login(&self, login: &AccountLogin) -> Result<String> {
        let mut directory = self.directory.write().await;
        let email = normalize_email(&login.email);

        let id = directory.by_email.get(&email).copied();
        let verified = id
            .and_then(|id| directory.accounts.get(&id))
            .map(|stored| verify_password(&login.password, &stored.salt, &stored.password_hash))
            .unwrap_or(false);

        match (id, verified) {
            (Some(id), true) => {
                debug!("Account {} logged in", id);
                Ok(directory.issue_token(id))
            }
            _ => Err(Error::PermissionDenied("invalid login credentials".to_string())),
        }
    }

    async fn account_for_token(&self, token: &str) -> Result<Account> {
        let mut directory = self.directory.write().await;
        let id = directory.tokens.touch(token, Instant::now());
        id.and_then(|id| directory.accounts.get(&id))
            .map(|stored| stored.account.clone())
            .ok_or_else(|| Error::PermissionDenied("unrecognized account token".to_string()))
    }

    async fn account(&self, id: AccountId) -> Result<Account> {
        self.directory
            .read()
            .await
            .accounts
            .get(&id)
            .map(|stored| stored.account.clone())
            .ok_or_else(|| Error::NotFound(format!("account {}", id)))
    }

    async fn delete_account(&self, requester: &Account, target: AccountId) -> Result<()> {
        if requester.id != target && requester.level != AccountLevel::Admin {
            return Err(Error::PermissionDenied(format!(
                "account {} may not delete account {}",
                requester.id, target
            )));
        }

        let mut directory = self.directory.write().await;
        let stored = directory
            .accounts
            .remove(&target)
            .ok_or_else(|| Error::NotFound(format!("account {}", target)))?;
        directory.by_email.remove(&stored.account.email);
        directory.tokens.retain(|id| *id != target);

        info!("Deleted account {} (requested by {})", target, requester.id);
        Ok(())
    }

    async fn replace_active_session(
        &self,
        id: AccountId,
        current: Option<SessionId>,
        new: Option<SessionId>,
    ) -> Result<()> {
        let mut directory = self.directory.write().await;
        let stored = directory.stored_mut(id)?;
        if stored.account.active_session != current {
            return Err(Error::InvalidState(match stored.account.active_session {
                Some(session) => format!("account {} already hosts session {}", id, session),
                None => format!("account {} hosts no session", id),
            }));
        }
        stored.account.active_session = new;
        Ok(())
    }

    async fn subtract_bonus_votes(&self, id: AccountId, votes: u32) -> Result<()> {
        let mut directory = self.directory.write().await;
        let stored = directory.stored_mut(id)?;
        stored.account.bonus_votes = stored.account.bonus_votes.saturating_sub(votes);
        info!(
            "Account {} spent {} bonus votes ({} left)",
            id, votes, stored.account.bonus_votes
        );
        Ok(())
    }

    async fn expire_idle_tokens(&self, now: Instant) -> usize {
        self.directory.write().await.tokens.expire_idle(now)
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_account(email: &str) -> NewAccount {
        NewAccount {
            first_name: "Test".to_string(),
            last_name: "User".to_string(),
            email: email.to_string(),
            password: "secret".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_and_login() {
        let accounts = InMemoryAccounts::new(1);
        let token = accounts.create_account(new_account("a@example.com")).await.unwrap();

        let account = accounts.account_for_token(&token).await.unwrap();
        assert_eq!(account.level, AccountLevel::Free);
        assert_eq!(account.email, "a@example.com");

        let login = AccountLogin {
            email: "A@Example.com".to_string(),
            password: "secret".to_string(),
        };
        let second = accounts.login(&login).await.unwrap();
        assert_ne!(second, token);
        assert_eq!(accounts.account_for_token(&second).await.unwrap().id, account.id);
    }

    #[tokio::test]
    async fn test_wrong_password_is_denied() {
        let accounts = InMemoryAccounts::new(1);
        accounts.create_account(new_account("a@example.com")).await.unwrap();

        let login = AccountLogin {
            email: "a@example.com".to_string(),
            password: "nope".to_string(),
        };
        assert!(matches!(accounts.login(&login).await, Err(Error::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let accounts = InMemoryAccounts::new(1);
        accounts.create_account(new_account("a@example.com")).await.unwrap();
        let err = accounts.create_account(new_account("a@example.com")).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_invalid_email_rejected() {
        let accounts = InMemoryAccounts::new(1);
        let err = accounts.create_account(new_account("not-an-email")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_seeded_privileged_gets_default_bonus() {
        let accounts = InMemoryAccounts::new(4);
        let seed = SeedAccount {
            first_name: "Mikey".to_string(),
            last_name: String::new(),
            email: "mikey@example.com".to_string(),
            password: "gobraves".to_string(),
            level: AccountLevel::Privileged,
            bonus_votes: None,
        };
        let id = accounts.seed(&seed).await.unwrap();
        let account = accounts.account(id).await.unwrap();
        assert_eq!(account.level, AccountLevel::Privileged);
        assert_eq!(account.bonus_votes, 4);
    }

    #[tokio::test]
    async fn test_delete_rules() {
        let accounts = InMemoryAccounts::new(1);
        let t1 = accounts.create_account(new_account("a@example.com")).await.unwrap();
        let t2 = accounts.create_account(new_account("b@example.com")).await.unwrap();
        let a = accounts.account_for_token(&t1).await.unwrap();
        let b = accounts.account_for_token(&t2).await.unwrap();

        // Ordinary accounts cannot delete each other
        let err = accounts.delete_account(&a, b.id).await.unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));

        // Self-deletion revokes the token
        accounts.delete_account(&a, a.id).await.unwrap();
        assert!(accounts.account_for_token(&t1).await.is_err());
        assert!(matches!(accounts.account(a.id).await, Err(Error::NotFound(_))));
        assert_eq!(accounts.account(b.id).await.unwrap().email, "b@example.com");
    }

    #[tokio::test]
    async fn test_active_session_compare_and_set() {
        let accounts = InMemoryAccounts::new(1);
        let token = accounts.create_account(new_account("a@example.com")).await.unwrap();
        let id = accounts.account_for_token(&token).await.unwrap().id;

        accounts.replace_active_session(id, None, Some(123456)).await.unwrap();
        assert_eq!(accounts.account(id).await.unwrap().active_session, Some(123456));

        // A second claim from the same starting point loses
        let err = accounts
            .replace_active_session(id, None, Some(654321))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        // Releasing a session the account no longer hosts leaves it alone
        let err = accounts
            .replace_active_session(id, Some(654321), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert_eq!(accounts.account(id).await.unwrap().active_session, Some(123456));

        accounts.replace_active_session(id, Some(123456), None).await.unwrap();
        assert_eq!(accounts.account(id).await.unwrap().active_session, None);
    }

    #[tokio::test]
    async fn test_subtract_bonus_votes_saturates() {
        let accounts = InMemoryAccounts::new(3);
        let id = accounts
            .seed(&SeedAccount {
                first_name: "Vip".to_string(),
                last_name: String::new(),
                email: "vip@example.com".to_string(),
                password: "pw".to_string(),
                level: AccountLevel::Privileged,
                bonus_votes: None,
            })
            .await
            .unwrap();

        accounts.subtract_bonus_votes(id, 2).await.unwrap();
        assert_eq!(accounts.account(id).await.unwrap().bonus_votes, 1);
        accounts.subtract_bonus_votes(id, 5).await.unwrap();
        assert_eq!(accounts.account(id).await.unwrap().bonus_votes, 0);

        assert!(matches!(
            accounts.subtract_bonus_votes(999, 1).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_login_tokens_expire_when_idle() {
        let accounts = InMemoryAccounts::with_token_idle_timeout(1, Duration::from_secs(60));
        let first = accounts.create_account(new_account("a@example.com")).await.unwrap();
        let login = AccountLogin {
            email: "a@example.com".to_string(),
            password: "secret".to_string(),
        };
        for _ in 0..100 {
            accounts.login(&login).await.unwrap();
        }
        assert_eq!(accounts.directory.read().await.tokens.len(), 101);

        let later = Instant::now() + Duration::from_secs(61);
        assert_eq!(accounts.expire_idle_tokens(later).await, 101);
        assert_eq!(accounts.directory.read().await.tokens.len(), 0);
        assert!(matches!(
            accounts.account_for_token(&first).await,
            Err(Error::PermissionDenied(_))
        ));
    }
}
