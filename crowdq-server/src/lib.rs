//! crowdq-server library - collaborative music-queue voting service
//!
//! Listeners join a session, vote songs up or down, and watch the queue
//! reorder live. Sessions, voter records and queues are held in memory.

use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crowdq_common::config::{AuthConfig, TomlConfig};

pub mod accounts;
pub mod api;
pub mod broadcaster;
pub mod catalog;
pub mod queue;
pub mod reaper;
pub mod registry;
pub mod session;
mod tokens;

use accounts::AccountStore;
use catalog::MusicCatalog;
use registry::IdentityResolver;
use session::{SessionManager, SessionPolicy};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub identity: Arc<IdentityResolver>,
    pub accounts: Arc<dyn AccountStore>,
    pub catalog: Arc<dyn MusicCatalog>,
}

impl AppState {
    /// Create new application state
    pub fn new(accounts: Arc<dyn AccountStore>, catalog: Arc<dyn MusicCatalog>, policy: SessionPolicy) -> Self {
        Self::build(accounts, catalog, policy, AuthConfig::default().token_idle_timeout())
    }

    /// State configured from a loaded config file
    pub fn from_config(config: &TomlConfig, accounts: Arc<dyn AccountStore>, catalog: Arc<dyn MusicCatalog>) -> Self {
        Self::build(
            accounts,
            catalog,
            SessionPolicy::from_config(config),
            config.auth.token_idle_timeout(),
        )
    }

    fn build(
        accounts: Arc<dyn AccountStore>,
        catalog: Arc<dyn MusicCatalog>,
        policy: SessionPolicy,
        token_idle_timeout: Duration,
    ) -> Self {
        Self {
            sessions: Arc::new(SessionManager::new(accounts.clone(), policy)),
            identity: Arc::new(IdentityResolver::with_token_idle_timeout(
                accounts.clone(),
                token_idle_timeout,
            )),
            accounts,
            catalog,
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::account_routes())
        .merge(api::session_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
