//! Background session reaper
//!
//! Periodically ends idle sessions, expires idle voters, drops ended
//! sessions whose retention window has passed and forgets idle bearer
//! tokens.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::registry::IdentityResolver;
use crate::session::SessionManager;

/// Spawn the reaper loop on the current runtime
pub fn spawn_reaper(
    sessions: Arc<SessionManager>,
    identity: Arc<IdentityResolver>,
    period: Duration,
) -> JoinHandle<()> {
    info!("Session reaper running every {:?}", period);

    tokio::spawn(async move {
        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tick.tick().await;
            let now = Instant::now();

            let report = sessions.reap(now).await;
            if report.sessions_ended + report.sessions_purged + report.voters_expired > 0 {
                debug!(
                    "Reaper pass: {} ended, {} purged, {} voters expired",
                    report.sessions_ended, report.sessions_purged, report.voters_expired
                );
            }

            let tokens = identity.expire_idle_tokens(now).await;
            if tokens > 0 {
                debug!("Reaper pass: {} idle tokens dropped", tokens);
            }
        }
    })
}
