//! Issued bearer tokens with idle expiry
//!
//! Both account tokens and anonymous voter tokens are minted by this process
//! and only accepted back while they are still held here. Every successful
//! lookup refreshes the token; the reaper drops tokens idle past the
//! configured timeout.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crowdq_common::token::generate_token;

#[derive(Debug, Clone)]
struct Issued<V> {
    value: V,
    last_seen: Instant,
}

/// Tokens bound to a value (an account id, or nothing for voter tokens)
#[derive(Debug)]
pub(crate) struct TokenTable<V> {
    tokens: HashMap<String, Issued<V>>,
    idle_timeout: Duration,
}

impl<V: Clone> TokenTable<V> {
    pub(crate) fn new(idle_timeout: Duration) -> Self {
        Self {
            tokens: HashMap::new(),
            idle_timeout,
        }
    }

    pub(crate) fn issue(&mut self, value: V, now: Instant) -> String {
        let token = generate_token();
        self.tokens.insert(
            token.clone(),
            Issued {
                value,
                last_seen: now,
            },
        );
        token
    }

    /// Value bound to `token`, refreshing its idle clock
    ///
    /// A token already past the timeout does not resolve even if the reaper
    /// has not swept it yet.
    pub(crate) fn touch(&mut self, token: &str, now: Instant) -> Option<V> {
        let issued = self.tokens.get_mut(token)?;
        if now.saturating_duration_since(issued.last_seen) > self.idle_timeout {
            return None;
        }
        issued.last_seen = now;
        Some(issued.value.clone())
    }

    pub(crate) fn revoke(&mut self, token: &str) -> bool {
        self.tokens.remove(token).is_some()
    }

    /// Keep only tokens whose value passes `keep`
    pub(crate) fn retain(&mut self, mut keep: impl FnMut(&V) -> bool) {
        self.tokens.retain(|_, issued| keep(&issued.value));
    }

    /// Drop tokens idle past the timeout, returning how many went
    pub(crate) fn expire_idle(&mut self, now: Instant) -> usize {
        let idle_timeout = self.idle_timeout;
        let before = self.tokens.len();
        self.tokens
            .retain(|_, issued| now.saturating_duration_since(issued.last_seen) <= idle_timeout);
        before - self.tokens.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.tokens.len()
    }
}
