//! Bearer tokens, credential hashing and identifier generation
//!
//! # Pure Functions
//!
//! This module contains ONLY pure functions. No HTTP framework dependencies
//! (Axum, etc.) - the header extraction lives in the server crate.

use rand::Rng;
use sha2::{Digest, Sha256};

use crate::model::{SessionId, SESSION_ID_MAX, SESSION_ID_MIN};

/// Request header carrying the account bearer token
pub const ACCOUNT_AUTH_HEADER: &str = "AccountAuthentication";

/// Request/response header carrying the session-scoped voter bearer token
pub const VOTER_AUTH_HEADER: &str = "VoterAuthentication";

// ========================================
// Bearer Tokens
// ========================================

/// Generate a new opaque bearer token
///
/// # Examples
///
/// ```
/// use crowdq_common::token::generate_token;
///
/// let a = generate_token();
/// let b = generate_token();
/// assert_eq!(a.len(), 32);
/// assert_ne!(a, b);
/// ```
pub fn generate_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Extract the token from a `Bearer <token>` header value
///
/// The scheme is matched case-insensitively. Empty tokens are rejected.
///
/// # Examples
///
/// ```
/// use crowdq_common::token::parse_bearer;
///
/// assert_eq!(parse_bearer("Bearer abc"), Some("abc"));
/// assert_eq!(parse_bearer("bearer  abc "), Some("abc"));
/// assert_eq!(parse_bearer("Bearer "), None);
/// assert_eq!(parse_bearer("Basic abc"), None);
/// ```
pub fn parse_bearer(value: &str) -> Option<&str> {
    let value = value.trim();
    let (scheme, rest) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = rest.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

// ========================================
// Password Hashing
// ========================================

/// Generate a random salt for password hashing (32 hex chars)
pub fn generate_salt() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Hash a password with its salt (SHA-256, 64 hex chars)
///
/// # Examples
///
/// ```
/// use crowdq_common::token::{hash_password, verify_password};
///
/// let hash = hash_password("gobraves", "salt");
/// assert_eq!(hash.len(), 64);
/// assert!(verify_password("gobraves", "salt", &hash));
/// assert!(!verify_password("gobraves!", "salt", &hash));
/// ```
pub fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Compare a candidate password against a stored hash
pub fn verify_password(password: &str, salt: &str, stored_hash: &str) -> bool {
    hash_password(password, salt) == stored_hash
}

// ========================================
// Session Identifiers
// ========================================

/// Draw a random six-digit session id
pub fn generate_session_id() -> SessionId {
    rand::thread_rng().gen_range(SESSION_ID_MIN..=SESSION_ID_MAX)
}
