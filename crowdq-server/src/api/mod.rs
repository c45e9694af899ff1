//! HTTP API handlers for crowdq-server

pub mod account;
pub mod error;
pub mod health;
pub mod identity;
pub mod session;
pub mod sse;

pub use account::account_routes;
pub use error::{ApiError, ApiResult};
pub use health::health_routes;
pub use session::session_routes;
pub use sse::subscribe_session_state;
