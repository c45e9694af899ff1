//! Server-Sent Events stream of session snapshots

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, warn};

use crowdq_common::SessionId;

use super::error::ApiResult;
use crate::AppState;

/// SSE event name carrying a snapshot
pub const SESSION_STATE_EVENT: &str = "sessionState";

/// GET /subscribeSessionState/:sessionID
///
/// First event is the current snapshot. The stream closes after the
/// terminal (ENDED) snapshot.
pub async fn subscribe_session_state(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let snapshots = state.sessions.subscribe(session_id).await?;
    debug!("New SSE subscriber for session {}", session_id);

    let stream = snapshots.filter_map(|snapshot| async move {
        match Event::default()
            .event(SESSION_STATE_EVENT)
            .id(snapshot.version.to_string())
            .json_data(&*snapshot)
        {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                warn!("Failed to serialize snapshot: {}", e);
                None
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}
