//! Session, queue and search endpoints

use axum::{
    extract::{Path, Query, State},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crowdq_common::{SessionId, SessionSnapshot, SimpleSong, SongUpdate};

use super::error::ApiResult;
use super::identity::with_issued_token;
use crate::registry::{Credentials, VoterView};
use crate::AppState;

/// Body of requests that only name a session
#[derive(Debug, Deserialize)]
pub struct SessionRequest {
    #[serde(rename = "sessionID")]
    pub session_id: SessionId,
}

/// Body of `updateQueue`
#[derive(Debug, Deserialize)]
pub struct UpdateQueueRequest {
    #[serde(rename = "sessionID")]
    pub session_id: SessionId,
    pub song: SongUpdate,
}

/// `musicSearch` query string
#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(rename = "sessionID")]
    pub session_id: SessionId,
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub active_session: SessionId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateQueueResponse {
    pub number_of_voters: usize,
}

/// POST /createSession
pub async fn create_session(State(state): State<AppState>, credentials: Credentials) -> ApiResult<Response> {
    let caller = state.identity.resolve(&credentials).await?;
    let outcome = state.sessions.create_session(&caller).await;
    let session_id = state.identity.settle(&caller, outcome).await?;
    Ok(with_issued_token(
        &caller,
        Json(CreateSessionResponse {
            active_session: session_id,
        }),
    ))
}

/// POST /endSession
pub async fn end_session(
    State(state): State<AppState>,
    credentials: Credentials,
    Json(request): Json<SessionRequest>,
) -> ApiResult<Json<SessionSnapshot>> {
    let caller = state.identity.resolve_without_issuing(&credentials).await?;
    let snapshot = state.sessions.end_session(request.session_id, &caller).await?;
    Ok(Json(snapshot.as_ref().clone()))
}

/// POST /updateQueue
pub async fn update_queue(
    State(state): State<AppState>,
    credentials: Credentials,
    Json(request): Json<UpdateQueueRequest>,
) -> ApiResult<Response> {
    let caller = state.identity.resolve(&credentials).await?;
    let outcome = state
        .sessions
        .update_queue(request.session_id, &caller, &request.song)
        .await;
    let snapshot = state.identity.settle(&caller, outcome).await?;
    Ok(with_issued_token(
        &caller,
        Json(UpdateQueueResponse {
            number_of_voters: snapshot.number_of_voters,
        }),
    ))
}

/// POST /advanceQueue
pub async fn advance_queue(
    State(state): State<AppState>,
    credentials: Credentials,
    Json(request): Json<SessionRequest>,
) -> ApiResult<Json<SessionSnapshot>> {
    let caller = state.identity.resolve_without_issuing(&credentials).await?;
    let snapshot = state.sessions.advance_queue(request.session_id, &caller).await?;
    Ok(Json(snapshot.as_ref().clone()))
}

/// GET /voter/:sessionID
pub async fn get_voter(
    State(state): State<AppState>,
    credentials: Credentials,
    Path(session_id): Path<SessionId>,
) -> ApiResult<Response> {
    let caller = state.identity.resolve(&credentials).await?;
    let outcome = state.sessions.voter(session_id, &caller).await;
    let voter: VoterView = state.identity.settle(&caller, outcome).await?;
    Ok(with_issued_token(&caller, Json(voter)))
}

/// GET /musicSearch?sessionID=&query=
pub async fn music_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<Vec<SimpleSong>>> {
    let songs = state
        .sessions
        .search(params.session_id, &params.query, state.catalog.as_ref())
        .await?;
    Ok(Json(songs))
}

/// GET /sessionState/:sessionID
pub async fn session_state(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> ApiResult<Json<SessionSnapshot>> {
    let snapshot = state.sessions.session_state(session_id).await?;
    Ok(Json(snapshot.as_ref().clone()))
}

/// Build session routes
pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/createSession", post(create_session))
        .route("/endSession", post(end_session))
        .route("/updateQueue", post(update_queue))
        .route("/advanceQueue", post(advance_queue))
        .route("/voter/:sessionID", get(get_voter))
        .route("/musicSearch", get(music_search))
        .route("/sessionState/:sessionID", get(session_state))
        .route(
            "/subscribeSessionState/:sessionID",
            get(super::sse::subscribe_session_state),
        )
}
