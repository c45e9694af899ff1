//! Account and voter token endpoints

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crowdq_common::SessionId;

use super::error::ApiResult;
use crate::accounts::{AccountId, AccountLogin, NewAccount};
use crate::registry::Credentials;
use crate::AppState;

/// Bearer token response (`login`, `createAccount`, `voterToken`)
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

/// Body of `deleteAccount`
#[derive(Debug, Deserialize)]
pub struct DeleteAccountRequest {
    #[serde(rename = "accountID")]
    pub account_id: AccountId,
}

/// `account` query response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub id: AccountId,
    pub first_name: String,
    pub active_session: Option<SessionId>,
}

/// POST /login
pub async fn login(State(state): State<AppState>, Json(login): Json<AccountLogin>) -> ApiResult<Json<TokenResponse>> {
    let token = state.accounts.login(&login).await?;
    Ok(Json(TokenResponse { token }))
}

/// POST /createAccount
pub async fn create_account(
    State(state): State<AppState>,
    Json(new_account): Json<NewAccount>,
) -> ApiResult<Json<TokenResponse>> {
    let token = state.accounts.create_account(new_account).await?;
    Ok(Json(TokenResponse { token }))
}

/// POST /deleteAccount
pub async fn delete_account(
    State(state): State<AppState>,
    credentials: Credentials,
    Json(request): Json<DeleteAccountRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let requester = state.identity.require_account(&credentials).await?;
    state.accounts.delete_account(&requester, request.account_id).await?;
    info!("Account {} deleted", request.account_id);
    Ok(Json(serde_json::json!({ "accountID": request.account_id })))
}

/// GET /account
pub async fn get_account(State(state): State<AppState>, credentials: Credentials) -> ApiResult<Json<AccountView>> {
    let account = state.identity.require_account(&credentials).await?;
    Ok(Json(AccountView {
        id: account.id,
        first_name: account.first_name,
        active_session: account.active_session,
    }))
}

/// GET /voterToken
pub async fn voter_token(State(state): State<AppState>) -> Json<TokenResponse> {
    Json(TokenResponse {
        token: state.identity.issue_voter_token().await,
    })
}

/// Build account routes
pub fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/createAccount", post(create_account))
        .route("/deleteAccount", post(delete_account))
        .route("/account", get(get_account))
        .route("/voterToken", get(voter_token))
}
