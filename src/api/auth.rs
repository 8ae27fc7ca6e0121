use axum::{
    Json,
    extract::{Query, State},
    http::HeaderMap,
    response::{IntoResponse, Redirect},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_sessions::Session;
use tracing::{info, warn};

use super::{ApiError, ApiResponse, AppState};
use crate::db::User;
use crate::services::UserInfo;

const SESSION_USER_KEY: &str = "user_id";
const SESSION_OAUTH_STATE_KEY: &str = "oauth_state";
const API_KEY_HEADER: &str = "X-API-KEY";

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct ApiKeyResponse {
    pub api_key: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

// ============================================================================
// Identity resolution
// ============================================================================

/// Identity for the JSON API: `X-API-KEY` when the header is present,
/// otherwise the session (or fallback) identity. Both need a Yandex token.
pub async fn api_identity(
    state: &AppState,
    headers: &HeaderMap,
    session: &Session,
) -> Result<User, ApiError> {
    let auth = &state.shared.auth_service;

    let user = if let Some(key) = extract_api_key(headers) {
        auth.authenticate_api_key(&key).await.map_err(|_| {
            ApiError::unauthorized("Invalid API key or Yandex token not available for this user.")
        })?
    } else {
        let session_user = session_user_id(session).await?;
        let user = auth.resolve_session(session_user).await?;
        if user.provider_token().is_none() {
            return Err(ApiError::unauthorized(
                "Yandex token not available. Please reauthenticate.",
            ));
        }
        user
    };

    tracing::Span::current().record("user_id", user.id);
    Ok(auth.ensure_fresh_token(user).await)
}

/// Identity for the browser endpoint: session (or fallback) only.
/// A missing Yandex token is a 403 here.
pub async fn session_identity(state: &AppState, session: &Session) -> Result<User, ApiError> {
    let auth = &state.shared.auth_service;
    let session_user = session_user_id(session).await?;
    let user = auth.resolve_session(session_user).await?;

    if user.provider_token().is_none() {
        return Err(ApiError::Forbidden(
            "Yandex token not available. Please re-authenticate with Yandex.".to_string(),
        ));
    }

    tracing::Span::current().record("user_id", user.id);
    Ok(auth.ensure_fresh_token(user).await)
}

fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|key| key.trim().to_string())
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /auth/yandex
/// Start the Yandex authorization-code flow
pub async fn yandex_redirect(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Redirect, ApiError> {
    let csrf_state = uuid::Uuid::new_v4().to_string();
    session
        .insert(SESSION_OAUTH_STATE_KEY, &csrf_state)
        .await
        .map_err(|e| ApiError::internal(format!("Session error: {e}")))?;

    let url = state.shared.auth_service.authorize_url(&csrf_state)?;
    Ok(Redirect::to(&url))
}

/// GET /auth/yandex/callback
/// Finish the Yandex login and start a session
pub async fn yandex_callback(
    State(state): State<Arc<AppState>>,
    session: Session,
    Query(query): Query<CallbackQuery>,
) -> Result<Redirect, ApiError> {
    if let Some(error) = query.error {
        warn!(%error, "Yandex authorization denied");
        return Err(ApiError::unauthorized(format!(
            "Yandex authorization failed: {error}"
        )));
    }

    let expected = session
        .remove::<String>(SESSION_OAUTH_STATE_KEY)
        .await
        .map_err(|e| ApiError::internal(format!("Session error: {e}")))?;
    if expected.is_none() || expected != query.state {
        return Err(ApiError::validation("Invalid OAuth state"));
    }

    let code = query
        .code
        .ok_or_else(|| ApiError::validation("Missing authorization code"))?;

    let user = state.shared.auth_service.complete_login(&code).await?;

    session
        .cycle_id()
        .await
        .map_err(|e| ApiError::internal(format!("Session error: {e}")))?;
    session
        .insert(SESSION_USER_KEY, user.id)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to create session: {e}")))?;

    info!(user_id = user.id, "Session started");
    Ok(Redirect::to("/"))
}

/// POST /auth/logout
/// Invalidate the current session
pub async fn logout(session: Session) -> impl IntoResponse {
    let _ = session.flush().await;
    Json(ApiResponse::success(MessageResponse {
        message: "Logged out".to_string(),
    }))
}

/// GET /api/auth/me
/// Current session user
pub async fn get_current_user(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Json<ApiResponse<UserInfo>>, ApiError> {
    let user_id = require_session_user(&session).await?;

    let user = state
        .store()
        .get_user(user_id)
        .await
        .map_err(|e| ApiError::DatabaseError(e.to_string()))?
        .ok_or_else(|| ApiError::unauthorized("User not found"))?;

    Ok(Json(ApiResponse::success(UserInfo::from(&user))))
}

/// POST /api/auth/api-key
/// Issue an API key, at most once per key lifetime
pub async fn issue_api_key(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Json<ApiResponse<ApiKeyResponse>>, ApiError> {
    let user_id = require_session_user(&session).await?;

    let issued = state.shared.auth_service.issue_api_key(user_id).await?;

    Ok(Json(ApiResponse::success(ApiKeyResponse {
        api_key: issued.api_key,
        expires_at: issued.expires_at,
    })))
}

// ============================================================================
// Helpers
// ============================================================================

async fn session_user_id(session: &Session) -> Result<Option<i32>, ApiError> {
    session
        .get::<i32>(SESSION_USER_KEY)
        .await
        .map_err(|e| ApiError::internal(format!("Session error: {e}")))
}

/// Get the user id from the session, returns error if not authenticated
async fn require_session_user(session: &Session) -> Result<i32, ApiError> {
    session_user_id(session)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Not authenticated"))
}
