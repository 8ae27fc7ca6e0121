//! Domain service for identities and access control.
//!
//! Handles Yandex OAuth login, API-key authentication and issuance, and keeps
//! the stored provider token fresh.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::db::User;

/// Errors specific to authentication operations.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Yandex account not linked")]
    MissingProviderToken,

    #[error("API key already issued, next issue available after {next_allowed_at}")]
    RateLimited { next_allowed_at: DateTime<Utc> },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("OAuth error: {0}")]
    OAuth(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sea_orm::DbErr> for AuthError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// User info DTO for responses.
#[derive(Debug, Clone, Serialize)]
pub struct UserInfo {
    pub id: i32,
    pub email: String,
    pub name: String,
    pub yandex_linked: bool,
    pub api_key_expires_at: Option<DateTime<Utc>>,
    pub created_at: String,
}

impl From<&User> for UserInfo {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
            yandex_linked: user.provider_token().is_some(),
            api_key_expires_at: user.api_key_expires_at,
            created_at: user.created_at.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IssuedApiKey {
    pub email: String,
    pub api_key: String,
    pub expires_at: DateTime<Utc>,
}

/// Domain service trait for authentication.
#[async_trait::async_trait]
pub trait AuthService: Send + Sync {
    /// Resolves the identity behind an `X-API-KEY` value.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Unauthorized`] for unknown or expired keys and for
    /// identities without a Yandex token.
    async fn authenticate_api_key(&self, api_key: &str) -> Result<User, AuthError>;

    /// Resolves the session identity, or the configured fallback identity when
    /// the session carries none.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Unauthorized`] when neither is available.
    async fn resolve_session(&self, session_user: Option<i32>) -> Result<User, AuthError>;

    /// Issues a new API key, at most once per key lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::RateLimited`] while the previous key is still valid
    /// and [`AuthError::MissingProviderToken`] without linked credentials.
    async fn issue_api_key(&self, user_id: i32) -> Result<IssuedApiKey, AuthError>;

    /// Issues keys to every identity that has none yet.
    async fn issue_missing_api_keys(&self) -> Result<Vec<IssuedApiKey>, AuthError>;

    /// Issues a key to the identity with `email`, ignoring the issuance window.
    async fn issue_api_key_for_email(&self, email: &str) -> Result<IssuedApiKey, AuthError>;

    /// URL to send the browser to for Yandex login.
    fn authorize_url(&self, state: &str) -> Result<String, AuthError>;

    /// Exchanges an authorization code and stores the resulting identity.
    async fn complete_login(&self, code: &str) -> Result<User, AuthError>;

    /// Refreshes an expired provider token. On refresh failure the user is
    /// returned unchanged.
    async fn ensure_fresh_token(&self, user: User) -> User;
}
