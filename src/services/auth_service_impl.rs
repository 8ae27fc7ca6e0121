//! `SeaORM` implementation of the `AuthService` trait.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::{info, warn};

use crate::clients::YandexOAuthClient;
use crate::db::{Store, User, generate_api_key};
use crate::services::auth_service::{AuthError, AuthService, IssuedApiKey};

pub struct SeaOrmAuthService {
    store: Store,
    oauth: YandexOAuthClient,
    api_key_ttl: Duration,
    fallback_identity_email: Option<String>,
}

impl SeaOrmAuthService {
    #[must_use]
    pub const fn new(
        store: Store,
        oauth: YandexOAuthClient,
        api_key_ttl: Duration,
        fallback_identity_email: Option<String>,
    ) -> Self {
        Self {
            store,
            oauth,
            api_key_ttl,
            fallback_identity_email,
        }
    }

    async fn store_new_key(&self, user: &User) -> Result<IssuedApiKey, AuthError> {
        let api_key = generate_api_key();
        let expires_at = Utc::now() + self.api_key_ttl;

        let user = self
            .store
            .set_user_api_key(user.id, &api_key, expires_at)
            .await?;

        info!(user_id = user.id, %expires_at, "API key issued");

        Ok(IssuedApiKey {
            email: user.email,
            api_key,
            expires_at,
        })
    }
}

/// Expiry of the user's current key while it is still valid.
fn active_key_expiry(user: &User) -> Option<chrono::DateTime<Utc>> {
    user.api_key.as_ref()?;
    user.api_key_expires_at.filter(|expires_at| *expires_at > Utc::now())
}

#[async_trait]
impl AuthService for SeaOrmAuthService {
    async fn authenticate_api_key(&self, api_key: &str) -> Result<User, AuthError> {
        if api_key.trim().is_empty() {
            return Err(AuthError::Unauthorized);
        }

        let user = self
            .store
            .find_user_by_api_key(api_key)
            .await?
            .ok_or(AuthError::Unauthorized)?;

        if user.api_key_expired(Utc::now()) {
            info!(user_id = user.id, "Rejected expired API key");
            return Err(AuthError::Unauthorized);
        }

        if user.provider_token().is_none() {
            info!(user_id = user.id, "Rejected API key without linked Yandex account");
            return Err(AuthError::Unauthorized);
        }

        Ok(user)
    }

    async fn resolve_session(&self, session_user: Option<i32>) -> Result<User, AuthError> {
        if let Some(id) = session_user
            && let Some(user) = self.store.get_user(id).await?
        {
            return Ok(user);
        }

        let Some(email) = self.fallback_identity_email.as_deref() else {
            return Err(AuthError::Unauthorized);
        };

        self.store
            .get_user_by_email(email)
            .await?
            .ok_or(AuthError::Unauthorized)
    }

    async fn issue_api_key(&self, user_id: i32) -> Result<IssuedApiKey, AuthError> {
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or(AuthError::Unauthorized)?;

        if user.provider_token().is_none() {
            return Err(AuthError::MissingProviderToken);
        }

        // A key's expiry marks the end of the window it was issued in
        if let Some(next_allowed_at) = active_key_expiry(&user) {
            return Err(AuthError::RateLimited { next_allowed_at });
        }

        let api_key = generate_api_key();
        let now = Utc::now();
        let expires_at = now + self.api_key_ttl;

        let Some(user) = self
            .store
            .claim_user_api_key(user.id, &api_key, expires_at, now)
            .await?
        else {
            // Another request issued a key since the check above
            let current = self
                .store
                .get_user(user_id)
                .await?
                .ok_or(AuthError::Unauthorized)?;
            let next_allowed_at = active_key_expiry(&current).unwrap_or(expires_at);
            return Err(AuthError::RateLimited { next_allowed_at });
        };

        info!(user_id = user.id, %expires_at, "API key issued");

        Ok(IssuedApiKey {
            email: user.email,
            api_key,
            expires_at,
        })
    }

    async fn issue_missing_api_keys(&self) -> Result<Vec<IssuedApiKey>, AuthError> {
        let users = self.store.list_users_without_api_key().await?;
        let mut issued = Vec::with_capacity(users.len());
        for user in &users {
            issued.push(self.store_new_key(user).await?);
        }
        Ok(issued)
    }

    async fn issue_api_key_for_email(&self, email: &str) -> Result<IssuedApiKey, AuthError> {
        let user = self
            .store
            .get_user_by_email(email)
            .await?
            .ok_or_else(|| AuthError::Validation(format!("No user with email {email}")))?;

        self.store_new_key(&user).await
    }

    fn authorize_url(&self, state: &str) -> Result<String, AuthError> {
        self.oauth
            .authorize_url(state)
            .map_err(|e| AuthError::OAuth(e.to_string()))
    }

    async fn complete_login(&self, code: &str) -> Result<User, AuthError> {
        if code.trim().is_empty() {
            return Err(AuthError::Validation("Missing authorization code".to_string()));
        }

        let tokens = self
            .oauth
            .exchange_code(code)
            .await
            .map_err(|e| AuthError::OAuth(e.to_string()))?;

        let profile = self
            .oauth
            .fetch_profile(&tokens.access_token)
            .await
            .map_err(|e| AuthError::OAuth(e.to_string()))?;

        let user = self
            .store
            .upsert_oauth_identity(&profile.email(), &profile.name(), &tokens)
            .await?;

        info!(user_id = user.id, email = %user.email, "Yandex login completed");
        Ok(user)
    }

    async fn ensure_fresh_token(&self, user: User) -> User {
        if !user.provider_token_expired(Utc::now()) {
            return user;
        }

        let Some(refresh_token) = user.yandex_refresh_token.as_deref() else {
            warn!(user_id = user.id, "Yandex token expired and no refresh token stored");
            return user;
        };

        let tokens = match self.oauth.refresh(refresh_token).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(user_id = user.id, error = %e, "Failed to refresh Yandex token");
                return user;
            }
        };

        match self.store.update_provider_tokens(user.id, &tokens).await {
            Ok(updated) => {
                info!(user_id = updated.id, "Yandex token refreshed");
                updated
            }
            Err(e) => {
                warn!(user_id = user.id, error = %e, "Failed to store refreshed Yandex token");
                user
            }
        }
    }
}
