use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, sea_query::Expr,
};

use crate::entities::users;

/// Provider credentials obtained from the OAuth code or refresh exchange.
#[derive(Debug, Clone)]
pub struct ProviderTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// User data returned from repository
#[derive(Debug, Clone)]
pub struct User {
    pub id: i32,
    pub email: String,
    pub name: String,
    pub yandex_token: Option<String>,
    pub yandex_refresh_token: Option<String>,
    pub yandex_token_expires_at: Option<DateTime<Utc>>,
    pub api_key: Option<String>,
    pub api_key_expires_at: Option<DateTime<Utc>>,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    /// The stored access token, if one exists and is not blank.
    #[must_use]
    pub fn provider_token(&self) -> Option<&str> {
        self.yandex_token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
    }

    #[must_use]
    pub fn api_key_expired(&self, now: DateTime<Utc>) -> bool {
        self.api_key_expires_at.is_some_and(|expires| expires <= now)
    }

    #[must_use]
    pub fn provider_token_expired(&self, now: DateTime<Utc>) -> bool {
        self.yandex_token_expires_at
            .is_some_and(|expires| expires <= now)
    }
}

fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|parsed| parsed.with_timezone(&Utc))
}

impl From<users::Model> for User {
    fn from(model: users::Model) -> Self {
        Self {
            id: model.id,
            yandex_token_expires_at: parse_timestamp(model.yandex_token_expires_at.as_deref()),
            api_key_expires_at: parse_timestamp(model.api_key_expires_at.as_deref()),
            email: model.email,
            name: model.name,
            yandex_token: model.yandex_token,
            yandex_refresh_token: model.yandex_refresh_token,
            api_key: model.api_key,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

pub struct UserRepository {
    conn: DatabaseConnection,
}

impl UserRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Get user by ID
    pub async fn get_by_id(&self, id: i32) -> Result<Option<User>> {
        let user = users::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query user by ID")?;

        Ok(user.map(User::from))
    }

    /// Get user by email
    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = users::Entity::find()
            .filter(users::Column::Email.eq(email))
            .one(&self.conn)
            .await
            .context("Failed to query user by email")?;

        Ok(user.map(User::from))
    }

    /// Look up the owner of an issued API key. Expiry is not checked here.
    pub async fn find_by_api_key(&self, api_key: &str) -> Result<Option<User>> {
        let user = users::Entity::find()
            .filter(users::Column::ApiKey.eq(api_key))
            .one(&self.conn)
            .await
            .context("Failed to query user by API key")?;

        Ok(user.map(User::from))
    }

    /// Users that have never been issued a key, oldest first
    pub async fn list_without_api_key(&self) -> Result<Vec<User>> {
        let rows = users::Entity::find()
            .filter(users::Column::ApiKey.is_null())
            .order_by_asc(users::Column::Id)
            .all(&self.conn)
            .await
            .context("Failed to list users without API key")?;

        Ok(rows.into_iter().map(User::from).collect())
    }

    /// Find the user by email or create it, then store the provider tokens.
    ///
    /// The display name is only written on creation.
    pub async fn upsert_oauth_identity(
        &self,
        email: &str,
        name: &str,
        tokens: &ProviderTokens,
    ) -> Result<User> {
        let existing = users::Entity::find()
            .filter(users::Column::Email.eq(email))
            .one(&self.conn)
            .await
            .context("Failed to query user for OAuth login")?;

        let now = Utc::now().to_rfc3339();

        let model = match existing {
            Some(user) => {
                let mut active: users::ActiveModel = user.into();
                apply_tokens(&mut active, tokens);
                active.updated_at = Set(now);
                active.update(&self.conn).await?
            }
            None => {
                let mut active = users::ActiveModel {
                    email: Set(email.to_string()),
                    name: Set(name.to_string()),
                    api_key: Set(None),
                    api_key_expires_at: Set(None),
                    yandex_refresh_token: Set(None),
                    created_at: Set(now.clone()),
                    updated_at: Set(now),
                    ..Default::default()
                };
                apply_tokens(&mut active, tokens);
                active
                    .insert(&self.conn)
                    .await
                    .context("Failed to create user")?
            }
        };

        Ok(User::from(model))
    }

    /// Replace stored provider tokens after a refresh exchange
    pub async fn update_provider_tokens(&self, id: i32, tokens: &ProviderTokens) -> Result<User> {
        let user = users::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query user for token update")?
            .ok_or_else(|| anyhow::anyhow!("User not found: {id}"))?;

        let mut active: users::ActiveModel = user.into();
        apply_tokens(&mut active, tokens);
        active.updated_at = Set(Utc::now().to_rfc3339());
        let model = active.update(&self.conn).await?;

        Ok(User::from(model))
    }

    /// Store a freshly issued API key with its expiry
    pub async fn set_api_key(
        &self,
        id: i32,
        api_key: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<User> {
        let user = users::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query user for API key issuance")?
            .ok_or_else(|| anyhow::anyhow!("User not found: {id}"))?;

        let mut active: users::ActiveModel = user.into();
        active.api_key = Set(Some(api_key.to_string()));
        active.api_key_expires_at = Set(Some(expires_at.to_rfc3339()));
        active.updated_at = Set(Utc::now().to_rfc3339());
        let model = active.update(&self.conn).await?;

        Ok(User::from(model))
    }

    /// Store a new API key only if the user has no unexpired one.
    ///
    /// The check and the write are one `UPDATE`, so concurrent issuers cannot
    /// both succeed. Returns `None` when the current key is still valid.
    pub async fn claim_api_key(
        &self,
        id: i32,
        api_key: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<User>> {
        let result = users::Entity::update_many()
            .col_expr(users::Column::ApiKey, Expr::value(api_key))
            .col_expr(
                users::Column::ApiKeyExpiresAt,
                Expr::value(expires_at.to_rfc3339()),
            )
            .col_expr(users::Column::UpdatedAt, Expr::value(now.to_rfc3339()))
            .filter(users::Column::Id.eq(id))
            .filter(
                Condition::any()
                    .add(users::Column::ApiKey.is_null())
                    .add(users::Column::ApiKeyExpiresAt.is_null())
                    .add(users::Column::ApiKeyExpiresAt.lte(now.to_rfc3339())),
            )
            .exec(&self.conn)
            .await
            .context("Failed to store API key")?;

        if result.rows_affected == 0 {
            return Ok(None);
        }

        self.get_by_id(id).await
    }
}

fn apply_tokens(active: &mut users::ActiveModel, tokens: &ProviderTokens) {
    active.yandex_token = Set(Some(tokens.access_token.clone()));
    active.yandex_token_expires_at = Set(tokens.expires_at.map(|at| at.to_rfc3339()));
    // Yandex omits the refresh token on some refresh responses; keep the old one
    if let Some(refresh) = &tokens.refresh_token {
        active.yandex_refresh_token = Set(Some(refresh.clone()));
    }
}

/// Generate a random API key (64 character hex string)
#[must_use]
pub fn generate_api_key() -> String {
    use rand::Rng;

    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();

    bytes.iter().fold(String::with_capacity(64), |mut acc, b| {
        use std::fmt::Write;
        let _ = write!(acc, "{b:02x}");
        acc
    })
}
