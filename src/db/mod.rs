use anyhow::Result;
use chrono::{DateTime, Utc};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub mod migrator;
pub mod repositories;

pub use repositories::user::{ProviderTokens, User, generate_api_key};

#[derive(Clone)]
pub struct Store {
    pub conn: DatabaseConnection,
}

impl Store {
    pub async fn new(db_url: &str) -> Result<Self> {
        Self::with_pool_options(db_url, 5, 1).await
    }

    pub async fn with_pool_options(
        db_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        use sea_orm_migration::MigratorTrait;

        if !db_url.contains(":memory:") {
            let path_str = db_url.trim_start_matches("sqlite:");
            if let Some(parent) = Path::new(path_str).parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            if !Path::new(path_str).exists() {
                std::fs::File::create(path_str)?;
            }
        }

        let mut opt = ConnectOptions::new(db_url.to_string());
        opt.max_connections(max_connections)
            .min_connections(min_connections)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(600))
            .sqlx_logging(false);

        let conn = Database::connect(opt).await?;

        migrator::Migrator::up(&conn, None).await?;

        info!(
            "Database connected & migrations applied (pool: {}-{})",
            min_connections, max_connections
        );

        Ok(Self { conn })
    }

    pub async fn ping(&self) -> Result<()> {
        let backend = self.conn.get_database_backend();
        self.conn
            .query_one(Statement::from_string(backend, "SELECT 1".to_string()))
            .await?;
        Ok(())
    }

    fn user_repo(&self) -> repositories::user::UserRepository {
        repositories::user::UserRepository::new(self.conn.clone())
    }

    pub async fn get_user(&self, id: i32) -> Result<Option<User>> {
        self.user_repo().get_by_id(id).await
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.user_repo().get_by_email(email).await
    }

    pub async fn find_user_by_api_key(&self, api_key: &str) -> Result<Option<User>> {
        self.user_repo().find_by_api_key(api_key).await
    }

    pub async fn list_users_without_api_key(&self) -> Result<Vec<User>> {
        self.user_repo().list_without_api_key().await
    }

    pub async fn upsert_oauth_identity(
        &self,
        email: &str,
        name: &str,
        tokens: &ProviderTokens,
    ) -> Result<User> {
        self.user_repo()
            .upsert_oauth_identity(email, name, tokens)
            .await
    }

    pub async fn update_provider_tokens(&self, id: i32, tokens: &ProviderTokens) -> Result<User> {
        self.user_repo().update_provider_tokens(id, tokens).await
    }

    pub async fn set_user_api_key(
        &self,
        id: i32,
        api_key: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<User> {
        self.user_repo().set_api_key(id, api_key, expires_at).await
    }

    pub async fn claim_user_api_key(
        &self,
        id: i32,
        api_key: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<User>> {
        self.user_repo()
            .claim_api_key(id, api_key, expires_at, now)
            .await
    }
}
