use std::sync::Arc;
use tokio::sync::RwLock;

use crate::clients::{RemoteStorage, YandexDiskClient, YandexOAuthClient};
use crate::config::Config;
use crate::db::Store;
use crate::services::{
    AuthService, DiskUploadService, SeaOrmAuthService, Sleeper, TokioSleeper, UploadService,
};

/// Build a shared HTTP client for Yandex API calls.
/// Reused by the Disk and OAuth clients so connections are pooled.
fn build_shared_http_client(timeout_seconds: u64) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_seconds))
        .user_agent(concat!("diskform/", env!("CARGO_PKG_VERSION")))
        .pool_max_idle_per_host(10)
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build shared HTTP client: {e}"))
}

#[derive(Clone)]
pub struct SharedState {
    pub config: Arc<RwLock<Config>>,

    pub store: Store,

    pub upload_service: Arc<dyn UploadService>,

    pub auth_service: Arc<dyn AuthService>,
}

impl SharedState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let http_client = build_shared_http_client(config.yandex.request_timeout_seconds)?;
        let storage = Arc::new(YandexDiskClient::with_shared_client(
            http_client.clone(),
            &config.yandex,
        )) as Arc<dyn RemoteStorage>;

        Self::with_storage(config, http_client, storage, Arc::new(TokioSleeper)).await
    }

    /// Builds the state around a given storage backend and retry sleeper.
    pub async fn with_storage(
        config: Config,
        http_client: reqwest::Client,
        storage: Arc<dyn RemoteStorage>,
        sleeper: Arc<dyn Sleeper>,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        let store = Store::with_pool_options(
            &config.general.database_path,
            config.general.max_db_connections,
            config.general.min_db_connections,
        )
        .await?;

        let oauth = YandexOAuthClient::with_shared_client(http_client, config.yandex.clone());

        let upload_service = Arc::new(DiskUploadService::new(
            storage,
            sleeper,
            config.upload.clone(),
        )) as Arc<dyn UploadService>;

        let auth_service = Arc::new(SeaOrmAuthService::new(
            store.clone(),
            oauth,
            chrono::Duration::days(config.security.api_key_ttl_days),
            config.upload.fallback_identity_email.clone(),
        )) as Arc<dyn AuthService>;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            store,
            upload_service,
            auth_service,
        })
    }

    pub async fn config(&self) -> Config {
        self.config.read().await.clone()
    }
}
