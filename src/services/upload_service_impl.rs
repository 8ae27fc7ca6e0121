//! Disk-backed implementation of the `UploadService` trait.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{Instrument, info, info_span, warn};

use crate::clients::{DiskError, RemoteStorage};
use crate::config::UploadConfig;
use crate::db::User;
use crate::services::retry::{RetryOutcome, RetryPolicy, Sleeper};
use crate::services::upload_service::{UploadAction, UploadError, UploadOutcome, UploadService};
use crate::spreadsheet::{self, Row, Sheet};

pub struct DiskUploadService {
    storage: Arc<dyn RemoteStorage>,
    sleeper: Arc<dyn Sleeper>,
    config: UploadConfig,
    policy: RetryPolicy,
    /// Serializes exports per identity so concurrent requests cannot
    /// overwrite each other's appended rows.
    locks: Mutex<HashMap<i32, Arc<Mutex<()>>>>,
}

impl DiskUploadService {
    #[must_use]
    pub fn new(
        storage: Arc<dyn RemoteStorage>,
        sleeper: Arc<dyn Sleeper>,
        config: UploadConfig,
    ) -> Self {
        let policy = RetryPolicy::new(config.max_attempts, config.retry_delay());
        Self {
            storage,
            sleeper,
            config,
            policy,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn identity_lock(&self, user_id: i32) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(user_id).or_default().clone()
    }

    /// Drops the identity's entry once no other request holds or waits on it.
    async fn release_identity_lock(&self, user_id: i32, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        // One reference in the map, one here
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(&user_id);
        }
    }

    /// Current ledger contents, or an empty sheet when none can be read.
    async fn load_existing(&self, token: &str, remote_path: &str) -> Sheet {
        let err = match self.download_sheet(token, remote_path).await {
            Ok(sheet) => {
                info!(rows = sheet.rows.len(), "Loaded existing ledger");
                return sheet;
            }
            Err(e) => e,
        };

        let not_found = err
            .downcast_ref::<DiskError>()
            .is_some_and(DiskError::is_not_found);
        if not_found {
            info!("No existing ledger, starting a new one");
            return Sheet::default();
        }

        info!(error = %err, "Failed to read existing ledger, trying its public link");
        match self.download_public_sheet(token, remote_path).await {
            Ok(Some(sheet)) => {
                info!(rows = sheet.rows.len(), "Loaded existing ledger via public link");
                sheet
            }
            Ok(None) => Sheet::default(),
            Err(e) => {
                info!(error = %e, "Public link download failed, starting a new ledger");
                Sheet::default()
            }
        }
    }

    async fn download_sheet(&self, token: &str, remote_path: &str) -> Result<Sheet> {
        let bytes = self.storage.download(token, remote_path).await?;
        Ok(spreadsheet::decode(&bytes)?)
    }

    async fn download_public_sheet(&self, token: &str, remote_path: &str) -> Result<Option<Sheet>> {
        let Some(public_url) = self.storage.public_url(token, remote_path).await? else {
            return Ok(None);
        };
        let bytes = self.storage.download_public(&public_url).await?;
        Ok(Some(spreadsheet::decode(&bytes)?))
    }

    /// One pass of directory -> upload link -> bytes -> publish.
    async fn push(
        &self,
        token: &str,
        remote_path: &str,
        bytes: &[u8],
    ) -> Result<String, DiskError> {
        self.storage
            .ensure_directory(token, &self.config.remote_dir)
            .await?;
        let upload_url = self.storage.get_upload_url(token, remote_path, true).await?;
        self.storage.upload_bytes(token, &upload_url, bytes).await?;
        self.storage.publish(token, remote_path).await
    }

    /// Merge and push under the identity lock.
    async fn export(
        &self,
        token: &str,
        remote_path: &str,
        rows: Vec<Row>,
    ) -> Result<UploadOutcome, UploadError> {
        let mut sheet = self.load_existing(token, remote_path).await;
        let incoming = rows.len();
        sheet.merge(rows);
        info!(
            incoming,
            total_rows = sheet.rows.len(),
            columns = sheet.headers.len(),
            "Merged form rows into ledger"
        );

        // In-memory only; dropped on every return path
        let bytes = spreadsheet::encode(&sheet)?;

        let outcome = self
            .policy
            .run(self.sleeper.as_ref(), |attempt| {
                let bytes = bytes.as_slice();
                async move {
                    info!(attempt, size = bytes.len(), "Uploading ledger");
                    let result = self.push(token, remote_path, bytes).await;
                    let outcome = if result.is_ok() { "success" } else { "failure" };
                    metrics::counter!("disk_upload_attempts_total", "outcome" => outcome)
                        .increment(1);
                    result
                }
            })
            .await;

        // Publishing again is harmless and covers a failed final attempt
        if let Err(e) = self.storage.publish(token, remote_path).await {
            warn!(error = %e, "Failed to publish ledger");
        }

        match outcome {
            RetryOutcome::Succeeded { value, attempts } => {
                metrics::counter!("disk_uploads_total", "outcome" => "success").increment(1);
                info!(attempts, url = %value, "Ledger uploaded");
                Ok(UploadOutcome {
                    url: value,
                    file_name: self.config.file_name.clone(),
                    action: UploadAction::Updated,
                    attempts,
                })
            }
            RetryOutcome::Failed {
                last_error,
                attempts,
            } => {
                metrics::counter!("disk_uploads_total", "outcome" => "failure").increment(1);
                tracing::error!(attempts, error = %last_error, "Ledger upload failed after all attempts");
                Err(UploadError::RetryExhausted {
                    attempts,
                    message: last_error,
                })
            }
        }
    }
}

#[async_trait]
impl UploadService for DiskUploadService {
    async fn upload_forms(&self, user: &User, rows: Vec<Row>) -> Result<UploadOutcome, UploadError> {
        let token = user
            .provider_token()
            .ok_or(UploadError::MissingProviderToken)?;
        let remote_path = self.config.remote_path();
        let span = info_span!("ledger_upload", user_id = user.id, remote_path = %remote_path);

        async move {
            let lock = self.identity_lock(user.id).await;
            let result = {
                let _guard = lock.lock().await;
                self.export(token, &remote_path, rows).await
            };
            self.release_identity_lock(user.id, lock).await;
            result
        }
        .instrument(span)
        .await
    }
}
