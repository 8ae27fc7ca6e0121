//! Domain service for exporting form submissions to the Disk ledger.
//!
//! The ledger is one spreadsheet per identity at a fixed remote path. Each
//! export downloads it, appends the new rows and uploads it again.

use serde::Serialize;
use thiserror::Error;

use crate::db::User;
use crate::spreadsheet::{Row, SheetError};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Yandex token not available for this user")]
    MissingProviderToken,

    #[error("Failed to build spreadsheet: {0}")]
    Encode(#[from] SheetError),

    #[error("Upload failed after {attempts} attempts: {message}")]
    RetryExhausted { attempts: u32, message: String },
}

/// What happened to the remote ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadAction {
    Updated,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    pub url: String,
    pub file_name: String,
    pub action: UploadAction,
    pub attempts: u32,
}

#[async_trait::async_trait]
pub trait UploadService: Send + Sync {
    /// Appends `rows` to the identity's ledger and returns its public link.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::RetryExhausted`] once every upload attempt failed.
    async fn upload_forms(&self, user: &User, rows: Vec<Row>) -> Result<UploadOutcome, UploadError>;
}
