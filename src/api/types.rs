use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::services::{UploadAction, UploadOutcome};

/// Flat response envelope: `{success, <payload fields>..., message?}`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(flatten)]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub const fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
        }
    }
}

/// Form rows as submitted; values are stringified before export.
#[derive(Debug, Deserialize)]
pub struct FormsRequest {
    #[serde(default)]
    pub forms: Option<FormsField>,
}

/// Key order of each form object is the column order of new headers.
pub type RawForm = IndexMap<String, serde_json::Value>;

/// Anything under `forms`; shape errors are reported by validation.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum FormsField {
    List(Vec<FormItem>),
    Other(serde_json::Value),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum FormItem {
    Object(RawForm),
    Other(serde_json::Value),
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub url: String,
    pub file_name: String,
    pub action: UploadAction,
    pub attempts: u32,
}

impl From<UploadOutcome> for UploadResponse {
    fn from(outcome: UploadOutcome) -> Self {
        Self {
            url: outcome.url,
            file_name: outcome.file_name,
            action: outcome.action,
            attempts: outcome.attempts,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: bool,
    pub uptime_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope_is_flat() {
        let body = serde_json::to_value(ApiResponse::success(UploadResponse {
            url: "https://yadi.sk/d/x".to_string(),
            file_name: "data.xlsx".to_string(),
            action: UploadAction::Updated,
            attempts: 1,
        }))
        .unwrap();

        assert_eq!(
            body,
            serde_json::json!({
                "success": true,
                "url": "https://yadi.sk/d/x",
                "file_name": "data.xlsx",
                "action": "updated",
                "attempts": 1
            })
        );
    }

    #[test]
    fn error_envelope_carries_message_only() {
        let body = serde_json::to_value(ApiResponse::<()>::error("nope")).unwrap();
        assert_eq!(body, serde_json::json!({ "success": false, "message": "nope" }));
    }
}
