use axum::{
    Json,
    extract::{FromRequest, Multipart, Request, State, rejection::JsonRejection},
    http::{HeaderMap, header::CONTENT_TYPE},
};
use std::sync::Arc;
use tower_sessions::Session;
use tracing::info;

use super::auth::{api_identity, session_identity};
use super::validation::{parse_forms_text, validate_forms};
use super::{ApiError, ApiResponse, AppState, FormsRequest, UploadResponse};
use crate::db::User;
use crate::spreadsheet::{self, Row};

/// POST /api/upload
/// Append JSON forms to the caller's ledger. Auth by `X-API-KEY` or session.
pub async fn upload_forms(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    session: Session,
    body: Result<Json<FormsRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<UploadResponse>>, ApiError> {
    let user = api_identity(&state, &headers, &session).await?;

    let Json(body) = body.map_err(|e| ApiError::validation(e.body_text()))?;
    let rows = validate_forms(body.forms)?;

    export(&state, &user, rows).await
}

/// POST /upload-to-yandex
/// Append forms from the web app: JSON `forms`, or multipart with an
/// `.xlsx` `file` part and/or a `forms` text part.
pub async fn upload_to_yandex(
    State(state): State<Arc<AppState>>,
    session: Session,
    headers: HeaderMap,
    request: Request,
) -> Result<Json<ApiResponse<UploadResponse>>, ApiError> {
    let user = session_identity(&state, &session).await?;

    let is_multipart = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"));

    let rows = if is_multipart {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| ApiError::validation(e.body_text()))?;
        rows_from_multipart(multipart).await?
    } else {
        let Json(body) = Json::<FormsRequest>::from_request(request, &state)
            .await
            .map_err(|e| ApiError::validation(e.body_text()))?;
        validate_forms(body.forms)?
    };

    export(&state, &user, rows).await
}

async fn export(
    state: &AppState,
    user: &User,
    rows: Vec<Row>,
) -> Result<Json<ApiResponse<UploadResponse>>, ApiError> {
    info!(user_id = user.id, rows = rows.len(), "Exporting forms to Yandex Disk");

    let outcome = state.shared.upload_service.upload_forms(user, rows).await?;

    Ok(Json(ApiResponse::success(outcome.into())))
}

async fn rows_from_multipart(mut multipart: Multipart) -> Result<Vec<Row>, ApiError> {
    let mut rows = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::validation(format!("Invalid multipart body: {e}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let is_xlsx = field
                    .file_name()
                    .is_some_and(|name| name.to_ascii_lowercase().ends_with(".xlsx"));
                if !is_xlsx {
                    return Err(ApiError::validation("The file must be an .xlsx spreadsheet."));
                }

                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::validation(format!("Failed to read file: {e}")))?;
                let sheet = spreadsheet::decode_cells(&bytes)
                    .map_err(|e| ApiError::validation(format!("Unreadable spreadsheet: {e}")))?;

                rows.extend(
                    sheet
                        .rows
                        .into_iter()
                        .filter(|row| row.values().any(|value| !value.is_empty())),
                );
            }
            Some("forms") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::validation(format!("Failed to read forms: {e}")))?;
                rows.extend(parse_forms_text(&text)?);
            }
            _ => {}
        }
    }

    if rows.is_empty() {
        return Err(ApiError::validation(
            "Provide a forms array or an .xlsx file with at least one row.",
        ));
    }

    Ok(rows)
}
