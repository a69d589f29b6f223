use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::model::{PageRequest, PaginatedResult, ProcessedFileEntry, ProcessingErrorEntry};
use crate::storage::{Storage, StorageError};

/// Shared application state for the read API
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
}

/// Error type for API responses
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Read API request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

/// Raw paging parameters. Kept as strings so bad values fall back to the
/// defaults instead of failing the request.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
}

impl PageQuery {
    pub fn resolve(&self) -> PageRequest {
        PageRequest::from_query(self.page.as_deref(), self.limit.as_deref())
    }
}

/// GET /api/devices/:device_id
pub async fn get_device_records(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<PaginatedResult>, ApiError> {
    let req = query.resolve();
    let result = state
        .storage
        .device_records(&device_id, req.page, req.limit)
        .await?;
    Ok(Json(result))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileStatusResponse {
    pub entry: ProcessedFileEntry,
    pub errors: Vec<ProcessingErrorEntry>,
}

/// GET /api/files/:file_name
pub async fn get_file_status(
    State(state): State<AppState>,
    Path(file_name): Path<String>,
) -> Result<Json<FileStatusResponse>, ApiError> {
    let entry = state
        .storage
        .ledger_entry(&file_name)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("file not found: {}", file_name)))?;
    let errors = state.storage.errors_for_file(&file_name).await?;
    Ok(Json(FileStatusResponse { entry, errors }))
}

/// GET /health
pub async fn health_check() -> &'static str {
    "OK"
}
