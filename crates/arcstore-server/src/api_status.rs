//! Handlers for experiment review status and rejections.

use std::sync::Arc;

use arcstore_records::{
    experiment_status, files_by_status, get_file, reject_file, rejected_files,
    set_experiment_status, status_summary, RecordError, StatusUpdate,
};
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query,
    },
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{ApiError, AppState};

#[derive(Debug, Default, Deserialize)]
pub struct ExperimentParams {
    pub status: Option<String>,
    pub manual_reviewed: Option<String>,
}

fn parse_flag(raw: &str) -> Result<bool, ApiError> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ApiError::BadRequest(format!(
            "manual_reviewed must be true or false, got '{raw}'"
        ))),
    }
}

/// Handler for `GET /api/files/{id}/status`.
///
/// `experiment_status` is `null` for files that were never reviewed.
pub async fn get_status_handler(
    Extension(state): Extension<Arc<AppState>>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path(file_id) = path?;
    let status = state
        .with_records(move |conn| {
            if get_file(conn, file_id)?.is_none() {
                return Err(RecordError::NotFound(file_id));
            }
            experiment_status(conn, file_id)
        })
        .await?;

    Ok(Json(json!({
        "status": "success",
        "file_id": file_id,
        "experiment_status": status,
    })))
}

/// Handler for `PUT /api/files/{id}/status`.
pub async fn set_status_handler(
    Extension(state): Extension<Arc<AppState>>,
    path: Result<Path<i64>, PathRejection>,
    body: Result<Json<StatusUpdate>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path(file_id) = path?;
    let Json(update) = body?;
    if update.status.trim().is_empty() {
        return Err(ApiError::BadRequest("status must not be empty".to_string()));
    }
    if let Some(confidence) = update.confidence {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(ApiError::BadRequest(
                "confidence must be between 0 and 1".to_string(),
            ));
        }
    }

    let status = update.status.clone();
    state
        .with_records(move |conn| set_experiment_status(conn, file_id, &update))
        .await?;

    Ok(Json(json!({
        "status": "success",
        "message": format!("updated file {file_id} status to {status}"),
    })))
}

/// Handler for `POST /api/files/{id}/reject`.
pub async fn reject_handler(
    Extension(state): Extension<Arc<AppState>>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path(file_id) = path?;
    state
        .with_records(move |conn| reject_file(conn, file_id))
        .await?;

    Ok(Json(json!({
        "status": "success",
        "message": format!("rejected file {file_id}"),
    })))
}

/// Handler for `GET /api/experiments`.
pub async fn list_experiments_handler(
    Extension(state): Extension<Arc<AppState>>,
    params: Result<Query<ExperimentParams>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(params) = params?;
    let manual_reviewed = params
        .manual_reviewed
        .as_deref()
        .map(parse_flag)
        .transpose()?;
    let status = params.status.filter(|s| !s.is_empty());

    let files = state
        .with_records(move |conn| files_by_status(conn, status.as_deref(), manual_reviewed))
        .await?;

    Ok(Json(json!({
        "status": "success",
        "count": files.len(),
        "files": files,
    })))
}

/// Handler for `GET /api/rejections`.
pub async fn list_rejections_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    let rejections = state.with_records(rejected_files).await?;

    Ok(Json(json!({
        "status": "success",
        "count": rejections.len(),
        "rejections": rejections,
    })))
}

/// Handler for `GET /api/status`.
pub async fn status_summary_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    let summary = state.with_records(status_summary).await?;

    Ok(Json(json!({
        "status": "success",
        "summary": summary,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn review_flag_accepts_common_spellings() {
        assert!(parse_flag("true").expect("true"));
        assert!(parse_flag("1").expect("1"));
        assert!(!parse_flag("False").expect("False"));
        assert!(matches!(parse_flag("maybe"), Err(ApiError::BadRequest(_))));
    }
}
