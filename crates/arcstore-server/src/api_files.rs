//! Handlers for measurement files, their labels, and signal samples.

use std::sync::Arc;

use arcstore_records::{
    get_file, label_statistics, list_files, load_signal, search_files, update_label,
    update_transients, Label, RecordError, SearchCriteria, Transients,
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

#[derive(Debug, Deserialize)]
pub struct ListFilesParams {
    pub label: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LabelRequest {
    pub label: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub filename: Option<String>,
    pub voltage_min: Option<f64>,
    pub voltage_max: Option<f64>,
    pub current_min: Option<f64>,
    pub current_max: Option<f64>,
}

impl SearchParams {
    /// A range filter applies only when both of its bounds are present.
    fn criteria(self) -> SearchCriteria {
        let range = |min: Option<f64>, max: Option<f64>| min.zip(max);
        SearchCriteria {
            filename: self.filename.filter(|name| !name.is_empty()),
            voltage: range(self.voltage_min, self.voltage_max),
            current: range(self.current_min, self.current_max),
        }
    }
}

/// Handler for `GET /api/files`.
pub async fn list_files_handler(
    Extension(state): Extension<Arc<AppState>>,
    params: Result<Query<ListFilesParams>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(params) = params?;
    let files = state
        .with_records(move |conn| list_files(conn, params.label.as_deref()))
        .await?;

    Ok(Json(json!({
        "status": "success",
        "count": files.len(),
        "files": files,
    })))
}

/// Handler for `GET /api/files/{id}`.
pub async fn get_file_handler(
    Extension(state): Extension<Arc<AppState>>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path(file_id) = path?;
    let file = state
        .with_records(move |conn| get_file(conn, file_id))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("file {file_id} not found")))?;

    Ok(Json(json!({
        "status": "success",
        "file": file,
    })))
}

/// Handler for `GET /api/files/{id}/data`.
///
/// The lease is returned before the sample file is read.
pub async fn get_file_data_handler(
    Extension(state): Extension<Arc<AppState>>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path(file_id) = path?;
    let file = state
        .with_records(move |conn| get_file(conn, file_id))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("file {file_id} not found")))?;

    let binary_dir = state.binary_dir.clone();
    let binary_path = file.summary.binary_path;
    let signal = tokio::task::spawn_blocking(move || load_signal(&binary_dir, &binary_path))
        .await
        .map_err(|e| ApiError::Internal(format!("signal loader task failed: {e}")))?
        .map_err(RecordError::from)?;

    Ok(Json(json!({
        "status": "success",
        "file_id": file_id,
        "samples": signal.len(),
        "data": signal,
    })))
}

/// Handler for `PUT /api/files/{id}/label`.
///
/// Accepts a label name or its single-digit key.
pub async fn update_label_handler(
    Extension(state): Extension<Arc<AppState>>,
    path: Result<Path<i64>, PathRejection>,
    body: Result<Json<LabelRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path(file_id) = path?;
    let Json(body) = body?;
    let label: Label = body
        .label
        .ok_or_else(|| ApiError::BadRequest("missing label in request".to_string()))?
        .parse::<Label>()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let updated = state
        .with_records(move |conn| update_label(conn, file_id, label))
        .await?;
    if !updated {
        return Err(ApiError::NotFound(format!("file {file_id} not found")));
    }

    Ok(Json(json!({
        "status": "success",
        "message": format!("updated file {file_id} label to {label}"),
    })))
}

/// Handler for `PUT /api/files/{id}/transients`.
pub async fn update_transients_handler(
    Extension(state): Extension<Arc<AppState>>,
    path: Result<Path<i64>, PathRejection>,
    body: Result<Json<Transients>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path(file_id) = path?;
    let Json(transients) = body?;
    let negative = [
        transients.transient1,
        transients.transient2,
        transients.transient3,
    ]
    .into_iter()
    .flatten()
    .any(|index| index < 0);
    if negative {
        return Err(ApiError::BadRequest(
            "transient indices must not be negative".to_string(),
        ));
    }

    let updated = state
        .with_records(move |conn| update_transients(conn, file_id, transients))
        .await?;
    if !updated {
        return Err(ApiError::NotFound(format!("file {file_id} not found")));
    }

    Ok(Json(json!({
        "status": "success",
        "message": format!("updated transient indices for file {file_id}"),
    })))
}

/// Handler for `GET /api/search`.
pub async fn search_handler(
    Extension(state): Extension<Arc<AppState>>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(params) = params?;
    let criteria = params.criteria();
    let results = state
        .with_records(move |conn| search_files(conn, &criteria))
        .await?;

    Ok(Json(json!({
        "status": "success",
        "count": results.len(),
        "results": results,
    })))
}

/// Handler for `GET /api/labels`. Needs no database access.
pub async fn list_labels_handler() -> Json<Value> {
    let labels: Vec<Value> = Label::ALL
        .into_iter()
        .map(|label| {
            json!({
                "label": label,
                "key": label.key().map(String::from),
                "augmentation_scheme": label.augmentation_scheme(),
            })
        })
        .collect();

    Json(json!({
        "status": "success",
        "labels": labels,
    }))
}

/// Handler for `GET /api/labels/statistics`.
pub async fn label_statistics_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    let statistics = state.with_records(label_statistics).await?;

    Ok(Json(json!({
        "status": "success",
        "statistics": statistics,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_ranges_need_both_bounds() {
        let criteria = SearchParams {
            filename: Some(String::new()),
            voltage_min: Some(100.0),
            voltage_max: None,
            current_min: Some(1.0),
            current_max: Some(2.0),
        }
        .criteria();

        assert_eq!(criteria.filename, None);
        assert_eq!(criteria.voltage, None);
        assert_eq!(criteria.current, Some((1.0, 2.0)));
    }
}
