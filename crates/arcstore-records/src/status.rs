//! Experiment review status and the rejection log.

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::RecordError;
use crate::files::FileSummary;

/// Status recorded by [`reject_file`].
pub const REJECT_STATUS: &str = "reject";

const REJECT_NOTE: &str = "Rejected via reject endpoint";

fn default_true() -> bool {
    true
}

/// A review decision submitted for one file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusUpdate {
    pub status: String,
    #[serde(default = "default_true")]
    pub manual_reviewed: bool,
    #[serde(default)]
    pub reviewer_notes: Option<String>,
    #[serde(default)]
    pub reviewer_name: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Stored review state of a file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentStatus {
    pub file_id: i64,
    pub status: String,
    pub manual_reviewed: bool,
    pub reviewer_notes: Option<String>,
    pub reviewed_by: Option<String>,
    pub classification_confidence: Option<f64>,
    pub reviewed_at: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

/// A file joined with its review state, which may be absent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileWithStatus {
    #[serde(flatten)]
    pub file: FileSummary,
    pub status: Option<String>,
    pub manual_reviewed: Option<bool>,
    pub reviewer_notes: Option<String>,
    pub reviewed_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewCount {
    pub manual_reviewed: bool,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    pub status_counts: Vec<StatusCount>,
    pub review_counts: Vec<ReviewCount>,
    /// Manual reviews recorded in the last 24 hours.
    pub recent_reviews: i64,
}

/// One entry of the append-only rejection log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub rejection_id: i64,
    pub file_id: Option<i64>,
    pub filename: Option<String>,
    pub original_path: Option<String>,
    pub original_label: Option<String>,
    pub rejected_at: Option<String>,
}

fn file_exists(conn: &Connection, file_id: i64) -> Result<bool, RecordError> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM files WHERE file_id = ?1)",
        params![file_id],
        |row| row.get(0),
    )?)
}

fn upsert_status(conn: &Connection, file_id: i64, update: &StatusUpdate) -> Result<(), RecordError> {
    conn.execute(
        "INSERT INTO experiment_status
            (file_id, status, manual_reviewed, reviewer_notes, reviewed_by,
             classification_confidence, reviewed_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
         ON CONFLICT(file_id) DO UPDATE SET
            status = excluded.status,
            manual_reviewed = excluded.manual_reviewed,
            reviewer_notes = excluded.reviewer_notes,
            reviewed_by = excluded.reviewed_by,
            classification_confidence = excluded.classification_confidence,
            reviewed_at = excluded.reviewed_at,
            updated_at = excluded.updated_at",
        params![
            file_id,
            update.status,
            update.manual_reviewed,
            update.reviewer_notes,
            update.reviewer_name,
            update.confidence,
        ],
    )?;
    Ok(())
}

/// Inserts or replaces the review status of a file.
///
/// # Errors
///
/// Returns `RecordError::NotFound` if the file does not exist and
/// `RecordError::Database` on SQL failure.
pub fn set_experiment_status(
    conn: &Connection,
    file_id: i64,
    update: &StatusUpdate,
) -> Result<(), RecordError> {
    if !file_exists(conn, file_id)? {
        return Err(RecordError::NotFound(file_id));
    }
    upsert_status(conn, file_id, update)?;
    tracing::info!(
        file_id,
        status = %update.status,
        manual_reviewed = update.manual_reviewed,
        "experiment status updated"
    );
    Ok(())
}

/// Review status of a file, or `None` if it was never reviewed.
///
/// # Errors
///
/// Returns `RecordError::Database` on SQL failure.
pub fn experiment_status(
    conn: &Connection,
    file_id: i64,
) -> Result<Option<ExperimentStatus>, RecordError> {
    let status = conn
        .query_row(
            "SELECT file_id, status, manual_reviewed, reviewer_notes, reviewed_by,
                    classification_confidence, reviewed_at, created_at, updated_at
             FROM experiment_status WHERE file_id = ?1",
            params![file_id],
            |row| {
                Ok(ExperimentStatus {
                    file_id: row.get(0)?,
                    status: row.get(1)?,
                    manual_reviewed: row.get(2)?,
                    reviewer_notes: row.get(3)?,
                    reviewed_by: row.get(4)?,
                    classification_confidence: row.get(5)?,
                    reviewed_at: row.get(6)?,
                    created_at: row.get(7)?,
                    updated_at: row.get(8)?,
                })
            },
        )
        .optional()?;
    Ok(status)
}

/// Files joined with their review state.
///
/// With no filters every file is returned, reviewed or not. A `status`
/// or `manual_reviewed` filter only matches reviewed files.
///
/// # Errors
///
/// Returns `RecordError::Database` on SQL failure.
pub fn files_by_status(
    conn: &Connection,
    status: Option<&str>,
    manual_reviewed: Option<bool>,
) -> Result<Vec<FileWithStatus>, RecordError> {
    let mut clauses: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(status) = status {
        values.push(Value::Text(status.to_string()));
        clauses.push(format!("es.status = ?{}", values.len()));
    }
    if let Some(reviewed) = manual_reviewed {
        values.push(Value::Integer(i64::from(reviewed)));
        clauses.push(format!("es.manual_reviewed = ?{}", values.len()));
    }

    let mut sql = "SELECT f.file_id, f.original_filename, f.original_path, f.selected_label,
                          f.transient1_index, f.transient2_index, f.transient3_index,
                          f.voltage_level, f.current_level, f.binary_data_path,
                          es.status, es.manual_reviewed, es.reviewer_notes, es.reviewed_at
                   FROM files f
                   LEFT JOIN experiment_status es ON f.file_id = es.file_id"
        .to_string();
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY f.file_id");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values), |row| {
        let n = FileSummary::COLUMN_COUNT;
        Ok(FileWithStatus {
            file: FileSummary::from_row(row, 0)?,
            status: row.get(n)?,
            manual_reviewed: row.get(n + 1)?,
            reviewer_notes: row.get(n + 2)?,
            reviewed_at: row.get(n + 3)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Counts per status, per review flag, and manual reviews in the last day.
///
/// # Errors
///
/// Returns `RecordError::Database` on SQL failure.
pub fn status_summary(conn: &Connection) -> Result<StatusSummary, RecordError> {
    let mut stmt = conn.prepare(
        "SELECT status, COUNT(*) AS count FROM experiment_status
         GROUP BY status ORDER BY count DESC, status",
    )?;
    let status_counts = stmt
        .query_map([], |row| {
            Ok(StatusCount {
                status: row.get(0)?,
                count: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT manual_reviewed, COUNT(*) FROM experiment_status
         GROUP BY manual_reviewed ORDER BY manual_reviewed DESC",
    )?;
    let review_counts = stmt
        .query_map([], |row| {
            Ok(ReviewCount {
                manual_reviewed: row.get(0)?,
                count: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let recent_reviews = conn.query_row(
        "SELECT COUNT(*) FROM experiment_status
         WHERE manual_reviewed = 1 AND reviewed_at > datetime('now', '-1 day')",
        [],
        |row| row.get(0),
    )?;

    Ok(StatusSummary {
        status_counts,
        review_counts,
        recent_reviews,
    })
}

/// Marks a file as rejected and appends it to the rejection log.
///
/// Both writes happen in one transaction.
///
/// # Errors
///
/// Returns `RecordError::NotFound` if the file does not exist and
/// `RecordError::Database` on SQL failure.
pub fn reject_file(conn: &Connection, file_id: i64) -> Result<(), RecordError> {
    let tx = conn.unchecked_transaction()?;

    let inserted = tx.execute(
        "INSERT INTO rejections (file_id, filename, original_path, original_label)
         SELECT file_id, original_filename, original_path, selected_label
         FROM files WHERE file_id = ?1",
        params![file_id],
    )?;
    if inserted == 0 {
        return Err(RecordError::NotFound(file_id));
    }

    upsert_status(
        &tx,
        file_id,
        &StatusUpdate {
            status: REJECT_STATUS.to_string(),
            manual_reviewed: true,
            reviewer_notes: Some(REJECT_NOTE.to_string()),
            reviewer_name: None,
            confidence: None,
        },
    )?;
    tx.commit()?;

    tracing::info!(file_id, "file rejected");
    Ok(())
}

/// The rejection log, newest first.
///
/// # Errors
///
/// Returns `RecordError::Database` on SQL failure.
pub fn rejected_files(conn: &Connection) -> Result<Vec<Rejection>, RecordError> {
    let mut stmt = conn.prepare(
        "SELECT rejection_id, file_id, filename, original_path, original_label, rejected_at
         FROM rejections
         ORDER BY rejected_at DESC, rejection_id DESC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(Rejection {
            rejection_id: row.get(0)?,
            file_id: row.get(1)?,
            filename: row.get(2)?,
            original_path: row.get(3)?,
            original_label: row.get(4)?,
            rejected_at: row.get(5)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}
