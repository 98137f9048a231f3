//! Queries over measurement files.
//!
//! Every function takes a plain `&Connection` so callers decide how the
//! connection is obtained; the service runs them inside
//! `Pool::with_connection`.

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::error::RecordError;
use crate::label::Label;

const SUMMARY_COLUMNS: &str = "f.file_id, f.original_filename, f.original_path, f.selected_label,
     f.transient1_index, f.transient2_index, f.transient3_index,
     f.voltage_level, f.current_level, f.binary_data_path";

/// One row of the file listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileSummary {
    pub file_id: i64,
    pub filename: String,
    pub path: String,
    pub label: Option<String>,
    pub transient1_index: Option<i64>,
    pub transient2_index: Option<i64>,
    pub transient3_index: Option<i64>,
    pub voltage_level: Option<f64>,
    pub current_level: Option<f64>,
    pub binary_path: String,
}

impl FileSummary {
    /// Maps a row selected with the summary column list, starting at `offset`.
    pub(crate) fn from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            file_id: row.get(offset)?,
            filename: row.get(offset + 1)?,
            path: row.get(offset + 2)?,
            label: row.get(offset + 3)?,
            transient1_index: row.get(offset + 4)?,
            transient2_index: row.get(offset + 5)?,
            transient3_index: row.get(offset + 6)?,
            voltage_level: row.get(offset + 7)?,
            current_level: row.get(offset + 8)?,
            binary_path: row.get(offset + 9)?,
        })
    }

    pub(crate) const COLUMN_COUNT: usize = 10;
}

/// A single file with its sampling metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileDetails {
    #[serde(flatten)]
    pub summary: FileSummary,
    pub total_samples: Option<i64>,
    pub sampling_rate: Option<f64>,
}

/// Sample indices of up to three transients within a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transients {
    #[serde(default)]
    pub transient1: Option<i64>,
    #[serde(default)]
    pub transient2: Option<i64>,
    #[serde(default)]
    pub transient3: Option<i64>,
}

/// Filters for [`search_files`]. Empty criteria match every file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchCriteria {
    /// Substring of the original filename.
    pub filename: Option<String>,
    /// Inclusive voltage range.
    pub voltage: Option<(f64, f64)>,
    /// Inclusive current range.
    pub current: Option<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub file_id: i64,
    pub filename: String,
    pub label: Option<String>,
    pub voltage: Option<f64>,
    pub current: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelCount {
    pub label: Option<String>,
    pub count: i64,
}

/// Fields needed to register a converted measurement file.
#[derive(Debug, Clone, PartialEq)]
pub struct NewFile {
    pub filename: String,
    pub path: String,
    pub label_directory: Option<String>,
    pub label: Label,
    pub voltage_level: Option<f64>,
    pub current_level: Option<f64>,
    pub datestamp: Option<String>,
    pub binary_path: String,
    pub total_samples: Option<i64>,
}

/// Registers a file and returns its id.
///
/// # Errors
///
/// Returns `RecordError::Database` on SQL failure, including a duplicate
/// `(path, filename)` pair.
pub fn insert_file(conn: &Connection, file: &NewFile) -> Result<i64, RecordError> {
    let file_id = conn.query_row(
        "INSERT INTO files
            (original_filename, original_path, original_label_directory, selected_label,
             voltage_level, current_level, datestamp, binary_data_path, total_samples)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         RETURNING file_id",
        params![
            file.filename,
            file.path,
            file.label_directory,
            file.label.as_str(),
            file.voltage_level,
            file.current_level,
            file.datestamp,
            file.binary_path,
            file.total_samples,
        ],
        |row| row.get(0),
    )?;

    tracing::debug!(file_id, filename = %file.filename, "registered file");
    Ok(file_id)
}

/// Lists files ordered by id, optionally restricted to one label.
///
/// # Errors
///
/// Returns `RecordError::Database` on SQL failure.
pub fn list_files(conn: &Connection, label: Option<&str>) -> Result<Vec<FileSummary>, RecordError> {
    let mut sql = format!("SELECT {SUMMARY_COLUMNS} FROM files f");
    let mut values = Vec::new();
    if let Some(label) = label {
        sql.push_str(" WHERE f.selected_label = ?1");
        values.push(Value::Text(label.to_string()));
    }
    sql.push_str(" ORDER BY f.file_id");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values), |row| FileSummary::from_row(row, 0))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Fetches one file, or `None` if the id is unknown.
///
/// # Errors
///
/// Returns `RecordError::Database` on SQL failure.
pub fn get_file(conn: &Connection, file_id: i64) -> Result<Option<FileDetails>, RecordError> {
    let sql = format!(
        "SELECT {SUMMARY_COLUMNS}, f.total_samples, f.sampling_rate
         FROM files f WHERE f.file_id = ?1"
    );
    let details = conn
        .query_row(&sql, params![file_id], |row| {
            let n = FileSummary::COLUMN_COUNT;
            Ok(FileDetails {
                summary: FileSummary::from_row(row, 0)?,
                total_samples: row.get(n)?,
                sampling_rate: row.get(n + 1)?,
            })
        })
        .optional()?;
    Ok(details)
}

/// Sets the label of a file. Returns `false` if no such file exists.
///
/// # Errors
///
/// Returns `RecordError::Database` on SQL failure.
pub fn update_label(conn: &Connection, file_id: i64, label: Label) -> Result<bool, RecordError> {
    let changed = conn.execute(
        "UPDATE files SET selected_label = ?1, updated_at = CURRENT_TIMESTAMP
         WHERE file_id = ?2",
        params![label.as_str(), file_id],
    )?;
    if changed > 0 {
        tracing::info!(file_id, label = %label, "file label updated");
    }
    Ok(changed > 0)
}

/// Replaces all three transient indices of a file. Missing indices are
/// stored as `NULL`. Returns `false` if no such file exists.
///
/// # Errors
///
/// Returns `RecordError::Database` on SQL failure.
pub fn update_transients(
    conn: &Connection,
    file_id: i64,
    transients: Transients,
) -> Result<bool, RecordError> {
    let changed = conn.execute(
        "UPDATE files
         SET transient1_index = ?1, transient2_index = ?2, transient3_index = ?3,
             updated_at = CURRENT_TIMESTAMP
         WHERE file_id = ?4",
        params![
            transients.transient1,
            transients.transient2,
            transients.transient3,
            file_id
        ],
    )?;
    if changed > 0 {
        tracing::info!(file_id, ?transients, "file transients updated");
    }
    Ok(changed > 0)
}

/// Searches files by filename substring and voltage/current ranges.
///
/// # Errors
///
/// Returns `RecordError::Database` on SQL failure.
pub fn search_files(
    conn: &Connection,
    criteria: &SearchCriteria,
) -> Result<Vec<SearchHit>, RecordError> {
    let mut clauses: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(ref filename) = criteria.filename {
        values.push(Value::Text(format!("%{filename}%")));
        clauses.push(format!("original_filename LIKE ?{}", values.len()));
    }
    for (column, range) in [
        ("voltage_level", criteria.voltage),
        ("current_level", criteria.current),
    ] {
        if let Some((min, max)) = range {
            values.push(Value::Real(min));
            values.push(Value::Real(max));
            let n = values.len();
            clauses.push(format!("{column} BETWEEN ?{} AND ?{n}", n - 1));
        }
    }

    let mut sql = "SELECT file_id, original_filename, selected_label, voltage_level, current_level
                   FROM files"
        .to_string();
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY file_id");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values), |row| {
        Ok(SearchHit {
            file_id: row.get(0)?,
            filename: row.get(1)?,
            label: row.get(2)?,
            voltage: row.get(3)?,
            current: row.get(4)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Number of files per label, most frequent first.
///
/// # Errors
///
/// Returns `RecordError::Database` on SQL failure.
pub fn label_statistics(conn: &Connection) -> Result<Vec<LabelCount>, RecordError> {
    let mut stmt = conn.prepare(
        "SELECT selected_label, COUNT(*) AS count
         FROM files
         GROUP BY selected_label
         ORDER BY count DESC, selected_label",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(LabelCount {
            label: row.get(0)?,
            count: row.get(1)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}
