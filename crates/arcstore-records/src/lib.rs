//! Measurement records for the arcstore service.
//!
//! Queries over the `files`, `experiment_status`, and `rejections` tables,
//! the classification [`Label`] set, and the loader for the raw signal
//! samples each file points to. All queries take a borrowed
//! [`rusqlite::Connection`] and never acquire one themselves.

mod error;
mod files;
mod label;
mod signal;
mod status;

pub use error::RecordError;
pub use files::{
    get_file, insert_file, label_statistics, list_files, search_files, update_label,
    update_transients, FileDetails, FileSummary, LabelCount, NewFile, SearchCriteria, SearchHit,
    Transients,
};
pub use label::{Label, UnknownLabel};
pub use signal::{load_signal, parse_npy, SignalData, SignalError};
pub use status::{
    experiment_status, files_by_status, reject_file, rejected_files, set_experiment_status,
    status_summary, ExperimentStatus, FileWithStatus, Rejection, ReviewCount, StatusCount,
    StatusSummary, StatusUpdate, REJECT_STATUS,
};
