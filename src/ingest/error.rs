use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::ingest::reader::Row;
use crate::source::SourceError;
use crate::store::StoreError;

/// Fatal conditions raised by the ingestion pipeline.
///
/// Normal termination is signalled by the row stream running dry; every
/// variant here ends the run.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Input file does not exist.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),
    /// Read fault while streaming the input file.
    #[error("failed reading {}: {source}", path.display())]
    Io {
        /// File being read.
        path: PathBuf,
        /// Underlying reader error.
        #[source]
        source: csv::Error,
    },
    /// A row's field count differs from the active key schema.
    #[error("schema mismatch at {}: expected {expected} fields, found {found}", describe_row(.row))]
    SchemaMismatch {
        /// 0-based data-row offset of the offending row; `None` for the header.
        row: Option<u64>,
        /// Length of the key schema.
        expected: usize,
        /// Field count of the offending row.
        found: usize,
    },
    /// Invalid run argument (start offset, key list, chunk size, delimiter).
    #[error("invalid argument: {0}")]
    Argument(String),
    /// A batch write failed; nothing after the last committed batch was written.
    #[error(
        "transaction failed after {committed} committed rows; restart with start offset {resume_offset}: {source}"
    )]
    TransactionFailure {
        /// Rows committed by earlier batches of this run.
        committed: u64,
        /// Data-row offset to restart from.
        resume_offset: u64,
        /// Raw fields of the last committed row, if any batch committed.
        last_row: Option<Row>,
        /// Store error that failed the transaction.
        #[source]
        source: StoreError,
    },
    /// The store could not be opened or a session could not be acquired.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),
    /// A loop step's read or write transaction failed.
    #[error("loop failed after {iterations} iterations ({processed} rows processed): {source}")]
    LoopFailure {
        /// Iterations whose write committed.
        iterations: u64,
        /// Rows reported by the committed writes.
        processed: u64,
        /// Store error that stopped the loop.
        #[source]
        source: StoreError,
    },
    /// The step's input artifact could not be fetched or unpacked.
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Result alias for ingestion operations.
pub type Result<T> = std::result::Result<T, LoadError>;

impl LoadError {
    pub(crate) fn argument(message: impl Into<String>) -> Self {
        LoadError::Argument(message.into())
    }

    pub(crate) fn io(path: impl AsRef<Path>, source: csv::Error) -> Self {
        LoadError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Flat tag used in terminal reports.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoadError::FileNotFound(_) => ErrorKind::FileNotFound,
            LoadError::Io { .. } => ErrorKind::IoError,
            LoadError::SchemaMismatch { .. } => ErrorKind::SchemaMismatch,
            LoadError::Argument(_) => ErrorKind::ArgumentError,
            LoadError::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            LoadError::TransactionFailure { .. } | LoadError::LoopFailure { .. } => {
                ErrorKind::TransactionFailure
            }
            LoadError::Source(SourceError::MissingArtifact(_)) => ErrorKind::FileNotFound,
            LoadError::Source(_) => ErrorKind::IoError,
        }
    }
}

/// Serializable error category.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Input file missing.
    FileNotFound,
    /// Read fault mid-stream.
    IoError,
    /// Row/key arity mismatch.
    SchemaMismatch,
    /// Invalid start offset, key list or other argument.
    ArgumentError,
    /// Store write failed.
    TransactionFailure,
    /// Store could not be reached.
    StoreUnavailable,
}

fn describe_row(row: &Option<u64>) -> String {
    match row {
        Some(row) => format!("data row {row}"),
        None => "header".to_string(),
    }
}
