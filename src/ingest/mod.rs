#![forbid(unsafe_code)]

//! Batched, resumable ingestion of delimited files.
//!
//! Rows stream out of a [`DelimitedFileReader`] in bounded groups, are cut
//! into [`Batch`]es, mapped to named parameters and written through a
//! [`BatchExecutor`], one transaction per batch. A [`ResumeCursor`] tracks what
//! has been committed so an aborted run can restart at the right row.

mod cursor;
mod error;
mod executor;
mod job;
mod mapper;
mod partition;
mod pipeline;
mod reader;
mod report;

/// Run lifecycle and restart bookkeeping.
pub use cursor::{CursorSnapshot, CursorState, ResumeCursor};

/// Error types for the ingestion pipeline.
pub use error::{ErrorKind, LoadError, Result};

/// Transactional batch and loop execution.
pub use executor::{
    run_loop, BatchExecutor, LoopOutcome, LoopSpec, QuerySpec, NODES_PARAM, ROWS_PARAM,
};

/// Manifest-driven multi-step runs.
pub use job::{run_job, JobOutcome, StepFailure};

/// Row to parameter-set mapping.
pub use mapper::{
    map_row, KeySchema, ParameterSet, ValueDecoding, DEFAULT_MULTI_VALUE_SEPARATOR,
};

pub use partition::{partition, partition_from, partition_group, Batch, BatchPosition};

/// Single-file and single-loop entry points.
pub use pipeline::{run_ingest, run_loop_step, IngestConfig, RunFailure, DEFAULT_CHUNK_SIZE};

/// Streaming delimited-file reader.
pub use reader::{DelimitedFileReader, Delimiter, Row, RowGroup, RowGroups, GROUP_FACTOR};

pub use report::{Reporter, RunReport, RunStatus, TracingReporter};
