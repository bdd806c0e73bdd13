//! Resumable, batched bulk loading of delimited files into a graph store.
//!
//! A run streams a tab- or comma-delimited file, maps each row to named
//! parameters using the header (or an explicit key list) and executes a
//! parameterized write query once per batch of rows. When a batch fails the
//! run stops, and the reported resume offset is the start offset that picks
//! up exactly where the last committed batch ended.
//!
//! ```no_run
//! use graphload::ingest::{run_ingest, IngestConfig, QuerySpec, TracingReporter};
//! use graphload::store::{SqliteGraphStore, SqliteOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = SqliteGraphStore::open("graph.db", SqliteOptions::default())?;
//! let query = QuerySpec::new(
//!     "INSERT INTO nodes (key, labels, properties) \
//!      SELECT json_extract(value, '$.id'), '[\"Gene\"]', value FROM json_each(:rows)",
//! )?;
//! let snapshot = run_ingest(&store, &IngestConfig::new("genes.tsv", query), &TracingReporter)?;
//! println!("committed {} rows", snapshot.committed);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod ingest;
pub mod source;
pub mod store;
