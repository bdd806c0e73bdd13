#![forbid(unsafe_code)]

//! Graph store collaborators.
//!
//! The loader talks to a store through [`GraphStore`] (opens sessions, names
//! the database) and [`GraphSession`] (runs one query per transaction). Two
//! backends ship with the crate: [`SqliteGraphStore`], a property graph kept
//! in SQLite tables, and [`MemoryGraphStore`], an in-process recorder used for
//! dry runs and tests.

mod memory;
mod sqlite;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

pub use memory::{MemoryGraphStore, MemorySession, RecordedWrite};
pub use sqlite::{SqliteGraphStore, SqliteOptions, SqliteSession, Synchronous};

/// Error raised by a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite failure, including constraint violations during a write.
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    /// Parameters could not be encoded for the backend.
    #[error("parameter encoding failed: {0}")]
    Json(#[from] serde_json::Error),
    /// Backend refused the transaction.
    #[error("transaction rejected: {0}")]
    Rejected(String),
}

/// Outcome of a committed write transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteSummary {
    /// Rows, nodes or relationships touched, as counted by the backend.
    pub rows_affected: u64,
}

/// Named query parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct QueryParams(Map<String, Value>);

impl QueryParams {
    /// No parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// A single named parameter.
    pub fn single(name: impl Into<String>, value: Value) -> Self {
        let mut params = Self::new();
        params.insert(name, value);
        params
    }

    /// Binds `name` to `value`, replacing any previous binding.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.0.insert(name.into(), value);
    }

    /// Value bound to `name`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Iterates bindings.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A store that hands out sessions.
pub trait GraphStore {
    /// Session type produced by this store.
    type Session: GraphSession;

    /// Identifier of the target database.
    fn database(&self) -> &str;

    /// Opens a session. Dropping the session releases it.
    fn open_session(&self) -> Result<Self::Session, StoreError>;
}

/// An open connection able to run transactional queries.
pub trait GraphSession {
    /// Runs `query` once inside a single write transaction.
    ///
    /// Either the whole query commits or nothing does.
    fn write_transaction(
        &mut self,
        query: &str,
        params: &QueryParams,
    ) -> Result<WriteSummary, StoreError>;

    /// Runs a read-only query; each result row comes back as a list of strings.
    fn read_transaction(
        &mut self,
        query: &str,
        params: &QueryParams,
    ) -> Result<Vec<Vec<String>>, StoreError>;

    /// Releases the session.
    fn close(self) -> Result<(), StoreError>
    where
        Self: Sized;
}
