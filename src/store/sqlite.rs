use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::types::{Null, ValueRef};
use rusqlite::{Connection, Statement, TransactionBehavior};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use super::{GraphSession, GraphStore, QueryParams, StoreError, WriteSummary};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS nodes (
    id INTEGER PRIMARY KEY,
    key TEXT,
    labels TEXT NOT NULL DEFAULT '[]',
    properties TEXT NOT NULL DEFAULT '{}'
);
CREATE TABLE IF NOT EXISTS edges (
    id INTEGER PRIMARY KEY,
    source_key TEXT NOT NULL,
    target_key TEXT NOT NULL,
    type_name TEXT NOT NULL,
    properties TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_nodes_key ON nodes (key);
CREATE INDEX IF NOT EXISTS idx_edges_source ON edges (source_key);
CREATE INDEX IF NOT EXISTS idx_edges_target ON edges (target_key);
CREATE INDEX IF NOT EXISTS idx_edges_type ON edges (type_name);
";

const PARAM_PREFIXES: [char; 3] = [':', '$', '@'];

/// SQLite durability mode applied to every session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Synchronous {
    /// fsync on every commit.
    #[default]
    Full,
    /// fsync at checkpoints only.
    Normal,
    /// Leave syncing to the OS.
    Off,
}

impl Synchronous {
    fn pragma_value(self) -> &'static str {
        match self {
            Synchronous::Full => "FULL",
            Synchronous::Normal => "NORMAL",
            Synchronous::Off => "OFF",
        }
    }
}

/// Connection options for [`SqliteGraphStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteOptions {
    /// Durability mode.
    pub synchronous: Synchronous,
    /// How long a session waits on a locked database.
    pub busy_timeout_ms: u64,
    /// Create the database file when it does not exist.
    pub create_if_missing: bool,
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self {
            synchronous: Synchronous::Full,
            busy_timeout_ms: 5_000,
            create_if_missing: true,
        }
    }
}

/// Property graph stored in SQLite `nodes` and `edges` tables.
///
/// Write queries are SQL receiving the batch as JSON text, e.g.
/// `INSERT INTO nodes (key, properties) SELECT json_extract(value, '$.id'), value FROM json_each(:rows)`.
/// Parameters may be referenced as `:name`, `$name` or `@name`.
#[derive(Debug, Clone)]
pub struct SqliteGraphStore {
    path: PathBuf,
    database: String,
    options: SqliteOptions,
}

impl SqliteGraphStore {
    /// Opens (and if allowed creates) the store at `path`, ensuring the graph tables exist.
    pub fn open(path: impl AsRef<Path>, options: SqliteOptions) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if !options.create_if_missing && !path.exists() {
            return Err(StoreError::Rejected(format!(
                "database {} does not exist",
                path.display()
            )));
        }
        let database = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "main".to_string());
        let store = Self {
            path,
            database,
            options,
        };
        let conn = store.connect()?;
        conn.execute_batch(SCHEMA)?;
        debug!(path = %store.path.display(), "store.sqlite.opened");
        Ok(store)
    }

    /// Location of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.pragma_update(None, "synchronous", self.options.synchronous.pragma_value())?;
        conn.busy_timeout(Duration::from_millis(self.options.busy_timeout_ms))?;
        Ok(conn)
    }
}

impl GraphStore for SqliteGraphStore {
    type Session = SqliteSession;

    fn database(&self) -> &str {
        &self.database
    }

    fn open_session(&self) -> Result<SqliteSession, StoreError> {
        let conn = self.connect()?;
        trace!(database = %self.database, "store.sqlite.session_opened");
        Ok(SqliteSession { conn })
    }
}

/// One SQLite connection.
#[derive(Debug)]
pub struct SqliteSession {
    conn: Connection,
}

impl GraphSession for SqliteSession {
    fn write_transaction(
        &mut self,
        query: &str,
        params: &QueryParams,
    ) -> Result<WriteSummary, StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let changed = {
            let mut stmt = tx.prepare(query)?;
            bind_params(&mut stmt, params)?;
            stmt.raw_execute()?
        };
        tx.commit()?;
        Ok(WriteSummary {
            rows_affected: changed as u64,
        })
    }

    fn read_transaction(
        &mut self,
        query: &str,
        params: &QueryParams,
    ) -> Result<Vec<Vec<String>>, StoreError> {
        let tx = self.conn.transaction()?;
        let out = {
            let mut stmt = tx.prepare(query)?;
            let columns = stmt.column_count();
            bind_params(&mut stmt, params)?;
            let mut rows = stmt.raw_query();
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                if columns == 1 {
                    out.push(expand_single(row.get_ref(0)?));
                } else {
                    let mut values = Vec::with_capacity(columns);
                    for idx in 0..columns {
                        values.push(value_to_string(row.get_ref(idx)?));
                    }
                    out.push(values);
                }
            }
            out
        };
        tx.commit()?;
        Ok(out)
    }

    fn close(self) -> Result<(), StoreError> {
        self.conn.close().map_err(|(_, err)| StoreError::Sqlite(err))
    }
}

fn bind_params(stmt: &mut Statement<'_>, params: &QueryParams) -> Result<(), StoreError> {
    for (name, value) in params.iter() {
        for prefix in PARAM_PREFIXES {
            let placeholder = format!("{prefix}{name}");
            let Some(idx) = stmt.parameter_index(&placeholder)? else {
                continue;
            };
            match value {
                Value::Null => stmt.raw_bind_parameter(idx, Null)?,
                Value::Bool(flag) => stmt.raw_bind_parameter(idx, i64::from(*flag))?,
                Value::Number(num) => {
                    if let Some(int) = num.as_i64() {
                        stmt.raw_bind_parameter(idx, int)?
                    } else {
                        stmt.raw_bind_parameter(idx, num.as_f64().unwrap_or_default())?
                    }
                }
                Value::String(text) => stmt.raw_bind_parameter(idx, text.as_str())?,
                Value::Array(_) | Value::Object(_) => {
                    stmt.raw_bind_parameter(idx, serde_json::to_string(value)?)?
                }
            }
        }
    }
    Ok(())
}

/// A single JSON-array column expands into its elements; anything else is one value.
fn expand_single(value: ValueRef<'_>) -> Vec<String> {
    if let ValueRef::Text(bytes) = value {
        if let Ok(Value::Array(items)) = serde_json::from_slice::<Value>(bytes) {
            return items.iter().map(json_to_string).collect();
        }
    }
    vec![value_to_string(value)]
}

fn json_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn value_to_string(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(int) => int.to_string(),
        ValueRef::Real(real) => real.to_string(),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => String::from_utf8_lossy(bytes).into_owned(),
    }
}
