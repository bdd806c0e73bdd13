use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use super::{GraphSession, GraphStore, QueryParams, StoreError, WriteSummary};

/// A committed write as seen by [`MemoryGraphStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedWrite {
    /// Query text.
    pub query: String,
    /// Parameters bound to it.
    pub params: QueryParams,
}

#[derive(Debug, Default)]
struct MemoryState {
    counting_only: bool,
    writes: Vec<RecordedWrite>,
    write_attempts: u64,
    writes_committed: u64,
    rows_written: u64,
    fail_on: BTreeSet<u64>,
    read_script: VecDeque<Vec<Vec<String>>>,
    sessions_opened: u64,
    sessions_closed: u64,
}

/// In-process store that appends every committed write to a log.
///
/// Writes are never deduplicated. Cloning shares the same log, so a test can
/// keep a handle while the pipeline owns another. A store built with
/// [`MemoryGraphStore::counting`] keeps only counters, so its memory use does
/// not grow with the input.
#[derive(Debug, Clone, Default)]
pub struct MemoryGraphStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryGraphStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that counts writes and rows without keeping their parameters.
    pub fn counting() -> Self {
        let store = Self::default();
        store.state.lock().counting_only = true;
        store
    }

    /// Makes the `attempt`-th write transaction (1-based, across sessions) fail.
    pub fn fail_on_write(&self, attempt: u64) {
        self.state.lock().fail_on.insert(attempt);
    }

    /// Queues the result of the next read transaction.
    pub fn push_read_result(&self, rows: Vec<Vec<String>>) {
        self.state.lock().read_script.push_back(rows);
    }

    /// Committed writes in commit order.
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.state.lock().writes.clone()
    }

    /// Every element of every committed list parameter named `name`, in commit order.
    pub fn list_elements(&self, name: &str) -> Vec<Value> {
        self.state
            .lock()
            .writes
            .iter()
            .filter_map(|write| write.params.get(name))
            .filter_map(Value::as_array)
            .flat_map(|items| items.iter().cloned())
            .collect()
    }

    /// Write transactions attempted, failed ones included.
    pub fn write_attempts(&self) -> u64 {
        self.state.lock().write_attempts
    }

    /// Write transactions committed.
    pub fn writes_committed(&self) -> u64 {
        self.state.lock().writes_committed
    }

    /// Rows reported by committed writes.
    pub fn rows_written(&self) -> u64 {
        self.state.lock().rows_written
    }

    /// Sessions opened and sessions released so far.
    pub fn session_counts(&self) -> (u64, u64) {
        let state = self.state.lock();
        (state.sessions_opened, state.sessions_closed)
    }
}

impl GraphStore for MemoryGraphStore {
    type Session = MemorySession;

    fn database(&self) -> &str {
        "memory"
    }

    fn open_session(&self) -> Result<MemorySession, StoreError> {
        self.state.lock().sessions_opened += 1;
        Ok(MemorySession {
            state: Arc::clone(&self.state),
        })
    }
}

/// Session over a [`MemoryGraphStore`]; released on drop.
#[derive(Debug)]
pub struct MemorySession {
    state: Arc<Mutex<MemoryState>>,
}

impl GraphSession for MemorySession {
    fn write_transaction(
        &mut self,
        query: &str,
        params: &QueryParams,
    ) -> Result<WriteSummary, StoreError> {
        let mut state = self.state.lock();
        state.write_attempts += 1;
        let attempt = state.write_attempts;
        if state.fail_on.contains(&attempt) {
            return Err(StoreError::Rejected(format!(
                "injected failure on write {attempt}"
            )));
        }
        let rows_affected = params
            .iter()
            .find_map(|(_, value)| value.as_array().map(|items| items.len() as u64))
            .unwrap_or(1);
        state.writes_committed += 1;
        state.rows_written += rows_affected;
        if !state.counting_only {
            state.writes.push(RecordedWrite {
                query: query.to_string(),
                params: params.clone(),
            });
        }
        Ok(WriteSummary { rows_affected })
    }

    fn read_transaction(
        &mut self,
        _query: &str,
        _params: &QueryParams,
    ) -> Result<Vec<Vec<String>>, StoreError> {
        Ok(self.state.lock().read_script.pop_front().unwrap_or_default())
    }

    fn close(self) -> Result<(), StoreError> {
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.state.lock().sessions_closed += 1;
    }
}
