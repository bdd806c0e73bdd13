use serde::Serialize;
use tracing::trace;

use crate::ingest::reader::Row;

/// Lifecycle of one ingestion run.
///
/// `Idle -> ReadingHeader -> Skipping -> {Batching -> Executing}* -> Done | Aborted`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CursorState {
    /// Created, file not yet open.
    Idle,
    /// File open, header line being consumed.
    ReadingHeader,
    /// Discarding data rows until `to_offset` have been skipped.
    Skipping {
        /// Start offset requested by the operator.
        to_offset: u64,
    },
    /// Collecting rows into the next batch.
    Batching,
    /// A batch transaction is in flight.
    Executing {
        /// Ordinal of the in-flight batch.
        batch: u64,
    },
    /// Every row committed.
    Done,
    /// Stopped by a fatal error; counters are frozen.
    Aborted,
}

impl CursorState {
    /// True for `Done` and `Aborted`.
    pub fn is_terminal(self) -> bool {
        matches!(self, CursorState::Done | CursorState::Aborted)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn allows(self, next: CursorState) -> bool {
        use CursorState::*;
        match (self, next) {
            (_, Aborted) => !self.is_terminal(),
            (Idle, ReadingHeader) => true,
            (ReadingHeader, Skipping { .. }) => true,
            (Skipping { .. }, Batching) => true,
            (Batching, Executing { .. }) => true,
            (Executing { .. }, Batching) => true,
            (Batching, Done) => true,
            _ => false,
        }
    }
}

/// Rows durably committed so far, and where to restart.
///
/// The counters only move forward, and only after a batch transaction has
/// committed.
#[derive(Debug, Clone)]
pub struct ResumeCursor {
    start_offset: u64,
    committed: u64,
    batches_committed: u64,
    last_row: Option<Row>,
    state: CursorState,
}

impl ResumeCursor {
    /// Cursor for a run that starts at data row `start_offset`.
    pub fn new(start_offset: u64) -> Self {
        Self {
            start_offset,
            committed: 0,
            batches_committed: 0,
            last_row: None,
            state: CursorState::Idle,
        }
    }

    /// Current state.
    pub fn state(&self) -> CursorState {
        self.state
    }

    /// Start offset this run was launched with.
    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    /// Rows committed during this run.
    pub fn committed(&self) -> u64 {
        self.committed
    }

    /// Batches committed during this run.
    pub fn batches_committed(&self) -> u64 {
        self.batches_committed
    }

    /// Raw fields of the last committed row.
    pub fn last_row(&self) -> Option<&Row> {
        self.last_row.as_ref()
    }

    /// Start offset to pass to the next run.
    pub fn resume_offset(&self) -> u64 {
        self.start_offset + self.committed
    }

    pub(crate) fn file_opened(&mut self) {
        self.advance(CursorState::ReadingHeader);
    }

    pub(crate) fn header_read(&mut self) {
        self.advance(CursorState::Skipping {
            to_offset: self.start_offset,
        });
    }

    pub(crate) fn offset_reached(&mut self) {
        self.advance(CursorState::Batching);
    }

    pub(crate) fn batch_ready(&mut self, batch: u64) {
        self.advance(CursorState::Executing { batch });
    }

    /// Records a committed batch of `rows` rows ending with `last_row`.
    pub(crate) fn record_commit(&mut self, rows: usize, last_row: &Row) {
        self.advance(CursorState::Batching);
        self.committed += rows as u64;
        self.batches_committed += 1;
        self.last_row = Some(last_row.clone());
    }

    pub(crate) fn finish(&mut self) {
        self.advance(CursorState::Done);
    }

    pub(crate) fn abort(&mut self) {
        if !self.state.is_terminal() {
            self.advance(CursorState::Aborted);
        }
    }

    /// Serializable copy of the cursor.
    pub fn snapshot(&self) -> CursorSnapshot {
        CursorSnapshot {
            state: self.state,
            start_offset: self.start_offset,
            committed: self.committed,
            batches_committed: self.batches_committed,
            resume_offset: self.resume_offset(),
            last_row: self.last_row.clone(),
        }
    }

    fn advance(&mut self, next: CursorState) {
        debug_assert!(
            self.state.allows(next),
            "invalid cursor transition {:?} -> {:?}",
            self.state,
            next
        );
        trace!(from = ?self.state, to = ?next, "ingest.cursor.transition");
        self.state = next;
    }
}

/// Terminal view of a [`ResumeCursor`], as handed to reporters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CursorSnapshot {
    /// State when the snapshot was taken.
    #[serde(flatten)]
    pub state: CursorState,
    /// Start offset of the run.
    pub start_offset: u64,
    /// Rows committed during the run.
    pub committed: u64,
    /// Batches committed during the run.
    pub batches_committed: u64,
    /// Start offset for the next run.
    pub resume_offset: u64,
    /// Raw fields of the last committed row.
    pub last_row: Option<Row>,
}
