use serde::Serialize;
use tracing::{error, info};

use crate::ingest::cursor::{CursorSnapshot, ResumeCursor};
use crate::ingest::error::{ErrorKind, LoadError};
use crate::ingest::executor::LoopOutcome;

/// How a step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every row (or loop iteration) committed.
    Done,
    /// Stopped on a fatal error.
    Aborted,
}

/// Terminal report of one step, handed to a [`Reporter`] exactly once.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Step name, when run from a manifest.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    /// Outcome.
    pub status: RunStatus,
    /// Error category for aborted runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Error message for aborted runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Cursor of a file step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<CursorSnapshot>,
    /// Totals of a loop step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_outcome: Option<LoopOutcome>,
}

impl RunReport {
    /// Report for a file step that ended with `cursor` and optionally `error`.
    pub fn for_file(step: Option<&str>, cursor: CursorSnapshot, error: Option<&LoadError>) -> Self {
        Self {
            step: step.map(str::to_string),
            status: status_of(error),
            error_kind: error.map(LoadError::kind),
            message: error.map(ToString::to_string),
            cursor: Some(cursor),
            loop_outcome: None,
        }
    }

    /// Report for a loop step.
    pub fn for_loop(step: Option<&str>, outcome: &Result<LoopOutcome, LoadError>) -> Self {
        let error = outcome.as_ref().err();
        let totals = match outcome {
            Ok(totals) => Some(*totals),
            Err(LoadError::LoopFailure {
                iterations,
                processed,
                ..
            }) => Some(LoopOutcome {
                iterations: *iterations,
                processed: *processed,
            }),
            Err(_) => None,
        };
        Self {
            step: step.map(str::to_string),
            status: status_of(error),
            error_kind: error.map(LoadError::kind),
            message: error.map(ToString::to_string),
            cursor: None,
            loop_outcome: totals,
        }
    }

    /// Operator instruction for restarting an aborted file step.
    pub fn resume_hint(&self) -> Option<String> {
        if self.status != RunStatus::Aborted {
            return None;
        }
        let cursor = self.cursor.as_ref()?;
        let last = match &cursor.last_row {
            Some(row) => format!(" (last committed row: {row})"),
            None => String::new(),
        };
        Some(format!(
            "set start_at to {} to pick up where the run stopped{last}",
            cursor.resume_offset
        ))
    }
}

fn status_of(error: Option<&LoadError>) -> RunStatus {
    if error.is_some() {
        RunStatus::Aborted
    } else {
        RunStatus::Done
    }
}

/// Receives progress and the terminal state of each step.
pub trait Reporter {
    /// Called after every committed batch.
    fn batch_committed(&self, _cursor: &ResumeCursor) {}

    /// Called once per step with its terminal state.
    fn finished(&self, report: &RunReport);
}

/// Reporter that only emits `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn finished(&self, report: &RunReport) {
        let step = report.step.as_deref().unwrap_or("-");
        match (report.status, &report.cursor) {
            (RunStatus::Done, Some(cursor)) => info!(
                step,
                committed = cursor.committed,
                batches = cursor.batches_committed,
                resume_offset = cursor.resume_offset,
                "ingest.run.done"
            ),
            (RunStatus::Done, None) => info!(step, outcome = ?report.loop_outcome, "ingest.run.done"),
            (RunStatus::Aborted, _) => error!(
                step,
                kind = ?report.error_kind,
                message = report.message.as_deref().unwrap_or_default(),
                hint = %report.resume_hint().unwrap_or_default(),
                "ingest.run.aborted"
            ),
        }
    }
}
