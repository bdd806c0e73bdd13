use std::fs;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{FileStep, Step, StepAction};
use crate::ingest::cursor::{CursorSnapshot, ResumeCursor};
use crate::ingest::error::LoadError;
use crate::ingest::pipeline::{run_ingest, run_loop_step};
use crate::ingest::report::{Reporter, RunReport};
use crate::source::ArtifactSource;
use crate::store::GraphStore;

/// Totals of a job whose steps all finished.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobOutcome {
    /// Step names in execution order.
    pub completed: Vec<String>,
    /// Rows committed across file steps.
    pub rows_committed: u64,
    /// Write transactions committed across loop steps.
    pub loop_iterations: u64,
}

/// The step that halted a job.
#[derive(Debug, Error)]
#[error("step '{step}' failed: {error}")]
pub struct StepFailure {
    /// Name of the failing step.
    pub step: String,
    /// Why it failed.
    #[source]
    pub error: LoadError,
    /// Cursor of a failed file step; `resume_offset` is where to restart it.
    pub cursor: Option<CursorSnapshot>,
    /// Steps that finished before the failure.
    pub completed: Vec<String>,
}

/// Runs `steps` in order against `store`, halting on the first fatal error.
///
/// Archived inputs are unpacked through `source` and the unpacked file is
/// removed once its step ends, whatever the outcome.
pub fn run_job<S, A>(
    store: &S,
    source: &A,
    steps: &[Step],
    reporter: &dyn Reporter,
) -> Result<JobOutcome, StepFailure>
where
    S: GraphStore,
    A: ArtifactSource + ?Sized,
{
    let mut outcome = JobOutcome::default();
    for step in steps {
        info!(step = %step.name, "ingest.job.step_started");
        let result = match &step.action {
            StepAction::File(file) => run_file_step(store, source, &step.name, file, reporter)
                .map(|cursor| outcome.rows_committed += cursor.committed),
            StepAction::Loop(spec) => run_loop_step(store, Some(&step.name), spec, reporter)
                .map(|totals| outcome.loop_iterations += totals.iterations)
                .map_err(|error| (error, None)),
        };
        if let Err((error, cursor)) = result {
            warn!(step = %step.name, completed = outcome.completed.len(), "ingest.job.halted");
            return Err(StepFailure {
                step: step.name.clone(),
                error,
                cursor,
                completed: outcome.completed,
            });
        }
        outcome.completed.push(step.name.clone());
    }
    info!(
        steps = outcome.completed.len(),
        rows = outcome.rows_committed,
        "ingest.job.done"
    );
    Ok(outcome)
}

fn run_file_step<S, A>(
    store: &S,
    source: &A,
    name: &str,
    step: &FileStep,
    reporter: &dyn Reporter,
) -> Result<CursorSnapshot, (LoadError, Option<CursorSnapshot>)>
where
    S: GraphStore,
    A: ArtifactSource + ?Sized,
{
    let local = match resolve_input(source, step) {
        Ok(local) => local,
        Err(error) => {
            let mut cursor = ResumeCursor::new(step.config.start_at);
            cursor.abort();
            let snapshot = cursor.snapshot();
            reporter.finished(&RunReport::for_file(Some(name), snapshot.clone(), Some(&error)));
            return Err((error, Some(snapshot)));
        }
    };
    let result = run_ingest(store, &step.ingest_config(&local.path), reporter);
    if local.extracted {
        if let Err(err) = fs::remove_file(&local.path) {
            warn!(path = %local.path.display(), error = %err, "source.scratch.cleanup_failed");
        }
    }
    result.map_err(|failure| (failure.error, Some(failure.cursor)))
}

struct LocalInput {
    path: PathBuf,
    extracted: bool,
}

fn resolve_input<A: ArtifactSource + ?Sized>(
    source: &A,
    step: &FileStep,
) -> Result<LocalInput, LoadError> {
    let fetched = source.fetch_local_file(&step.file)?;
    if !step.archived {
        return Ok(LocalInput {
            path: fetched,
            extracted: false,
        });
    }
    Ok(LocalInput {
        path: source.extract_archive(&fetched)?,
        extracted: true,
    })
}
