use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ingest::cursor::{CursorSnapshot, ResumeCursor};
use crate::ingest::error::{LoadError, Result};
use crate::ingest::executor::{run_loop, BatchExecutor, LoopOutcome, LoopSpec, QuerySpec};
use crate::ingest::mapper::{KeySchema, ValueDecoding};
use crate::ingest::partition::{partition_group, BatchPosition};
use crate::ingest::reader::{DelimitedFileReader, Delimiter, Row, RowGroup};
use crate::ingest::report::{Reporter, RunReport};
use crate::store::{GraphSession, GraphStore};

/// Rows per write transaction unless configured otherwise.
pub const DEFAULT_CHUNK_SIZE: usize = 5_000;

/// Everything one file step needs.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Step name used in reports.
    pub name: Option<String>,
    /// Local path of the delimited file.
    pub path: PathBuf,
    /// Field separator.
    pub delimiter: Delimiter,
    /// Explicit key list; `None` derives keys from the header line.
    pub keys: Option<KeySchema>,
    /// Write query receiving the `rows` parameter.
    pub query: QuerySpec,
    /// Data rows to skip before the first batch.
    pub start_at: u64,
    /// Rows per write transaction.
    pub chunk_size: usize,
    /// Field decoding rule for the whole run.
    pub decoding: ValueDecoding,
    /// Row groups buffered ahead of execution; 0 reads inline.
    pub read_ahead: usize,
}

impl IngestConfig {
    /// Config with defaults for everything but the file and the query.
    pub fn new(path: impl Into<PathBuf>, query: QuerySpec) -> Self {
        Self {
            name: None,
            path: path.into(),
            delimiter: Delimiter::default(),
            keys: None,
            query,
            start_at: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            decoding: ValueDecoding::default(),
            read_ahead: 0,
        }
    }
}

/// A fatal run outcome together with the cursor at the time it stopped.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct RunFailure {
    /// What stopped the run.
    #[source]
    pub error: LoadError,
    /// Frozen cursor; `resume_offset` is where to restart.
    pub cursor: CursorSnapshot,
}

/// Streams `config.path` into `store`, one transaction per batch.
///
/// Exactly one session is opened and it is released on every exit path. The
/// reporter sees every committed batch and exactly one terminal report.
pub fn run_ingest<S: GraphStore>(
    store: &S,
    config: &IngestConfig,
    reporter: &dyn Reporter,
) -> std::result::Result<CursorSnapshot, RunFailure> {
    let mut cursor = ResumeCursor::new(config.start_at);
    info!(
        step = config.name.as_deref().unwrap_or("-"),
        path = %config.path.display(),
        start_at = config.start_at,
        chunk_size = config.chunk_size,
        database = store.database(),
        "ingest.run.started"
    );
    let outcome = drive(store, config, &mut cursor, reporter);
    match &outcome {
        Ok(()) => cursor.finish(),
        Err(_) => cursor.abort(),
    }
    let snapshot = cursor.snapshot();
    let report = RunReport::for_file(
        config.name.as_deref(),
        snapshot.clone(),
        outcome.as_ref().err(),
    );
    reporter.finished(&report);
    match outcome {
        Ok(()) => Ok(snapshot),
        Err(error) => Err(RunFailure {
            error,
            cursor: snapshot,
        }),
    }
}

/// Runs a loop step on its own session and reports its totals.
pub fn run_loop_step<S: GraphStore>(
    store: &S,
    name: Option<&str>,
    spec: &LoopSpec,
    reporter: &dyn Reporter,
) -> Result<LoopOutcome> {
    info!(step = name.unwrap_or("-"), database = store.database(), "ingest.loop.started");
    let outcome = store
        .open_session()
        .map_err(LoadError::StoreUnavailable)
        .and_then(|mut session| {
            let outcome = run_loop(&mut session, spec)?;
            if let Err(err) = session.close() {
                warn!(error = %err, "ingest.session.close_failed");
            }
            Ok(outcome)
        });
    reporter.finished(&RunReport::for_loop(name, &outcome));
    outcome
}

fn drive<S: GraphStore>(
    store: &S,
    config: &IngestConfig,
    cursor: &mut ResumeCursor,
    reporter: &dyn Reporter,
) -> Result<()> {
    let chunk_size = NonZeroUsize::new(config.chunk_size)
        .ok_or_else(|| LoadError::argument("chunk size must be at least 1"))?;

    let mut reader = DelimitedFileReader::open(&config.path, config.delimiter)?;
    cursor.file_opened();

    let header = reader.read_header()?;
    let schema = resolve_schema(config.keys.as_ref(), header.as_ref())?;
    cursor.header_read();
    debug!(keys = ?schema.keys(), "ingest.header.read");

    let skipped = reader.skip_rows(config.start_at)?;
    if skipped < config.start_at {
        return Err(LoadError::argument(format!(
            "start offset {} exceeds the {} data rows in {}",
            config.start_at,
            skipped,
            config.path.display()
        )));
    }
    debug!(skipped, "ingest.skip.completed");

    let mut session = store.open_session().map_err(LoadError::StoreUnavailable)?;
    cursor.offset_reached();

    let groups = reader.row_groups(chunk_size);
    let mut executor =
        BatchExecutor::new(&mut session, &config.query, &schema, config.decoding);
    let drained = match NonZeroUsize::new(config.read_ahead) {
        None => drain(groups, &mut executor, cursor, chunk_size, reporter),
        Some(capacity) => thread::scope(|scope| {
            let (tx, rx) = mpsc::sync_channel::<Result<RowGroup>>(capacity.get());
            scope.spawn(move || {
                for group in groups {
                    let failed = group.is_err();
                    if tx.send(group).is_err() || failed {
                        break;
                    }
                }
            });
            drain(rx.into_iter(), &mut executor, cursor, chunk_size, reporter)
        }),
    };
    drained?;

    if let Err(err) = session.close() {
        warn!(error = %err, "ingest.session.close_failed");
    }
    Ok(())
}

fn resolve_schema(explicit: Option<&KeySchema>, header: Option<&Row>) -> Result<KeySchema> {
    match (explicit, header) {
        (Some(keys), Some(header)) if keys.len() != header.len() => {
            Err(LoadError::SchemaMismatch {
                row: None,
                expected: keys.len(),
                found: header.len(),
            })
        }
        (Some(keys), _) => Ok(keys.clone()),
        (None, Some(header)) => KeySchema::from_header(header),
        (None, None) => Err(LoadError::argument(
            "file has no header line and no key list was given",
        )),
    }
}

fn drain<I, S>(
    groups: I,
    executor: &mut BatchExecutor<'_, S>,
    cursor: &mut ResumeCursor,
    chunk_size: NonZeroUsize,
    reporter: &dyn Reporter,
) -> Result<()>
where
    I: IntoIterator<Item = Result<RowGroup>>,
    S: GraphSession,
{
    let mut next = BatchPosition::at_row(cursor.start_offset());
    for group in groups {
        let (batches, after) = partition_group(group?, chunk_size, next);
        next = after;
        for batch in &batches {
            executor.execute(batch, cursor)?;
            reporter.batch_committed(cursor);
        }
    }
    Ok(())
}
