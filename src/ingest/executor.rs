use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info};

use crate::ingest::cursor::ResumeCursor;
use crate::ingest::error::{LoadError, Result};
use crate::ingest::mapper::{map_row, KeySchema, ValueDecoding};
use crate::ingest::partition::Batch;
use crate::store::{GraphSession, QueryParams};

/// Name of the list parameter carrying a batch's parameter sets.
pub const ROWS_PARAM: &str = "rows";

/// Name of the list parameter carrying a loop iteration's id lists.
pub const NODES_PARAM: &str = "nodes";

/// A write query that receives exactly one list parameter, `rows`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySpec {
    template: String,
}

impl QuerySpec {
    /// Wraps a query template. Blank templates are rejected.
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        if template.trim().is_empty() {
            return Err(LoadError::argument("write query must not be empty"));
        }
        if !template.contains(ROWS_PARAM) {
            debug!(query = %template, "ingest.query.rows_param_unreferenced");
        }
        Ok(Self { template })
    }

    /// Query text.
    pub fn template(&self) -> &str {
        &self.template
    }

    fn bind(&self, rows: Vec<Value>) -> QueryParams {
        QueryParams::single(ROWS_PARAM, Value::Array(rows))
    }
}

/// Runs one write transaction per batch and advances the cursor on commit.
pub struct BatchExecutor<'a, S: GraphSession> {
    session: &'a mut S,
    query: &'a QuerySpec,
    schema: &'a KeySchema,
    decoding: ValueDecoding,
}

impl<'a, S: GraphSession> BatchExecutor<'a, S> {
    /// Executor writing through `session`.
    pub fn new(
        session: &'a mut S,
        query: &'a QuerySpec,
        schema: &'a KeySchema,
        decoding: ValueDecoding,
    ) -> Self {
        Self {
            session,
            query,
            schema,
            decoding,
        }
    }

    /// Maps every row of `batch`, writes them in one transaction and returns
    /// the number of rows committed.
    ///
    /// On a mapping error nothing is written. On a store error nothing is
    /// retried and the returned [`LoadError::TransactionFailure`] carries the
    /// cursor position as of the previous batch.
    pub fn execute(&mut self, batch: &Batch, cursor: &mut ResumeCursor) -> Result<usize> {
        let Some(last_row) = batch.last_row() else {
            return Ok(0);
        };
        cursor.batch_ready(batch.index);
        let mut rows = Vec::with_capacity(batch.len());
        for (offset, row) in (batch.first_row..).zip(&batch.rows) {
            let params = map_row(row, self.schema, self.decoding, Some(offset))?;
            rows.push(params.into_value());
        }
        let params = self.query.bind(rows);
        match self.session.write_transaction(self.query.template(), &params) {
            Ok(summary) => {
                cursor.record_commit(batch.len(), last_row);
                debug!(
                    batch = batch.index,
                    first_row = batch.first_row,
                    rows = batch.len(),
                    rows_affected = summary.rows_affected,
                    committed = cursor.committed(),
                    "ingest.batch.committed"
                );
                Ok(batch.len())
            }
            Err(source) => {
                error!(
                    batch = batch.index,
                    first_row = batch.first_row,
                    committed = cursor.committed(),
                    resume_offset = cursor.resume_offset(),
                    error = %source,
                    "ingest.batch.failed"
                );
                Err(LoadError::TransactionFailure {
                    committed: cursor.committed(),
                    resume_offset: cursor.resume_offset(),
                    last_row: cursor.last_row().cloned(),
                    source,
                })
            }
        }
    }
}

/// A write query repeated while a read query still returns work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopSpec {
    /// Read query; each result row is one list of ids. No rows ends the loop.
    pub loop_query: String,
    /// Write query receiving the id lists as the `nodes` parameter.
    pub exec_query: String,
    /// Upper bound on iterations; `None` loops until the read query is empty.
    #[serde(default)]
    pub max_iterations: Option<u64>,
}

/// Totals of a finished loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoopOutcome {
    /// Write transactions committed.
    pub iterations: u64,
    /// Sum of rows reported by the writes.
    pub processed: u64,
}

/// Alternates the read and write queries of `spec` until the read comes back empty.
pub fn run_loop<S: GraphSession>(session: &mut S, spec: &LoopSpec) -> Result<LoopOutcome> {
    if spec.loop_query.trim().is_empty() || spec.exec_query.trim().is_empty() {
        return Err(LoadError::argument("loop step needs both a loop and an exec query"));
    }
    let mut outcome = LoopOutcome::default();
    loop {
        let pending = session
            .read_transaction(&spec.loop_query, &QueryParams::new())
            .map_err(|source| loop_failure(outcome, source))?;
        if pending.is_empty() {
            break;
        }
        if spec.max_iterations.is_some_and(|max| outcome.iterations >= max) {
            return Err(LoadError::argument(format!(
                "loop did not drain after {} iterations",
                outcome.iterations
            )));
        }
        let nodes: Vec<Value> = pending
            .into_iter()
            .map(|ids| Value::Array(ids.into_iter().map(Value::String).collect()))
            .collect();
        let params = QueryParams::single(NODES_PARAM, Value::Array(nodes));
        let summary = session
            .write_transaction(&spec.exec_query, &params)
            .map_err(|source| loop_failure(outcome, source))?;
        outcome.iterations += 1;
        outcome.processed += summary.rows_affected;
        info!(
            iteration = outcome.iterations,
            processed = outcome.processed,
            "ingest.loop.iteration"
        );
    }
    Ok(outcome)
}

fn loop_failure(outcome: LoopOutcome, source: crate::store::StoreError) -> LoadError {
    error!(
        iterations = outcome.iterations,
        processed = outcome.processed,
        error = %source,
        "ingest.loop.failed"
    );
    LoadError::LoopFailure {
        iterations: outcome.iterations,
        processed: outcome.processed,
        source,
    }
}
