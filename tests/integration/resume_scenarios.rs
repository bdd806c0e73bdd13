#![allow(missing_docs)]

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use graphload::ingest::{
    run_ingest, CursorState, ErrorKind, IngestConfig, LoadError, QuerySpec, Reporter,
    ResumeCursor, Row, RunReport, RunStatus,
};
use graphload::store::MemoryGraphStore;
use serde_json::Value;
use tempfile::TempDir;

const QUERY: &str = "UNWIND $rows AS row MERGE (g:Gene {id: row.id}) SET g.name = row.name";

fn write_genes(dir: &TempDir, rows: usize) -> PathBuf {
    let path = dir.path().join("genes.tsv");
    let mut body = String::from("id\tname\n");
    for i in 0..rows {
        body.push_str(&format!("{i}\tgene-{i}\n"));
    }
    fs::write(&path, body).expect("write genes");
    path
}

fn config(path: &Path, chunk_size: usize, start_at: u64) -> IngestConfig {
    let mut config = IngestConfig::new(path, QuerySpec::new(QUERY).expect("query"));
    config.chunk_size = chunk_size;
    config.start_at = start_at;
    config
}

fn committed_ids(store: &MemoryGraphStore) -> Vec<String> {
    store
        .list_elements("rows")
        .iter()
        .map(|row| row["id"].as_str().expect("id is a string").to_string())
        .collect()
}

#[derive(Default)]
struct RecordingReporter {
    batches: RefCell<Vec<u64>>,
    reports: RefCell<Vec<RunReport>>,
}

impl Reporter for RecordingReporter {
    fn batch_committed(&self, cursor: &ResumeCursor) {
        self.batches.borrow_mut().push(cursor.committed());
    }

    fn finished(&self, report: &RunReport) {
        self.reports.borrow_mut().push(report.clone());
    }
}

#[test]
fn second_batch_failure_reports_exact_resume_point() {
    let dir = TempDir::new().unwrap();
    let path = write_genes(&dir, 12_000);
    let store = MemoryGraphStore::new();
    store.fail_on_write(2);
    let reporter = RecordingReporter::default();

    let failure = run_ingest(&store, &config(&path, 5_000, 0), &reporter).unwrap_err();

    match &failure.error {
        LoadError::TransactionFailure {
            committed,
            resume_offset,
            last_row,
            ..
        } => {
            assert_eq!(*committed, 5_000);
            assert_eq!(*resume_offset, 5_000);
            assert_eq!(last_row.as_ref(), Some(&Row::from_iter(["4999", "gene-4999"])));
        }
        other => panic!("expected a transaction failure, got {other:?}"),
    }
    assert_eq!(failure.cursor.state, CursorState::Aborted);
    assert_eq!(failure.cursor.committed, 5_000);
    assert_eq!(failure.cursor.resume_offset, 5_000);
    assert_eq!(store.writes().len(), 1);
    assert_eq!(store.write_attempts(), 2);

    assert_eq!(*reporter.batches.borrow(), vec![5_000]);
    let reports = reporter.reports.borrow();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].status, RunStatus::Aborted);
    assert_eq!(reports[0].error_kind, Some(ErrorKind::TransactionFailure));
    assert_eq!(store.session_counts(), (1, 1));
}

#[test]
fn resuming_at_reported_offset_commits_every_row_once() {
    let dir = TempDir::new().unwrap();
    let path = write_genes(&dir, 12_000);
    let store = MemoryGraphStore::new();
    store.fail_on_write(2);
    let reporter = RecordingReporter::default();

    let failure = run_ingest(&store, &config(&path, 5_000, 0), &reporter).unwrap_err();
    let resume_at = failure.cursor.resume_offset;
    let snapshot = run_ingest(&store, &config(&path, 5_000, resume_at), &reporter).unwrap();

    assert_eq!(snapshot.state, CursorState::Done);
    assert_eq!(snapshot.committed, 7_000);
    assert_eq!(snapshot.resume_offset, 12_000);
    let expected: Vec<String> = (0..12_000).map(|i| i.to_string()).collect();
    assert_eq!(committed_ids(&store), expected);
    assert_eq!(store.session_counts(), (2, 2));
}

#[test]
fn rerunning_from_zero_writes_duplicates() {
    let dir = TempDir::new().unwrap();
    let path = write_genes(&dir, 30);
    let store = MemoryGraphStore::new();
    let reporter = RecordingReporter::default();

    run_ingest(&store, &config(&path, 7, 0), &reporter).unwrap();
    run_ingest(&store, &config(&path, 7, 0), &reporter).unwrap();

    let ids = committed_ids(&store);
    assert_eq!(ids.len(), 60);
    assert_eq!(ids.iter().filter(|id| id.as_str() == "0").count(), 2);
}

#[test]
fn start_offset_skips_rows_without_writing_them() {
    let dir = TempDir::new().unwrap();
    let path = write_genes(&dir, 12_000);
    let store = MemoryGraphStore::new();

    let snapshot =
        run_ingest(&store, &config(&path, 5_000, 7_000), &RecordingReporter::default()).unwrap();

    assert_eq!(snapshot.committed, 5_000);
    assert_eq!(snapshot.resume_offset, 12_000);
    assert_eq!(store.writes().len(), 1);
    let ids = committed_ids(&store);
    assert_eq!(ids.first().map(String::as_str), Some("7000"));
    assert_eq!(ids.last().map(String::as_str), Some("11999"));
}

#[test]
fn short_row_aborts_after_earlier_batches_commit() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("genes.tsv");
    let mut body = String::from("id\tname\n");
    for i in 0..10 {
        if i == 7 {
            body.push_str("7\n");
        } else {
            body.push_str(&format!("{i}\tgene-{i}\n"));
        }
    }
    fs::write(&path, body).unwrap();
    let store = MemoryGraphStore::new();

    let failure = run_ingest(&store, &config(&path, 3, 0), &RecordingReporter::default())
        .unwrap_err();

    assert!(matches!(
        failure.error,
        LoadError::SchemaMismatch {
            row: Some(7),
            expected: 2,
            found: 1
        }
    ));
    assert_eq!(failure.cursor.committed, 6);
    assert_eq!(failure.cursor.resume_offset, 6);
    assert_eq!(store.writes().len(), 2);
    assert_eq!(store.write_attempts(), 2);
}

#[test]
fn missing_file_aborts_before_any_session() {
    let dir = TempDir::new().unwrap();
    let store = MemoryGraphStore::new();
    let reporter = RecordingReporter::default();

    let failure = run_ingest(
        &store,
        &config(&dir.path().join("absent.tsv"), 10, 0),
        &reporter,
    )
    .unwrap_err();

    assert_eq!(failure.error.kind(), ErrorKind::FileNotFound);
    assert_eq!(failure.cursor.state, CursorState::Aborted);
    assert_eq!(store.session_counts(), (0, 0));
    assert_eq!(reporter.reports.borrow().len(), 1);
}

#[test]
fn read_ahead_produces_identical_writes() {
    let dir = TempDir::new().unwrap();
    let path = write_genes(&dir, 1_003);

    let inline = MemoryGraphStore::new();
    run_ingest(&inline, &config(&path, 10, 5), &RecordingReporter::default()).unwrap();

    let buffered = MemoryGraphStore::new();
    let mut with_read_ahead = config(&path, 10, 5);
    with_read_ahead.read_ahead = 2;
    run_ingest(&buffered, &with_read_ahead, &RecordingReporter::default()).unwrap();

    assert_eq!(inline.writes(), buffered.writes());
    assert_eq!(inline.writes().len(), 100);
}

#[test]
fn every_batch_is_one_transaction_in_file_order() {
    let dir = TempDir::new().unwrap();
    let path = write_genes(&dir, 25);
    let store = MemoryGraphStore::new();
    let reporter = RecordingReporter::default();

    run_ingest(&store, &config(&path, 10, 0), &reporter).unwrap();

    let sizes: Vec<usize> = store
        .writes()
        .iter()
        .map(|write| {
            write
                .params
                .get("rows")
                .and_then(Value::as_array)
                .map(Vec::len)
                .unwrap_or_default()
        })
        .collect();
    assert_eq!(sizes, vec![10, 10, 5]);
    assert_eq!(*reporter.batches.borrow(), vec![10, 20, 25]);
    assert!(store.writes().iter().all(|write| write.query == QUERY));
}

#[test]
fn carriage_return_inside_a_line_never_becomes_a_row() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("genes.tsv");
    fs::write(&path, "id\tname\nbob\tfoo\rbar\tbaz\n").unwrap();
    let store = MemoryGraphStore::new();

    let failure = run_ingest(&store, &config(&path, 10, 0), &RecordingReporter::default())
        .unwrap_err();

    assert!(matches!(
        failure.error,
        LoadError::SchemaMismatch {
            row: Some(0),
            expected: 2,
            found: 3
        }
    ));
    assert_eq!(failure.cursor.committed, 0);
    assert!(store.writes().is_empty());
}
