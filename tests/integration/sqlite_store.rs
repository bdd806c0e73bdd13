#![allow(missing_docs)]

use std::fs;
use std::path::PathBuf;

use graphload::ingest::{run_ingest, IngestConfig, LoadError, QuerySpec, TracingReporter};
use graphload::store::{
    GraphSession, GraphStore, QueryParams, SqliteGraphStore, SqliteOptions, StoreError,
    Synchronous,
};
use serde_json::json;
use tempfile::TempDir;

const INSERT_NODES: &str = "INSERT INTO nodes (key, properties) \
     SELECT json_extract(value, '$.id'), value FROM json_each(@rows)";

fn store_in(dir: &TempDir) -> SqliteGraphStore {
    let options = SqliteOptions {
        synchronous: Synchronous::Normal,
        ..SqliteOptions::default()
    };
    SqliteGraphStore::open(dir.path().join("graph.db"), options).expect("open store")
}

fn genes(dir: &TempDir, ids: &[&str]) -> PathBuf {
    let path = dir.path().join("genes.tsv");
    let mut body = String::from("id\tname\n");
    for id in ids {
        body.push_str(&format!("{id}\tname-{id}\n"));
    }
    fs::write(&path, body).expect("write genes");
    path
}

fn count(store: &SqliteGraphStore, table: &str) -> String {
    let mut session = store.open_session().expect("session");
    let rows = session
        .read_transaction(&format!("SELECT count(*) FROM {table}"), &QueryParams::new())
        .expect("count");
    rows[0][0].clone()
}

#[test]
fn failed_batch_rolls_back_and_earlier_batches_stay() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    store
        .open_session()
        .unwrap()
        .write_transaction("CREATE UNIQUE INDEX nodes_key_unique ON nodes (key)", &QueryParams::new())
        .unwrap();
    let path = genes(&dir, &["a", "b", "c", "d", "e", "f", "g", "b", "h"]);
    let mut config = IngestConfig::new(&path, QuerySpec::new(INSERT_NODES).unwrap());
    config.chunk_size = 3;

    let failure = run_ingest(&store, &config, &TracingReporter).unwrap_err();

    match &failure.error {
        LoadError::TransactionFailure {
            committed,
            resume_offset,
            source,
            ..
        } => {
            assert_eq!(*committed, 6);
            assert_eq!(*resume_offset, 6);
            assert!(matches!(source, StoreError::Sqlite(_)));
        }
        other => panic!("expected a transaction failure, got {other:?}"),
    }
    assert_eq!(count(&store, "nodes"), "6");
}

#[test]
fn loading_twice_duplicates_nodes() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    let path = genes(&dir, &["a", "b", "c"]);
    let config = IngestConfig::new(&path, QuerySpec::new(INSERT_NODES).unwrap());

    run_ingest(&store, &config, &TracingReporter).unwrap();
    run_ingest(&store, &config, &TracingReporter).unwrap();

    assert_eq!(count(&store, "nodes"), "6");
}

#[test]
fn scalar_parameters_bind_by_name() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    let mut session = store.open_session().unwrap();
    let mut params = QueryParams::new();
    params.insert("src", json!("a"));
    params.insert("dst", json!("b"));
    params.insert("props", json!({"weight": 2}));
    let summary = session
        .write_transaction(
            "INSERT INTO edges (source_key, target_key, type_name, properties) VALUES ($src, $dst, 'LINKS', :props)",
            &params,
        )
        .unwrap();
    assert_eq!(summary.rows_affected, 1);
    let rows = session
        .read_transaction(
            "SELECT source_key, target_key, json_extract(properties, '$.weight') FROM edges",
            &QueryParams::new(),
        )
        .unwrap();
    assert_eq!(rows, vec![vec!["a".to_string(), "b".to_string(), "2".to_string()]]);
    session.close().unwrap();
}

#[test]
fn store_is_named_after_the_file() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    assert_eq!(store.database(), "graph");
    assert_eq!(store.path(), dir.path().join("graph.db"));
}
