#![allow(missing_docs)]

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use graphload::config::JobManifest;
use graphload::ingest::{
    run_ingest, run_job, run_loop_step, Delimiter, IngestConfig, KeySchema, LoopSpec, QuerySpec,
    TracingReporter, ValueDecoding,
};
use graphload::source::LocalArtifacts;
use graphload::store::{
    GraphSession, GraphStore, MemoryGraphStore, QueryParams, SqliteGraphStore, SqliteOptions,
};
use serde_json::json;
use tempfile::TempDir;

const INSERT_NODES: &str = "INSERT INTO nodes (key, labels, properties) \
     SELECT json_extract(value, '$.id'), '[\"Gene\"]', value FROM json_each(:rows)";

fn sqlite(dir: &TempDir) -> SqliteGraphStore {
    SqliteGraphStore::open(dir.path().join("graph.db"), SqliteOptions::default()).expect("open store")
}

fn write_file(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, body).expect("write input");
    path
}

fn read_all(store: &SqliteGraphStore, query: &str) -> Vec<Vec<String>> {
    let mut session = store.open_session().expect("session");
    session
        .read_transaction(query, &QueryParams::new())
        .expect("read")
}

#[test]
fn header_keys_become_row_parameters() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "people.tsv", "id\tdate\nbob\t12/12/12\n");
    let store = MemoryGraphStore::new();

    run_ingest(
        &store,
        &IngestConfig::new(&path, QuerySpec::new("q $rows").unwrap()),
        &TracingReporter,
    )
    .unwrap();

    assert_eq!(store.list_elements("rows"), vec![json!({"id": "bob", "date": "12/12/12"})]);
}

#[test]
fn explicit_key_list_replaces_the_header() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "people.csv", "ID,DATE\nbob,12/12/12\nann,\n");
    let store = MemoryGraphStore::new();
    let mut config = IngestConfig::new(&path, QuerySpec::new("q $rows").unwrap());
    config.delimiter = Delimiter::COMMA;
    config.keys = Some(KeySchema::parse_key_list("name, born").unwrap());

    let snapshot = run_ingest(&store, &config, &TracingReporter).unwrap();

    assert_eq!(snapshot.committed, 2);
    assert_eq!(
        store.list_elements("rows"),
        vec![
            json!({"name": "bob", "born": "12/12/12"}),
            json!({"name": "ann", "born": ""}),
        ]
    );
}

#[test]
fn multi_value_fields_become_lists() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "syn.tsv", "id\tsynonyms\r\nA1\tfoo|bar\r\n\r\nA2\t\r\n");
    let store = MemoryGraphStore::new();
    let mut config = IngestConfig::new(&path, QuerySpec::new("q $rows").unwrap());
    config.decoding = ValueDecoding::MultiValue { separator: '|' };

    let snapshot = run_ingest(&store, &config, &TracingReporter).unwrap();

    assert_eq!(snapshot.committed, 2);
    assert_eq!(
        store.list_elements("rows"),
        vec![
            json!({"id": ["A1"], "synonyms": ["foo", "bar"]}),
            json!({"id": ["A2"], "synonyms": []}),
        ]
    );
}

#[test]
fn loads_into_sqlite_in_batches() {
    let dir = TempDir::new().unwrap();
    let mut body = String::from("id\tname\n");
    for i in 0..1_234 {
        body.push_str(&format!("g{i}\tgene {i}\n"));
    }
    let path = write_file(&dir, "genes.tsv", &body);
    let store = sqlite(&dir);
    let mut config = IngestConfig::new(&path, QuerySpec::new(INSERT_NODES).unwrap());
    config.chunk_size = 100;
    config.read_ahead = 1;

    let snapshot = run_ingest(&store, &config, &TracingReporter).unwrap();

    assert_eq!(snapshot.committed, 1_234);
    assert_eq!(snapshot.batches_committed, 13);
    assert_eq!(read_all(&store, "SELECT count(*) FROM nodes"), vec![vec!["1234".to_string()]]);
    assert_eq!(
        read_all(&store, "SELECT json_extract(properties, '$.name') FROM nodes WHERE key = 'g42'"),
        vec![vec!["gene 42".to_string()]]
    );
}

#[test]
fn loop_step_drains_pending_nodes() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "genes.tsv", "id\tname\na\tx\nb\ty\nc\tz\n");
    let store = sqlite(&dir);
    run_ingest(
        &store,
        &IngestConfig::new(&path, QuerySpec::new(INSERT_NODES).unwrap()),
        &TracingReporter,
    )
    .unwrap();

    let spec = LoopSpec {
        loop_query: "SELECT ids FROM (SELECT json_group_array(key) AS ids, count(*) AS n FROM \
                     (SELECT key FROM nodes WHERE labels = '[\"Gene\"]' ORDER BY key LIMIT 2)) \
                     WHERE n > 0"
            .into(),
        exec_query: "UPDATE nodes SET labels = '[\"Gene\",\"Seen\"]' WHERE key IN \
                     (SELECT ids.value FROM json_each(:nodes) AS batch, json_each(batch.value) AS ids)"
            .into(),
        max_iterations: Some(10),
    };
    let outcome = run_loop_step(&store, Some("mark"), &spec, &TracingReporter).unwrap();

    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.processed, 3);
    assert_eq!(
        read_all(&store, "SELECT count(*) FROM nodes WHERE labels = '[\"Gene\",\"Seen\"]'"),
        vec![vec!["3".to_string()]]
    );
}

#[test]
fn manifest_job_runs_archived_and_plain_steps() {
    let dir = TempDir::new().unwrap();
    let artifacts = dir.path().join("downloads");
    fs::create_dir_all(&artifacts).unwrap();
    fs::write(artifacts.join("edges.tsv"), "src\tdst\na\tb\nb\tc\n").unwrap();

    let mut zip = zip::ZipWriter::new(fs::File::create(artifacts.join("genes.zip")).unwrap());
    zip.start_file("genes.tsv", zip::write::SimpleFileOptions::default())
        .unwrap();
    zip.write_all(b"id\tname\na\tx\nb\ty\nc\tz\n").unwrap();
    zip.finish().unwrap();

    let manifest_path = dir.path().join("job.toml");
    fs::write(
        &manifest_path,
        r#"
[store]
path = "graph.db"
artifacts = "downloads"
synchronous = "normal"

[[step]]
kind = "file"
name = "genes"
file = "genes.zip"
archived = true
query = "INSERT INTO nodes (key, properties) SELECT json_extract(value, '$.id'), value FROM json_each(:rows)"

[[step]]
kind = "file"
name = "edges"
file = "edges.tsv"
chunk_size = 1
query = "INSERT INTO edges (source_key, target_key, type_name) SELECT json_extract(value, '$.src'), json_extract(value, '$.dst'), 'LINKS' FROM json_each(:rows)"
"#,
    )
    .unwrap();

    let manifest = JobManifest::load(Some(manifest_path)).unwrap();
    let store_path = manifest.store.path.clone().unwrap();
    let store = SqliteGraphStore::open(&store_path, manifest.store.options.clone()).unwrap();
    let source = LocalArtifacts::new(&manifest.store.artifacts, &manifest.store.scratch);

    let outcome = run_job(&store, &source, &manifest.steps, &TracingReporter).unwrap();

    assert_eq!(outcome.completed, vec!["genes".to_string(), "edges".to_string()]);
    assert_eq!(outcome.rows_committed, 5);
    assert_eq!(read_all(&store, "SELECT count(*) FROM nodes"), vec![vec!["3".to_string()]]);
    assert_eq!(read_all(&store, "SELECT count(*) FROM edges"), vec![vec!["2".to_string()]]);
    assert!(!manifest.store.scratch.join("genes.tsv").exists());
}
