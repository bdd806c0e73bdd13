#![allow(missing_docs)]

use std::fs;
use std::path::PathBuf;

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::TempDir;

const INSERT_NODES: &str = "INSERT INTO nodes (key, properties) \
     SELECT json_extract(value, '$.id'), value FROM json_each(:rows)";

fn genes(dir: &TempDir, rows: usize) -> PathBuf {
    let path = dir.path().join("genes.tsv");
    let mut body = String::from("id\tname\n");
    for i in 0..rows {
        body.push_str(&format!("{i}\tgene-{i}\n"));
    }
    fs::write(&path, body).expect("write genes");
    path
}

fn json_stdout(output: &[u8]) -> Value {
    serde_json::from_slice(output).expect("stdout is json")
}

#[test]
fn load_reports_done_as_json() {
    let dir = TempDir::new().unwrap();
    let input = genes(&dir, 25);
    let db = dir.path().join("graph.db");

    let output = cargo_bin_cmd!("graphload")
        .args(["--format", "json", "load"])
        .arg(&input)
        .args(["--query", INSERT_NODES, "--chunk-size", "10"])
        .arg("--store")
        .arg(&db)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let report = json_stdout(&output);
    assert_eq!(report["status"], "done");
    assert_eq!(report["cursor"]["committed"], 25);
    assert_eq!(report["cursor"]["batches_committed"], 3);
    assert_eq!(report["cursor"]["resume_offset"], 25);
}

#[test]
fn store_path_comes_from_the_environment() {
    let dir = TempDir::new().unwrap();
    let input = genes(&dir, 3);
    let db = dir.path().join("env.db");

    cargo_bin_cmd!("graphload")
        .env("GRAPHLOAD_STORE", &db)
        .arg("load")
        .arg(&input)
        .args(["--query", INSERT_NODES])
        .assert()
        .success();

    assert!(db.exists());
}

#[test]
fn start_offset_beyond_the_data_exits_with_failure() {
    let dir = TempDir::new().unwrap();
    let input = genes(&dir, 5);

    let output = cargo_bin_cmd!("graphload")
        .args(["--format", "json", "load", "--dry-run", "--start-at", "9"])
        .arg(&input)
        .args(["--query", "q :rows"])
        .assert()
        .code(1)
        .get_output()
        .stdout
        .clone();

    let report = json_stdout(&output);
    assert_eq!(report["status"], "aborted");
    assert_eq!(report["error_kind"], "argument_error");
    assert_eq!(report["cursor"]["state"], "aborted");
}

#[test]
fn mismatched_key_list_is_reported() {
    let dir = TempDir::new().unwrap();
    let input = genes(&dir, 5);

    let output = cargo_bin_cmd!("graphload")
        .args(["--format", "json", "load", "--dry-run", "--keys", "id,name,extra"])
        .arg(&input)
        .args(["--query", "q :rows"])
        .assert()
        .code(1)
        .get_output()
        .stdout
        .clone();

    assert_eq!(json_stdout(&output)["error_kind"], "schema_mismatch");
}

#[test]
fn load_without_store_is_a_usage_error() {
    let dir = TempDir::new().unwrap();
    let input = genes(&dir, 1);

    cargo_bin_cmd!("graphload")
        .env_remove("GRAPHLOAD_STORE")
        .arg("load")
        .arg(&input)
        .args(["--query", "q :rows"])
        .assert()
        .code(2);
}

#[test]
fn run_executes_a_manifest() {
    let dir = TempDir::new().unwrap();
    genes(&dir, 12);
    let manifest = dir.path().join("job.toml");
    fs::write(
        &manifest,
        format!(
            r#"
[store]
path = "graph.db"

[[step]]
kind = "file"
name = "genes"
file = "genes.tsv"
chunk_size = 5
query = "{INSERT_NODES}"
"#
        ),
    )
    .unwrap();

    let output = cargo_bin_cmd!("graphload")
        .args(["--format", "json", "run"])
        .arg(&manifest)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let report = json_stdout(&output);
    assert_eq!(report["step"], "genes");
    assert_eq!(report["cursor"]["committed"], 12);
    assert!(dir.path().join("graph.db").exists());
}

#[test]
fn completions_are_generated() {
    let output = cargo_bin_cmd!("graphload")
        .args(["completions", "bash"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert!(String::from_utf8_lossy(&output).contains("graphload"));
}

#[test]
fn run_without_store_path_is_a_usage_error() {
    let dir = TempDir::new().unwrap();
    genes(&dir, 3);
    let manifest = dir.path().join("job.toml");
    fs::write(
        &manifest,
        format!(
            r#"
[[step]]
kind = "file"
name = "genes"
file = "genes.tsv"
query = "{INSERT_NODES}"
"#
        ),
    )
    .unwrap();

    cargo_bin_cmd!("graphload")
        .arg("run")
        .arg(&manifest)
        .assert()
        .code(2);

    cargo_bin_cmd!("graphload")
        .args(["run", "--dry-run"])
        .arg(&manifest)
        .assert()
        .success();
}
