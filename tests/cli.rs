//! Tests of the `cmap` binary that need neither a network nor a model.

use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let repo = root.join("repo");
    fs::create_dir_all(&repo).unwrap();
    fs::write(repo.join("auth.py"), "def check(jwt_token):\n    pass\n").unwrap();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let config_content = format!(
        r#"[scan]
root = "{}/repo"

[index]
output_dir = "{}/out"
"#,
        root.display(),
        root.display()
    );
    let config_path = config_dir.join("cmap.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_cmap(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_cmap"))
        .arg("--config")
        .arg(config_path)
        .arg("--progress")
        .arg("off")
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run cmap: {}", e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn record(control_id: &str, uuid: &str, statement_uuid: &str) -> serde_json::Value {
    let ns = "urn:control-mapper:test";
    json!({
        "uuid": uuid,
        "control-id": control_id,
        "props": [
            {"name": "control-status", "value": "applicable and not satisfied", "ns": ns},
            {"name": "control-name", "value": control_id, "ns": ns},
            {"name": "control-description", "value": "", "ns": ns},
            {"name": "control-explanation", "value": "", "ns": ns},
            {"name": "control-configuration", "value": [], "ns": ns}
        ],
        "annotations": [{"name": "source-code-reference", "value": ["auth.py"], "ns": ns}],
        "statements": [{"statement-id": format!("{}_smt.a", control_id), "uuid": statement_uuid, "description": ""}]
    })
}

#[test]
fn test_index_requires_embeddings() {
    let (_tmp, config_path) = setup_test_env();
    let (_, stderr, success) = run_cmap(&config_path, &["index"]);
    assert!(!success);
    assert!(stderr.contains("requires embeddings"), "stderr={}", stderr);
}

#[test]
fn test_generate_requires_model() {
    let (tmp, config_path) = setup_test_env();
    let controls = tmp.path().join("controls.json");
    fs::write(&controls, "[]").unwrap();
    let (_, stderr, success) = run_cmap(&config_path, &["generate", controls.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("requires embeddings"), "stderr={}", stderr);
}

#[test]
fn test_empty_search_query() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, _, success) = run_cmap(&config_path, &["search", "  "]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_check_passes_on_unique_ids() {
    let (tmp, config_path) = setup_test_env();
    let out = tmp.path().join("out");
    fs::create_dir_all(&out).unwrap();
    let doc = json!({
        "implemented_requirements": [record("ac-1", "r-1", "s-1"), record("ac-2", "r-2", "s-2")],
        "_metadata": {"generation_info": {}}
    });
    fs::write(
        out.join("implemented_requirements.json"),
        serde_json::to_string_pretty(&doc).unwrap(),
    )
    .unwrap();

    let (stdout, stderr, success) = run_cmap(&config_path, &["check"]);
    assert!(success, "stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("records: 2"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_check_fails_on_shared_statement_uuid() {
    let (tmp, config_path) = setup_test_env();
    let file = tmp.path().join("records.json");
    let records = json!([record("ac-1", "r-1", "shared"), record("ac-2", "r-2", "shared")]);
    fs::write(&file, records.to_string()).unwrap();

    let (stdout, _, success) = run_cmap(&config_path, &["check", file.to_str().unwrap()]);
    assert!(!success);
    assert_eq!(stdout.matches("problem:").count(), 1);
    assert!(stdout.contains("duplicate statement id 'shared' in control ac-2"));
}

#[test]
fn test_completions() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, _, success) = run_cmap(&config_path, &["completions", "bash"]);
    assert!(success);
    assert!(stdout.contains("cmap"));
}

#[test]
fn test_invalid_config_rejected() {
    let (_tmp, config_path) = setup_test_env();
    fs::write(&config_path, "[retrieval]\ntop_k = 0\n").unwrap();
    let (_, stderr, success) = run_cmap(&config_path, &["check"]);
    assert!(!success);
    assert!(stderr.contains("top_k"));
}
