//! Smoke tests for the `sous` binary. None of these reach the network:
//! each command fails or finishes before an embedding or LLM call.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn sous_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_sous"))
}

fn setup_test_env() -> (TempDir, PathBuf, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let project = root.join("notes");
    fs::create_dir_all(&project).unwrap();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let config_path = config_dir.join("sous.toml");
    fs::write(
        &config_path,
        format!(
            "[content]\nroot = \"{}/content\"\n\n[chunking]\ntokenizer = \"chars\"\n",
            root.display()
        ),
    )
    .unwrap();

    (tmp, config_path, project)
}

fn run_sous(config_path: &Path, args: &[&str], openai_key: Option<&str>) -> (String, String, bool) {
    let binary = sous_binary();
    let mut cmd = Command::new(&binary);
    cmd.env_remove("OPENAI_API_KEY")
        .env_remove("ANTHROPIC_API_KEY")
        .env_remove("SOUS_CONFIG")
        .env("RUST_LOG", "warn")
        .arg("--config")
        .arg(config_path)
        .args(args);
    if let Some(key) = openai_key {
        cmd.env("OPENAI_API_KEY", key);
    }
    let output = cmd
        .output()
        .unwrap_or_else(|e| panic!("Failed to run sous binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_help() {
    let output = Command::new(sous_binary()).arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["analyze", "vectorize", "reload", "chat", "check", "search", "chunks", "stats", "serve"] {
        assert!(stdout.contains(command), "help is missing {}", command);
    }
}

#[test]
fn test_check_reports_no_artifacts() {
    let (_tmp, config, project) = setup_test_env();
    let (stdout, stderr, success) = run_sous(&config, &["check", project.to_str().unwrap()], None);
    assert!(success, "check failed: {}", stderr);
    let status: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(status["intelligence_exists"], false);
    assert_eq!(status["embeddings_exist"], false);
}

#[test]
fn test_vectorize_empty_project() {
    let (_tmp, config, project) = setup_test_env();
    let (stdout, stderr, success) = run_sous(
        &config,
        &["vectorize", project.to_str().unwrap()],
        Some("sk-test"),
    );
    assert!(success, "vectorize failed: {}", stderr);
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["status"], "no_files");
}

#[test]
fn test_vectorize_requires_openai_key() {
    let (_tmp, config, project) = setup_test_env();
    fs::write(project.join("todo.md"), "buy milk").unwrap();
    let (_, stderr, success) = run_sous(&config, &["vectorize", project.to_str().unwrap()], None);
    assert!(!success);
    assert!(stderr.contains("OpenAI API key"), "stderr: {}", stderr);
}

#[test]
fn test_chat_without_artifacts_exits_nonzero() {
    let (_tmp, config, project) = setup_test_env();
    let output = Command::new(sous_binary())
        .env_remove("OPENAI_API_KEY")
        .env_remove("SOUS_CONFIG")
        .env("ANTHROPIC_API_KEY", "sk-ant-test")
        .arg("--config")
        .arg(&config)
        .args(["chat", project.to_str().unwrap(), "What is the architecture?"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let response: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(response["success"], false);
    assert!(response["error"].as_str().unwrap().contains("sous reload"));
}

#[test]
fn test_stats_text_output() {
    let (_tmp, config, project) = setup_test_env();
    let (stdout, stderr, success) = run_sous(&config, &["stats", project.to_str().unwrap()], None);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("Project Knowledge: notes"));
    assert!(stdout.contains("not built"));
}

#[test]
fn test_invalid_config_fails() {
    let (_tmp, config, project) = setup_test_env();
    fs::write(&config, "[chunking]\nwindow_tokens = 10\noverlap_tokens = 10\n").unwrap();
    let (_, stderr, success) = run_sous(&config, &["check", project.to_str().unwrap()], None);
    assert!(!success);
    assert!(stderr.contains("overlap_tokens"));
}
