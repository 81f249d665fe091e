use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn rsx_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("rsx");
    path
}

const RESUMES: &str = "ID,Resume_str,Resume_html,Category\n\
1,Senior Rust engineer building storage engines and compilers,,ENGINEERING\n\
2,Payroll and benefits specialist in human resources,,HR\n\
3,,<div><p>Go engineer</p><script>track()</script></div>,ENGINEERING\n\
,Orphan resume without an id,,HR\n";

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let data_dir = root.join("data");
    fs::create_dir_all(&data_dir).unwrap();
    fs::write(data_dir.join("Resume.csv"), RESUMES).unwrap();

    let config_content = format!(
        r#"[data]
source_path = "{root}/data/Resume.csv"
upload_dir = "{root}/data/uploads"

[embedding]
kind = "local"
dims = 128
batch_size = 2

[store]
path = "{root}/data/rsx.sqlite"
collection = "cv_embeddings"

[retrieval]
top_k = 3
"#,
        root = root.display()
    );

    let config_path = config_dir.join("rsx.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_rsx(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = rsx_binary();
    let mut cmd = Command::new(&binary);
    for (key, _) in std::env::vars() {
        if key.starts_with("RSX_") {
            cmd.env_remove(key);
        }
    }
    let workdir = config_path.parent().unwrap().parent().unwrap();
    let output = cmd
        .current_dir(workdir)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("--progress")
        .arg("off")
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run rsx binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_load_reports_stats() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_rsx(&config, &["load"]);
    assert!(success, "load failed: {}", stderr);
    assert!(stdout.contains("rows:              4"), "{}", stdout);
    assert!(stdout.contains("missing id:        1"), "{}", stdout);
    assert!(stdout.contains("used:              3 (1 excluded)"), "{}", stdout);
}

#[test]
fn test_load_json() {
    let (_tmp, config) = setup_test_env();
    let (stdout, _, success) = run_rsx(&config, &["load", "--json"]);
    assert!(success);
    let stats: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(stats["total_rows_raw"], 4);
    assert_eq!(stats["rows_used"], 3);
    assert_eq!(stats["rows_missing_id"], 1);
    assert_eq!(stats["html_non_empty"], 1);
    assert!(stats.get("error").is_none());
}

#[test]
fn test_load_missing_file_reports_error() {
    let (tmp, config) = setup_test_env();
    let missing = tmp.path().join("nope.csv");
    let (stdout, _, success) = run_rsx(&config, &["load", missing.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("used:              0"));
    assert!(stdout.contains("error:"));
}

#[test]
fn test_index_is_idempotent() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_rsx(&config, &["index"]);
    assert!(success, "index failed: {}", stderr);
    assert!(stdout.contains("indexed:    3 resumes"), "{}", stdout);

    let (stdout, _, success) = run_rsx(&config, &["index"]);
    assert!(success);
    assert!(stdout.contains("up to date: 3 resumes"), "{}", stdout);
}

#[test]
fn test_query_ranks_and_filters() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) =
        run_rsx(&config, &["query", "rust storage engineer", "--json"]);
    assert!(success, "query failed: {}", stderr);
    let hits: Vec<serde_json::Value> = serde_json::from_str(&stdout).unwrap();
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0]["id"], "1");
    assert!(hits[0]["distance"].as_f64().unwrap() <= hits[1]["distance"].as_f64().unwrap());

    let (stdout, _, success) = run_rsx(
        &config,
        &["query", "engineer", "--category", "HR", "--top-k", "5", "--json"],
    );
    assert!(success);
    let hits: Vec<serde_json::Value> = serde_json::from_str(&stdout).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["id"], "2");
    assert_eq!(hits[0]["metadata"]["category"], "HR");
}

#[test]
fn test_query_human_output() {
    let (_tmp, config) = setup_test_env();
    let (stdout, _, success) = run_rsx(&config, &["query", "go engineer", "--top-k", "1"]);
    assert!(success);
    assert!(stdout.starts_with("1. ["), "{}", stdout);
    assert!(stdout.contains("category: ENGINEERING"));
    assert!(!stdout.contains("2. ["));
}

#[test]
fn test_show_derives_text_from_html() {
    let (_tmp, config) = setup_test_env();
    let (stdout, _, success) = run_rsx(&config, &["show", "3", "--html"]);
    assert!(success);
    assert!(stdout.contains("id:       3"));
    assert!(stdout.contains("--- Text ---\nGo engineer\n"));
    assert!(stdout.contains("<script>"));

    let (_, stderr, success) = run_rsx(&config, &["show", "99"]);
    assert!(!success);
    assert!(stderr.contains("Resume not found: 99"));
}

#[test]
fn test_summarize_falls_back_without_chat() {
    let (_tmp, config) = setup_test_env();
    let (stdout, _, success) = run_rsx(&config, &["summarize", "2"]);
    assert!(success);
    assert_eq!(
        stdout.trim(),
        "Payroll and benefits specialist in human resources"
    );
}

#[test]
fn test_status_adopt_reset_cycle() {
    let (tmp, config) = setup_test_env();

    let (stdout, _, success) = run_rsx(&config, &["status"]);
    assert!(success);
    assert!(stdout.contains("entries:     0"));
    assert!(stdout.contains("indexed:     never"));
    assert!(stdout.contains("state:       stale"));

    run_rsx(&config, &["index"]);
    let (stdout, _, _) = run_rsx(&config, &["status"]);
    assert!(stdout.contains("entries:     3"), "{}", stdout);
    assert!(stdout.contains("state:       fresh"), "{}", stdout);

    let upload = tmp.path().join("export.xlsx.csv");
    fs::write(&upload, "id;resume_str;category\n7;Nurse practitioner;HEALTH\n8;ICU nurse;HEALTH\n").unwrap();
    let (stdout, stderr, success) = run_rsx(&config, &["adopt", upload.to_str().unwrap()]);
    assert!(success, "adopt failed: {}", stderr);
    assert!(stdout.contains("Resume.csv"));

    let (stdout, _, _) = run_rsx(&config, &["status"]);
    assert!(stdout.contains("(adopted)"), "{}", stdout);
    assert!(stdout.contains("entries:     0"));
    assert!(stdout.contains("pending:     reindex"));

    let (stdout, _, success) = run_rsx(&config, &["index"]);
    assert!(success);
    assert!(stdout.contains("indexed:    2 resumes"), "{}", stdout);
    assert!(stdout.contains("reset:      no"));

    let (stdout, _, _) = run_rsx(&config, &["query", "nurse", "--json"]);
    let hits: Vec<serde_json::Value> = serde_json::from_str(&stdout).unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|h| h["metadata"]["category"] == "HEALTH"));

    let (stdout, _, success) = run_rsx(&config, &["reset"]);
    assert!(success);
    assert!(stdout.contains("ok"));
    let (stdout, _, _) = run_rsx(&config, &["status"]);
    assert!(stdout.contains("entries:     0"));
    assert!(stdout.contains("indexed:     never"));
}

#[test]
fn test_explicit_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("config").join("absent.toml");
    fs::create_dir_all(missing.parent().unwrap()).unwrap();
    let (_, stderr, success) = run_rsx(&missing, &["status"]);
    assert!(!success);
    assert!(stderr.contains("Config file not found"));
}

#[test]
fn test_remote_kind_without_credentials_fails_fast() {
    let (_tmp, config) = setup_test_env();
    let content = fs::read_to_string(&config)
        .unwrap()
        .replace("kind = \"local\"", "kind = \"remote\"");
    fs::write(&config, content).unwrap();

    let (_, stderr, success) = run_rsx(&config, &["index"]);
    assert!(!success);
    assert!(stderr.contains("base URL"), "{}", stderr);
}
