use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

fn chanlog_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("chanlog");
    path
}

/// Backend section appended to the generated config.
enum Backend {
    Sqlite,
    /// Elasticsearch at an address nothing listens on.
    Unreachable,
}

fn write_config(root: &Path, backend: Backend, name: &str) -> PathBuf {
    write_config_with_flush(root, backend, name, 100, 1)
}

fn write_config_with_flush(
    root: &Path,
    backend: Backend,
    name: &str,
    batch_size: usize,
    flush_interval_secs: u64,
) -> PathBuf {
    let backend_section = match backend {
        Backend::Sqlite => format!(
            "[backend]\nkind = \"sqlite\"\n\n[db]\npath = \"{}/data/chanlog.sqlite\"\n",
            root.display()
        ),
        Backend::Unreachable => "[backend]\nkind = \"elasticsearch\"\n\n[elasticsearch]\nurl = \"http://127.0.0.1:9\"\ntimeout_secs = 2\n".to_string(),
    };

    let config_content = format!(
        r##"[logs]
root = "{root}/data/logs"

[channels]
allow = ["#general", "#dev"]

[indexer]
batch_size = {batch_size}
flush_interval_secs = {flush_interval_secs}
failure_dir = "{root}/data/failed"
submit_timeout_secs = 2
shutdown_timeout_secs = 2

{backend}"##,
        root = root.display(),
        batch_size = batch_size,
        flush_interval_secs = flush_interval_secs,
        backend = backend_section
    );

    let config_path = root.join("config").join(name);
    fs::write(&config_path, config_content).unwrap();
    config_path
}

fn setup_test_env(backend: Backend) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    fs::create_dir_all(root.join("config")).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();
    let config_path = write_config(&root, backend, "chanlog.toml");
    (tmp, config_path)
}

fn run_chanlog_with_input(
    config_path: &Path,
    args: &[&str],
    input: Option<&str>,
) -> (String, String, bool) {
    let binary = chanlog_binary();
    let mut child = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap_or_else(|e| panic!("Failed to run chanlog binary at {:?}: {}", binary, e));

    {
        let mut stdin = child.stdin.take().unwrap();
        if let Some(input) = input {
            stdin.write_all(input.as_bytes()).unwrap();
        }
    }

    let output = child.wait_with_output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn run_chanlog(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    run_chanlog_with_input(config_path, args, None)
}

fn data_dir(config_path: &Path) -> PathBuf {
    config_path.parent().unwrap().parent().unwrap().join("data")
}

/// Every file under `dir`, sorted.
fn files_in(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
        Err(_) => Vec::new(),
    };
    files.sort();
    files
}

const FEED: &str = r##"{"kind":"names","channel":"#general","nicks":["@alice","bob"]}
{"kind":"join","channel":"#general","actor":"carol!c@example.org"}
{"kind":"message","channel":"#general","actor":"alice","text":"deploy finished"}
{"kind":"action","channel":"#general","actor":"bob","text":"cheers"}
{"kind":"message","channel":"#random","actor":"alice","text":"not logged"}
{"kind":"topic","channel":"#dev","actor":"alice","topic":"release day"}
{"kind":"quit","actor":"alice!a@example.org","reason":"bye"}
"##;

#[test]
fn test_init_creates_directories() {
    let (_tmp, config_path) = setup_test_env(Backend::Sqlite);

    let (stdout, stderr, success) = run_chanlog(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("ok"));

    let data = data_dir(&config_path);
    assert!(data.join("logs").is_dir());
    assert!(data.join("failed").is_dir());
    assert!(data.join("chanlog.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env(Backend::Sqlite);

    let (_, _, success1) = run_chanlog(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_chanlog(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_chanlog(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"), "{}", stderr);
}

#[test]
fn test_run_writes_logs_and_indexes() {
    let (_tmp, config_path) = setup_test_env(Backend::Sqlite);
    run_chanlog(&config_path, &["init"]);

    let (stdout, stderr, success) = run_chanlog_with_input(&config_path, &["run"], Some(FEED));
    assert!(success, "run failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("lines read: 7"), "{}", stdout);
    // join, message, action, topic, quit in #general
    assert!(stdout.contains("lines logged: 5"), "{}", stdout);
    assert!(stdout.contains("documents indexed: 5"), "{}", stdout);

    let logs = data_dir(&config_path).join("logs");
    assert!(!logs.join("random").exists());

    let general = files_in(&logs.join("general"));
    assert_eq!(general.len(), 1);
    let text = fs::read_to_string(&general[0]).unwrap();
    let lines: Vec<&str> = text.lines().map(|l| &l[9..]).collect();
    assert_eq!(
        lines,
        vec![
            "(-) carol joined",
            "<alice> deploy finished",
            "* bob cheers",
            "(-) alice quit (bye)",
        ]
    );

    let dev = files_in(&logs.join("dev"));
    let text = fs::read_to_string(&dev[0]).unwrap();
    assert!(text.trim_end().ends_with("(-) alice changed topic to release day"), "{}", text);

    assert!(files_in(&data_dir(&config_path).join("failed")).is_empty());
}

#[test]
fn test_search_after_run() {
    let (_tmp, config_path) = setup_test_env(Backend::Sqlite);
    run_chanlog(&config_path, &["init"]);
    run_chanlog_with_input(&config_path, &["run"], Some(FEED));

    let (stdout, stderr, success) = run_chanlog(
        &config_path,
        &["search", "--actor", "alice", "--channel", "general", "--json"],
    );
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);
    let results: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let groups = results["groups"].as_array().unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0]["channel"], "general");
    let hits = groups[0]["hits"].as_array().unwrap();
    let formatted: Vec<&str> = hits.iter().map(|h| h["formatted"].as_str().unwrap()).collect();
    assert_eq!(formatted, vec!["<alice> deploy finished", "(-) alice quit (bye)"]);
    assert!(groups[0]["logFilePath"]
        .as_str()
        .unwrap()
        .contains("general/general."));

    let (stdout, _, success) = run_chanlog(&config_path, &["search", "--text", "DEPLOY"]);
    assert!(success);
    assert!(stdout.contains("<alice> deploy finished"), "{}", stdout);
    assert!(stdout.contains("1 hits in 1 files"), "{}", stdout);
}

#[test]
fn test_search_rejects_channel_outside_allow_list() {
    let (_tmp, config_path) = setup_test_env(Backend::Sqlite);
    run_chanlog(&config_path, &["init"]);

    let (_, stderr, success) = run_chanlog(
        &config_path,
        &["search", "--actor", "alice", "--channel", "#random"],
    );
    assert!(!success);
    assert!(stderr.contains("none of the selected channels"), "{}", stderr);
}

#[test]
fn test_search_without_filters() {
    let (_tmp, config_path) = setup_test_env(Backend::Sqlite);
    run_chanlog(&config_path, &["init"]);
    let (stdout, _, success) = run_chanlog(&config_path, &["search"]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_malformed_feed_lines_are_skipped() {
    let (_tmp, config_path) = setup_test_env(Backend::Sqlite);
    run_chanlog(&config_path, &["init"]);

    let feed = "garbage\n{\"kind\":\"join\",\"channel\":\"#general\",\"actor\":\"alice\"}\n{\"kind\":\"join\"}\n";
    let (stdout, stderr, success) = run_chanlog_with_input(&config_path, &["run"], Some(feed));
    assert!(success, "run failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("records skipped: 2"), "{}", stdout);
    assert!(stdout.contains("lines logged: 1"), "{}", stdout);
    assert!(stderr.contains("skipping malformed feed record"), "{}", stderr);
}

#[test]
fn test_import_and_partitions() {
    let (tmp, config_path) = setup_test_env(Backend::Sqlite);
    let old = tmp.path().join("general.2023-12-31");
    fs::write(
        &old,
        "23:00:00 (-) alice joined\n23:00:05 <alice> happy new year\n23:59:59 * bob waves\n",
    )
    .unwrap();

    let (stdout, stderr, success) = run_chanlog(
        &config_path,
        &["import", "--create-index", old.to_str().unwrap()],
    );
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("documents: 3"), "{}", stdout);

    let (stdout, _, success) = run_chanlog(&config_path, &["search", "--text", "new year", "--json"]);
    assert!(success);
    let results: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(results["groups"][0]["partitionKey"], "general.2023-12-31");
    assert_eq!(results["groups"][0]["hits"][0]["timestamp"], "23:00:05");

    let (stdout, _, success) = run_chanlog(&config_path, &["partitions", "--json"]);
    assert!(success);
    let partitions: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(partitions[0]["partitionKey"], "general.2023-12-31");
    assert_eq!(partitions[0]["documents"], 3);

    // Importing again does not duplicate.
    run_chanlog(&config_path, &["import", old.to_str().unwrap()]);
    let (stdout, _, _) = run_chanlog(&config_path, &["partitions", "--json"]);
    let partitions: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(partitions[0]["documents"], 3);
}

#[test]
fn test_import_without_index_fails() {
    let (tmp, config_path) = setup_test_env(Backend::Sqlite);
    let old = tmp.path().join("general.2023-12-31");
    fs::write(&old, "23:00:00 (-) alice joined\n").unwrap();

    let (_, stderr, success) = run_chanlog(&config_path, &["import", old.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("index is not ready"), "{}", stderr);
}

#[test]
fn test_import_aborts_on_bad_line() {
    let (tmp, config_path) = setup_test_env(Backend::Sqlite);
    let old = tmp.path().join("general.2023-12-31");
    fs::write(&old, "23:00:00 (-) alice joined\nthis is not a log line\n").unwrap();

    let (_, stderr, success) = run_chanlog(
        &config_path,
        &["import", "--create-index", old.to_str().unwrap()],
    );
    assert!(!success);
    assert!(stderr.contains("general.2023-12-31:2"), "{}", stderr);
}

#[test]
fn test_unreachable_backend_persists_batch_then_replays() {
    let (tmp, config_path) = setup_test_env(Backend::Unreachable);

    let (stdout, stderr, success) = run_chanlog_with_input(&config_path, &["run"], Some(FEED));
    assert!(success, "run failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("documents persisted for replay: 5"), "{}", stdout);

    // Logging did not depend on the backend.
    let logs = data_dir(&config_path).join("logs");
    assert_eq!(files_in(&logs.join("general")).len(), 1);

    let failed = files_in(&data_dir(&config_path).join("failed"));
    assert!(!failed.is_empty());
    let body: String = failed
        .iter()
        .map(|p| fs::read_to_string(p).unwrap())
        .collect();
    assert_eq!(body.lines().count(), 10);
    assert!(body.contains("\"_index\":\"general."));

    // Replay the persisted batches into a reachable backend.
    let sqlite_config = write_config(tmp.path(), Backend::Sqlite, "sqlite.toml");
    run_chanlog(&sqlite_config, &["init"]);
    let mut args = vec!["replay", "--remove"];
    let paths: Vec<String> = failed.iter().map(|p| p.display().to_string()).collect();
    args.extend(paths.iter().map(String::as_str));
    let (stdout, stderr, success) = run_chanlog(&sqlite_config, &args);
    assert!(success, "replay failed: stdout={}, stderr={}", stdout, stderr);
    assert!(files_in(&data_dir(&config_path).join("failed")).is_empty());

    let (stdout, _, success) = run_chanlog(&sqlite_config, &["search", "--actor", "bob"]);
    assert!(success);
    assert!(stdout.contains("* bob cheers"), "{}", stdout);
}

#[test]
fn test_batch_buffered_at_end_of_input_is_persisted_on_shutdown() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir_all(tmp.path().join("config")).unwrap();
    // No timer and a threshold the feed never reaches: only the final flush sends.
    let config_path = write_config_with_flush(
        tmp.path(),
        Backend::Unreachable,
        "chanlog.toml",
        10_000,
        0,
    );

    let (stdout, stderr, success) = run_chanlog_with_input(&config_path, &["run"], Some(FEED));
    assert!(success, "run failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("documents persisted for replay: 5"), "{}", stdout);
    assert!(stdout.contains("final batch: "), "{}", stdout);

    let failed = files_in(&data_dir(&config_path).join("failed"));
    assert_eq!(failed.len(), 1, "{:?}", failed);
    let body = fs::read_to_string(&failed[0]).unwrap();
    assert_eq!(body.lines().count(), 10);
    for line in [
        "(-) carol joined",
        "<alice> deploy finished",
        "* bob cheers",
        "(-) alice changed topic to release day",
        "(-) alice quit (bye)",
    ] {
        assert!(body.contains(line), "{} missing from {}", line, body);
    }
    assert!(!body.contains("not logged"));
}
