use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/estate.sqlite"

[channel]
handle = "@tbilisi_flats"

[storage]
backend = "fs"
root = "{}/media"

[server]
bind = "127.0.0.1:7391"
"#,
        root.display(),
        root.display()
    );

    let config_path = config_dir.join("estate.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_estate(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = env!("CARGO_BIN_EXE_estate");
    let workdir = config_path.parent().unwrap();
    let output = Command::new(binary)
        .current_dir(workdir)
        .env_remove("ESTATE_CHANNEL_TOKEN")
        .env_remove("ESTATE_API_TOKEN")
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run estate binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_estate(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));

    let (_, _, success) = run_estate(&config_path, &["init"]);
    assert!(success, "second init failed (not idempotent)");
}

#[test]
fn test_sources_before_first_sync() {
    let (_tmp, config_path) = setup_test_env();
    run_estate(&config_path, &["init"]);

    let (stdout, _, success) = run_estate(&config_path, &["sources"]);
    assert!(success);
    assert!(stdout.contains("No sources yet"));
    assert!(stdout.contains("@tbilisi_flats"));
}

#[test]
fn test_extract_preview() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_estate(
        &config_path,
        &["extract", "--preview", "Цена: $120,000\n2+1, 85 м²\n7/12 этаж"],
    );
    assert!(success, "preview failed: {}", stderr);
    assert!(stdout.contains("price:          120000 USD"));
    assert!(stdout.contains("rooms:          2+1"));
    assert!(stdout.contains("floor:          7/12"));
}

#[test]
fn test_extract_on_empty_catalog() {
    let (_tmp, config_path) = setup_test_env();
    run_estate(&config_path, &["init"]);

    let (stdout, _, success) = run_estate(&config_path, &["extract"]);
    assert!(success);
    assert!(stdout.contains("scanned: 0"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_get_missing_listing_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_estate(&config_path, &["init"]);

    let (_, stderr, success) = run_estate(&config_path, &["get", "no-such-id"]);
    assert!(!success);
    assert!(stderr.contains("listing not found"));
}

#[test]
fn test_sync_requires_channel_token() {
    let (_tmp, config_path) = setup_test_env();
    run_estate(&config_path, &["init"]);

    let (_, stderr, success) = run_estate(&config_path, &["sync", "incremental"]);
    assert!(!success);
    assert!(stderr.contains("ESTATE_CHANNEL_TOKEN"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let (tmp, config_path) = setup_test_env();
    let broken = fs::read_to_string(&config_path)
        .unwrap()
        .replace("@tbilisi_flats", "");
    let broken_path = tmp.path().join("config").join("broken.toml");
    fs::write(&broken_path, broken).unwrap();

    let (_, stderr, success) = run_estate(&broken_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("channel.handle"));
}
