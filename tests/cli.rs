//! End-to-end tests that run the `docvault` binary.
//!
//! Each test gets its own temp directory holding the config, both
//! databases, and a `files/` tree to sync.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn docvault_binary() -> PathBuf {
    if let Some(path) = option_env!("CARGO_BIN_EXE_docvault") {
        return PathBuf::from(path);
    }
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    path.pop();
    path.push("docvault");
    path
}

struct Env {
    _tmp: TempDir,
    config: PathBuf,
    files: PathBuf,
}

impl Env {
    fn new(extra_config: &str) -> Self {
        let tmp = TempDir::new().unwrap();
        let root = fs::canonicalize(tmp.path()).unwrap();
        let files = root.join("files");
        fs::create_dir_all(&files).unwrap();
        fs::create_dir_all(root.join("config")).unwrap();

        let config = root.join("config").join("docvault.toml");
        fs::write(
            &config,
            format!(
                "[db]\npath = \"{}/data/vault.sqlite\"\n\n[extraction]\nmin_text_chars = 10\n{}",
                root.display(),
                extra_config
            ),
        )
        .unwrap();

        Self {
            _tmp: tmp,
            config,
            files,
        }
    }

    fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.files.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    fn run(&self, args: &[&str]) -> (String, String, bool) {
        run_docvault(&self.config, args)
    }

    fn sync(&self) -> String {
        let files = self.files.display().to_string();
        let (stdout, stderr, ok) = self.run(&["sync", &files]);
        assert!(ok, "sync failed: stdout={stdout}, stderr={stderr}");
        stdout
    }
}

fn run_docvault(config: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(docvault_binary())
        .arg("--config")
        .arg(config)
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docvault: {}", e));
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

const BUDGET: &str = "# Budget\n\nQuarterly budget review for the facilities team.\n";
const ONBOARDING: &str = "Onboarding checklist: laptop, badge, and parking permit.\n";

#[test]
fn init_creates_both_databases() {
    let env = Env::new("");
    let (stdout, stderr, ok) = env.run(&["init"]);
    assert!(ok, "init failed: {stderr}");
    assert!(stdout.contains("Database initialized successfully."));

    let data = env.config.parent().unwrap().parent().unwrap().join("data");
    assert!(data.join("vault.sqlite").exists());
    assert!(data.join("index.sqlite").exists());

    // Re-running is harmless.
    let (_, _, ok) = env.run(&["init"]);
    assert!(ok);
}

#[test]
fn sync_then_search() {
    let env = Env::new("");
    env.write("budget.md", BUDGET);
    env.write("hr/onboarding.txt", ONBOARDING);
    env.run(&["init"]);

    let stdout = env.sync();
    assert!(stdout.contains("  scanned: 2 files"), "{stdout}");
    assert!(stdout.contains("  new: 2"), "{stdout}");
    assert!(stdout.contains("  indexed: 2"), "{stdout}");
    assert!(stdout.contains("  failed: 0"), "{stdout}");
    assert!(stdout.trim_end().ends_with("ok"), "{stdout}");

    let (search, _, ok) = env.run(&["search", "parking permit"]);
    assert!(ok);
    assert!(search.contains("onboarding.txt"), "{search}");
    assert!(!search.contains("budget.md"), "{search}");
    assert!(search.contains("excerpt:"), "{search}");
}

#[test]
fn resync_reports_unchanged() {
    let env = Env::new("");
    env.write("budget.md", BUDGET);
    env.sync();

    let stdout = env.sync();
    assert!(stdout.contains("  new: 0"), "{stdout}");
    assert!(stdout.contains("  unchanged: 1"), "{stdout}");
    assert!(stdout.contains("  indexed: 0"), "{stdout}");
}

#[test]
fn moved_file_is_found_at_new_path() {
    let env = Env::new("");
    let old = env.write("inbox/budget.md", BUDGET);
    env.sync();

    fs::create_dir_all(env.files.join("archive")).unwrap();
    fs::rename(&old, env.files.join("archive/budget-2024.md")).unwrap();
    let stdout = env.sync();
    assert!(stdout.contains("  moved: 1"), "{stdout}");
    assert!(stdout.contains("  indexed: 0"), "{stdout}");
    assert!(stdout.contains("  missing: 0"), "{stdout}");

    let (search, _, _) = env.run(&["search", "facilities"]);
    assert!(search.contains("archive/budget-2024.md"), "{search}");
    assert!(!search.contains("inbox/"), "{search}");
}

#[test]
fn dry_run_changes_nothing() {
    let env = Env::new("");
    env.write("budget.md", BUDGET);
    let files = env.files.display().to_string();

    let (stdout, _, ok) = env.run(&["sync", &files, "--dry-run"]);
    assert!(ok);
    assert!(stdout.contains("(dry-run)"), "{stdout}");
    assert!(stdout.contains("  new: 1"), "{stdout}");

    let (search, _, _) = env.run(&["search", "facilities"]);
    assert!(search.contains("No results."), "{search}");
}

#[test]
fn sync_json_summary() {
    let env = Env::new("");
    env.write("budget.md", BUDGET);
    env.write("bad.docx", "this is not a zip archive at all");
    let files = env.files.display().to_string();

    let (stdout, stderr, ok) = env.run(&["sync", &files, "--json"]);
    assert!(ok, "{stderr}");
    let summary: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(summary["scanned"], 2);
    assert_eq!(summary["plan"]["new"], 2);
    assert_eq!(summary["indexed"], 1);
    let failures = summary["failures"].as_array().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0]["stage"], "extract");
    assert_eq!(failures[0]["permanent"], true);
    assert!(failures[0]["path"].as_str().unwrap().ends_with("bad.docx"));
}

#[test]
fn search_json_output() {
    let env = Env::new("");
    env.write("budget.md", BUDGET);
    env.sync();

    let (stdout, _, ok) = env.run(&["search", "budget", "--json", "-k", "3"]);
    assert!(ok);
    let out: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(out["top_k"], 3);
    let results = out["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["file_type"], "md");
    assert_eq!(results[0]["fingerprint"].as_str().unwrap().len(), 64);
}

#[test]
fn delete_by_path_and_hash() {
    let env = Env::new("");
    let budget = env.write("budget.md", BUDGET);
    env.write("onboarding.txt", ONBOARDING);
    env.sync();

    let budget_path = budget.display().to_string();
    let (stdout, _, ok) = env.run(&["delete", "--path", &budget_path]);
    assert!(ok);
    assert!(stdout.starts_with("deleted"), "{stdout}");
    let (search, _, _) = env.run(&["search", "facilities"]);
    assert!(search.contains("No results."), "{search}");

    let (json, _, _) = env.run(&["search", "laptop", "--json"]);
    let out: serde_json::Value = serde_json::from_str(&json).unwrap();
    let hash = out["results"][0]["fingerprint"].as_str().unwrap().to_string();
    let (stdout, _, ok) = env.run(&["delete", "--hash", &hash]);
    assert!(ok);
    assert!(stdout.starts_with("deleted"), "{stdout}");

    let (stdout, _, ok) = env.run(&["delete", "--hash", &hash]);
    assert!(ok);
    assert!(stdout.contains("not found"), "{stdout}");
}

#[test]
fn delete_rejects_malformed_hash() {
    let env = Env::new("");
    let (_, stderr, ok) = env.run(&["delete", "--hash", "abc123"]);
    assert!(!ok);
    assert!(stderr.contains("Invalid fingerprint"), "{stderr}");
}

#[test]
fn vanished_file_ages_out() {
    let env = Env::new("[sync]\nmissing_syncs_before_delete = 2\n");
    let budget = env.write("budget.md", BUDGET);
    env.write("onboarding.txt", ONBOARDING);
    env.sync();
    fs::remove_file(&budget).unwrap();

    let first = env.sync();
    assert!(first.contains("  missing: 1"), "{first}");
    assert!(first.contains("  deleted: 0"), "{first}");
    let (files, _, _) = env.run(&["files", "--all"]);
    assert!(files.contains("[missing x1]"), "{files}");

    let second = env.sync();
    assert!(second.contains("  deleted: 1"), "{second}");
    let (files, _, _) = env.run(&["files", "--all"]);
    assert!(!files.contains("budget.md"), "{files}");
    assert!(files.contains("onboarding.txt"), "{files}");
}

#[test]
fn index_adds_without_ageing() {
    let env = Env::new("");
    let budget = env.write("budget.md", BUDGET);
    env.sync();
    fs::remove_file(&budget).unwrap();

    let extra = env.write("later/onboarding.txt", ONBOARDING);
    let extra = extra.display().to_string();
    let (stdout, _, ok) = env.run(&["index", &extra]);
    assert!(ok);
    assert!(stdout.starts_with("index "), "{stdout}");
    assert!(stdout.contains("  new: 1"), "{stdout}");
    assert!(stdout.contains("  missing: 0"), "{stdout}");

    let (search, _, _) = env.run(&["search", "facilities"]);
    assert!(search.contains("budget.md"), "{search}");
}

#[test]
fn status_and_files() {
    let env = Env::new("");
    env.write("budget.md", BUDGET);
    env.write("copy/budget.md", BUDGET);
    env.write("onboarding.txt", ONBOARDING);
    env.sync();

    let (status, _, ok) = env.run(&["status"]);
    assert!(ok);
    assert!(status.contains("Documents:   2"), "{status}");
    assert!(status.contains("2 indexed"), "{status}");
    assert!(status.contains("With copies: 1"), "{status}");
    assert!(status.contains("Index entries: 2"), "{status}");

    let (files, _, ok) = env.run(&["files", "--name", "onboarding"]);
    assert!(ok);
    assert!(files.contains("onboarding.txt"), "{files}");
    assert!(!files.contains("budget.md"), "{files}");

    let (files, _, _) = env.run(&["files"]);
    assert!(files.contains("(+1 copies)"), "{files}");
}

#[test]
fn invalid_config_fails() {
    let env = Env::new("[sync]\nmissing_syncs_before_delete = 1\n");
    let (_, stderr, ok) = env.run(&["status"]);
    assert!(!ok);
    assert!(stderr.contains("missing_syncs_before_delete"), "{stderr}");
}
