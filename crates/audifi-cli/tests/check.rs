use assert_cmd::Command;
use predicates::prelude::*;
use std::fs::write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const AUDIFI_VARS: &[&str] = &[
    "AUDIFI_PROVIDER",
    "AUDIFI_API_KEY",
    "AUDIFI_ENDPOINT",
    "AUDIFI_MODEL",
    "AUDIFI_TIMEOUT_SECS",
    "AUDIFI_MAX_RETRIES",
    "AUDIFI_API_VERSION",
    "RUST_LOG",
];

const ANSWER: &str = r#"Sure! Here is the audit:
```json
[
  {"section": "Audit Report", "details": "An empty contract with nothing to exploit."},
  {"section": "Metric Scores", "details": [
    {"metric": "CodeQuality", "score": 7},
    {"metric": "Security", "score": 9}
  ]},
  {"section": "Suggestions for Improvement", "details": ["Add a license identifier."]},
  {"section": "Risk Levels", "details": [
    {"vulnerability": "Floating pragma", "risk": "Low"}
  ]}
]
```
Hope this helps!"#;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new(answer: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path().join("C.sol"), "contract C {}").unwrap();
        write(dir.path().join("answer.txt"), answer).unwrap();
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn recording(&self) -> PathBuf {
        self.path().join("answer.txt")
    }

    fn audifi(&self) -> Command {
        let mut cmd = Command::cargo_bin("audifi").unwrap();
        for var in AUDIFI_VARS {
            cmd.env_remove(var);
        }
        cmd.current_dir(self.path())
            .env("AUDIFI_PROVIDER", "replay")
            .env("AUDIFI_ENDPOINT", self.recording())
            .env("AUDIFI_API_KEY", "test-key");
        cmd
    }
}

#[test]
fn check_prints_metrics_in_canonical_order() {
    let ws = Workspace::new(ANSWER);
    let output = ws
        .audifi()
        .args(["check", "C.sol", "--no-export"])
        .assert()
        .success()
        .stdout(predicate::str::contains("=== Audit Report ==="))
        .stdout(predicate::str::contains("- Add a license identifier."))
        .stdout(predicate::str::contains("Floating pragma: Low"))
        .get_output()
        .stdout
        .clone();

    let stdout = String::from_utf8(output).unwrap();
    let security = stdout.find("Security: 9/10 (good)").expect("security line");
    let quality = stdout
        .find("CodeQuality: 7/10 (moderate)")
        .expect("code quality line");
    assert!(security < quality);
    assert!(!stdout.contains("\u{1b}["), "piped output must not be coloured");
    assert!(!ws.path().join("C-audit-report.pdf").exists());
}

#[test]
fn missing_file_exits_before_any_model_call() {
    let ws = Workspace::new(ANSWER);
    ws.audifi()
        .env("AUDIFI_ENDPOINT", ws.path().join("no-recording.txt"))
        .env_remove("AUDIFI_API_KEY")
        .args(["check", "Missing.sol", "--no-export"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("File not found"))
        .stderr(predicate::str::contains("Enter your API key").not())
        .stderr(predicate::str::contains("recorded response").not())
        .stderr(predicate::str::contains("model provider").not())
        .stdout(predicate::str::is_empty());
}

#[test]
fn directory_is_rejected() {
    let ws = Workspace::new(ANSWER);
    std::fs::create_dir(ws.path().join("contracts")).unwrap();
    ws.audifi()
        .args(["check", "contracts", "--no-export"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Path is a directory, not a file"));
}

#[test]
fn empty_key_from_prompt_exits_with_failure() {
    let ws = Workspace::new(ANSWER);
    ws.audifi()
        .env_remove("AUDIFI_API_KEY")
        .args(["check", "C.sol", "--no-export"])
        .write_stdin("\n")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Enter your API key"))
        .stderr(predicate::str::contains("API key must not be empty"));
}

#[test]
fn key_and_export_answer_come_from_stdin() {
    let ws = Workspace::new(ANSWER);
    ws.audifi()
        .env_remove("AUDIFI_API_KEY")
        .args(["check", "C.sol"])
        .write_stdin("typed-key\ny\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("PDF report saved to"));
    assert!(ws.path().join("C-audit-report.pdf").exists());
}

#[test]
fn malformed_answer_fails_and_shows_excerpt() {
    let ws = Workspace::new("I am unable to audit this contract right now.");
    ws.audifi()
        .args(["check", "C.sol", "--no-export"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("malformed model output"))
        .stderr(predicate::str::contains("I am unable to audit"));
}

#[test]
fn export_writes_pdf_next_to_source() {
    let ws = Workspace::new(ANSWER);
    ws.audifi()
        .args(["check", "C.sol", "--export"])
        .assert()
        .success();

    let pdf = std::fs::read(ws.path().join("C-audit-report.pdf")).unwrap();
    assert!(pdf.starts_with(b"%PDF"));
}

#[test]
fn export_failure_still_exits_zero() {
    let ws = Workspace::new(ANSWER);
    // A directory squatting on the output name makes the write fail.
    std::fs::create_dir(ws.path().join("C-audit-report.pdf")).unwrap();
    ws.audifi()
        .args(["check", "C.sol", "--export"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Security: 9/10 (good)"))
        .stderr(predicate::str::contains("export failed"));
}

#[test]
fn config_file_selects_provider_and_flags_override_it() {
    let ws = Workspace::new(ANSWER);
    let config = ws.path().join("audifi.toml");
    write(
        &config,
        format!(
            "provider = \"openai\"\nendpoint = {:?}\n",
            ws.recording().display().to_string()
        ),
    )
    .unwrap();

    ws.audifi()
        .env_remove("AUDIFI_PROVIDER")
        .env_remove("AUDIFI_ENDPOINT")
        .args(["--config", config.to_str().unwrap()])
        .args(["check", "C.sol", "--no-export", "--provider", "replay"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Security: 9/10 (good)"));
}

#[test]
fn unknown_provider_is_reported() {
    let ws = Workspace::new(ANSWER);
    ws.audifi()
        .env("AUDIFI_PROVIDER", "mystery")
        .args(["check", "C.sol", "--no-export"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("unsupported provider"));
}
