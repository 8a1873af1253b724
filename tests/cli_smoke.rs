use std::process::Command;

use tempfile::tempdir;

fn digest() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_digest"));
    for var in [
        "VERTEX_ACCESS_TOKEN",
        "VERTEX_PROJECT",
        "PROJECT",
        "VERTEX_REGION",
        "REGION",
        "VERTEX_BASE_URL",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn models_lists_registry() {
    let output = digest().arg("models").output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("text-bison\ttext-bison@001\tText Bison"));
    assert!(lines[1].starts_with("code-bison\tcode-bison@001\tCode Bison"));
    assert!(lines[1].ends_with("top_k_top_p=false"));
}

#[test]
fn run_without_credentials_fails_cleanly() {
    let dir = tempdir().unwrap();
    let data = dir.path().join("rows.json");
    std::fs::write(&data, r#"[{"region": "EMEA", "sales": 10}]"#).unwrap();
    let out = dir.path().join("report.html");

    let output = digest()
        .args(["run", "--question", "What stands out?"])
        .arg("--data")
        .arg(&data)
        .arg("--out")
        .arg(&out)
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("VERTEX_ACCESS_TOKEN"), "{stderr}");
    assert!(!out.exists());
}

#[test]
fn run_rejects_unknown_mode() {
    let dir = tempdir().unwrap();
    let data = dir.path().join("rows.json");
    std::fs::write(&data, "[]").unwrap();

    let output = digest()
        .args(["run", "--question", "q", "--mode", "rows"])
        .arg("--data")
        .arg(&data)
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("row_or_all"), "{stderr}");
}
