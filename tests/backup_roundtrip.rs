use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_registrard");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn registrard");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn admin() -> serde_json::Value {
    json!({ "userId": "admin@portal", "role": "admin" })
}

#[test]
fn export_then_import_into_fresh_workspace() {
    let source_ws = temp_dir("registrard-backup-src");
    let target_ws = temp_dir("registrard-backup-dst");
    let bundle = temp_dir("registrard-backup-out").join("portal.zip");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": source_ws.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "terms.create",
        json!({ "session": admin(), "academicYear": "AY_2024_2025", "semester": "FIRST" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.register",
        json!({
            "studentNumber": "20240001",
            "firstName": "Juan",
            "lastName": "Dela Cruz",
            "course": "BSIT"
        }),
    );

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "backup.export",
        json!({ "session": admin(), "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(
        exported.get("bundleFormat").and_then(|v| v.as_str()),
        Some("registrar-workspace-v1")
    );
    assert!(exported
        .get("dbSha256")
        .and_then(|v| v.as_str())
        .map(|s| s.len() == 64)
        .unwrap_or(false));

    // Import the bundle into a fresh workspace; data follows.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "workspace.select",
        json!({ "path": target_ws.to_string_lossy() }),
    );
    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "backup.import",
        json!({ "session": admin(), "inPath": bundle.to_string_lossy() }),
    );
    assert_eq!(
        imported.get("bundleFormatDetected").and_then(|v| v.as_str()),
        Some("registrar-workspace-v1")
    );

    let terms = request_ok(&mut stdin, &mut reader, "7", "terms.list", json!({ "session": admin() }));
    assert_eq!(
        terms.pointer("/terms/0/academicYear").and_then(|v| v.as_str()),
        Some("AY_2024_2025")
    );
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "students.get",
        json!({ "session": admin(), "studentNumber": "20240001" }),
    );
    assert_eq!(
        student.pointer("/student/lastName").and_then(|v| v.as_str()),
        Some("Dela Cruz")
    );
}

#[test]
fn backup_endpoints_are_admin_only() {
    let workspace = temp_dir("registrard-backup-gate");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let registrar_try = request(
        &mut stdin,
        &mut reader,
        "2",
        "backup.export",
        json!({
            "session": { "userId": "registrar@portal", "role": "registrar" },
            "outPath": "/tmp/should-not-happen.zip"
        }),
    );
    assert_eq!(
        registrar_try.pointer("/error/code").and_then(|v| v.as_str()),
        Some("forbidden")
    );
}
