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
fn gate_opens_only_inside_active_window() {
    let workspace = temp_dir("registrard-schedule");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "schedule.set",
        json!({
            "session": admin(),
            "course": "BSIT",
            "date": "2025-06-02",
            "startTime": "08:00",
            "endTime": "17:00"
        }),
    );

    let inside = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "schedule.check",
        json!({
            "session": { "userId": "20240001", "role": "student" },
            "course": "BSIT",
            "at": "2025-06-02T12:00:00Z"
        }),
    );
    assert_eq!(inside.get("open").and_then(|v| v.as_bool()), Some(true));

    let after = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "schedule.check",
        json!({
            "session": { "userId": "20240001", "role": "student" },
            "course": "BSIT",
            "at": "2025-06-02T17:00:00Z"
        }),
    );
    assert_eq!(after.get("open").and_then(|v| v.as_bool()), Some(false));

    let other_day = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "schedule.check",
        json!({
            "session": { "userId": "20240001", "role": "student" },
            "course": "BSIT",
            "at": "2025-06-03T12:00:00Z"
        }),
    );
    assert_eq!(other_day.get("open").and_then(|v| v.as_bool()), Some(false));
}

#[test]
fn deactivating_a_window_closes_the_gate_immediately() {
    let workspace = temp_dir("registrard-schedule-toggle");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "schedule.set",
        json!({
            "session": admin(),
            "course": "BSIT",
            "date": "2025-06-02",
            "startTime": "08:00",
            "endTime": "17:00"
        }),
    );
    let open = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "schedule.check",
        json!({
            "session": admin(),
            "course": "BSIT",
            "at": "2025-06-02T09:00:00Z"
        }),
    );
    assert_eq!(open.get("open").and_then(|v| v.as_bool()), Some(true));

    // The write invalidates the cached windows, so the next check cannot be
    // served from a stale entry even inside the TTL.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "schedule.set",
        json!({
            "session": admin(),
            "course": "BSIT",
            "date": "2025-06-02",
            "startTime": "08:00",
            "endTime": "17:00",
            "isActive": false
        }),
    );
    let closed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "schedule.check",
        json!({
            "session": admin(),
            "course": "BSIT",
            "at": "2025-06-02T09:00:00Z"
        }),
    );
    assert_eq!(closed.get("open").and_then(|v| v.as_bool()), Some(false));
}

#[test]
fn switching_workspaces_drops_cached_windows() {
    let first_ws = temp_dir("registrard-schedule-ws-a");
    let second_ws = temp_dir("registrard-schedule-ws-b");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": first_ws.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "schedule.set",
        json!({
            "session": admin(),
            "course": "BSIT",
            "date": "2025-06-02",
            "startTime": "08:00",
            "endTime": "17:00"
        }),
    );
    let open = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "schedule.check",
        json!({
            "session": admin(),
            "course": "BSIT",
            "at": "2025-06-02T09:00:00Z"
        }),
    );
    assert_eq!(open.get("open").and_then(|v| v.as_bool()), Some(true));

    // A fresh workspace with no schedules must not inherit the previous
    // workspace's cached windows, even inside the TTL.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "workspace.select",
        json!({ "path": second_ws.to_string_lossy() }),
    );
    let closed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "schedule.check",
        json!({
            "session": admin(),
            "course": "BSIT",
            "at": "2025-06-02T09:00:00Z"
        }),
    );
    assert_eq!(closed.get("open").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(closed.get("windowCount").and_then(|v| v.as_i64()), Some(0));
}

#[test]
fn schedule_writes_are_admin_only() {
    let workspace = temp_dir("registrard-schedule-gate");
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
        "schedule.set",
        json!({
            "session": { "userId": "registrar@portal", "role": "registrar" },
            "course": "BSIT",
            "date": "2025-06-02",
            "startTime": "08:00",
            "endTime": "17:00"
        }),
    );
    assert_eq!(
        registrar_try.pointer("/error/code").and_then(|v| v.as_str()),
        Some("forbidden")
    );

    let bad_times = request(
        &mut stdin,
        &mut reader,
        "3",
        "schedule.set",
        json!({
            "session": admin(),
            "course": "BSIT",
            "date": "2025-06-02",
            "startTime": "17:00",
            "endTime": "08:00"
        }),
    );
    assert_eq!(
        bad_times.pointer("/error/code").and_then(|v| v.as_str()),
        Some("bad_params")
    );
}
