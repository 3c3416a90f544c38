use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::ok;
use crate::ipc::helpers::{
    get_opt_i64, get_opt_str, get_required_str, require_can, require_db, require_session,
    HandlerErr, Session,
};
use crate::ipc::types::{AppState, Request};
use crate::policy::{can, Action, Role};
use crate::upload::clean_student_number;

const STATUSES: [&str; 3] = ["pending", "approved", "rejected"];

const STUDENT_COLS: &str =
    "id, student_number, first_name, last_name, course, major, year_level, status, created_at, updated_at";

fn student_row_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "studentNumber": r.get::<_, String>(1)?,
        "firstName": r.get::<_, String>(2)?,
        "lastName": r.get::<_, String>(3)?,
        "course": r.get::<_, String>(4)?,
        "major": r.get::<_, String>(5)?,
        "yearLevel": r.get::<_, i64>(6)?,
        "status": r.get::<_, String>(7)?,
        "createdAt": r.get::<_, String>(8)?,
        "updatedAt": r.get::<_, Option<String>>(9)?,
    }))
}

/// Self-service registration; no session needed. New students start pending
/// and stay that way until a registrar approves them.
fn handle_register(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_number = clean_student_number(&get_required_str(params, "studentNumber")?);
    if student_number.is_empty() {
        return Err(HandlerErr::bad_params("missing studentNumber"));
    }
    let first_name = get_required_str(params, "firstName")?;
    let last_name = get_required_str(params, "lastName")?;
    let course = get_required_str(params, "course")?;
    let major = get_opt_str(params, "major").unwrap_or_default();
    let year_level = get_opt_i64(params, "yearLevel").unwrap_or(1);
    if !(1..=6).contains(&year_level) {
        return Err(HandlerErr::bad_params("yearLevel must be 1..=6"));
    }

    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO students(
                id, student_number, first_name, last_name, course, major, year_level, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', ?)",
            (
                &id,
                &student_number,
                &first_name,
                &last_name,
                &course,
                &major,
                year_level,
                &now,
            ),
        )
        .map_err(HandlerErr::db)?;
    if inserted == 0 {
        return Err(HandlerErr::new("conflict", "student number already registered"));
    }

    Ok(json!({ "studentId": id, "studentNumber": student_number, "status": "pending" }))
}

fn set_status(
    conn: &Connection,
    session: &Session,
    params: &serde_json::Value,
    status: &str,
) -> Result<serde_json::Value, HandlerErr> {
    let student_number = clean_student_number(&get_required_str(params, "studentNumber")?);
    let now = Utc::now().to_rfc3339();
    let changed = conn
        .execute(
            "UPDATE students SET status = ?, updated_at = ? WHERE student_number = ?",
            (status, &now, &student_number),
        )
        .map_err(HandlerErr::db)?;
    if changed == 0 {
        return Err(HandlerErr::not_found("student not found"));
    }

    let action = if status == "approved" { "APPROVED" } else { "REJECTED" };
    conn.execute(
        "INSERT INTO grade_audit_log(
            id, actor, action, student_number, detail, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            &session.user_id,
            action,
            &student_number,
            format!("status={}", status),
            &now,
        ),
    )
    .map_err(HandlerErr::db)?;

    Ok(json!({ "studentNumber": student_number, "status": status }))
}

fn handle_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let status = get_opt_str(params, "status");
    if let Some(ref s) = status {
        if !STATUSES.contains(&s.as_str()) {
            return Err(HandlerErr::bad_params(
                "status must be pending, approved or rejected",
            ));
        }
    }

    let sql = format!(
        "SELECT {} FROM students {} ORDER BY last_name, first_name",
        STUDENT_COLS,
        if status.is_some() { "WHERE status = ?" } else { "" }
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    let rows = match status {
        Some(s) => stmt.query_map([&s], student_row_json),
        None => stmt.query_map([], student_row_json),
    }
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db)?;

    Ok(json!({ "students": rows }))
}

fn handle_get(
    conn: &Connection,
    session: &Session,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_number = clean_student_number(&get_required_str(params, "studentNumber")?);
    if !can(session.role, Action::ViewAnyGrades)
        && !(session.role == Role::Student
            && clean_student_number(&session.user_id) == student_number)
    {
        return Err(HandlerErr::new(
            "forbidden",
            "students may only view their own record",
        ));
    }

    let sql = format!("SELECT {} FROM students WHERE student_number = ?", STUDENT_COLS);
    let row = conn
        .query_row(&sql, [&student_number], student_row_json)
        .optional()
        .map_err(HandlerErr::db)?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;

    Ok(json!({ "student": row }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handled = match req.method.as_str() {
        "students.register" => {
            require_db(state).and_then(|conn| handle_register(conn, &req.params))
        }
        "students.approve" | "students.reject" => require_db(state).and_then(|conn| {
            let session = require_session(&req.params)?;
            require_can(&session, Action::ApproveStudents)?;
            let status = if req.method == "students.approve" {
                "approved"
            } else {
                "rejected"
            };
            set_status(conn, &session, &req.params, status)
        }),
        "students.list" => require_db(state).and_then(|conn| {
            let session = require_session(&req.params)?;
            require_can(&session, Action::ViewAnyGrades)?;
            handle_list(conn, &req.params)
        }),
        "students.get" => require_db(state).and_then(|conn| {
            let session = require_session(&req.params)?;
            handle_get(conn, &session, &req.params)
        }),
        _ => return None,
    };

    Some(match handled {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    })
}
