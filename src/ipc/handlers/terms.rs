use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

use crate::grades::{is_valid_academic_year, is_valid_semester};
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    get_required_str, require_can, require_db, require_session, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::policy::Action;

/// Terms are pre-created by the registrar; nothing in the grade pipeline ever
/// infers one from a year/semester pair it has not seen.
fn handle_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let academic_year = get_required_str(params, "academicYear")?.to_uppercase();
    let semester = get_required_str(params, "semester")?.to_uppercase();
    if !is_valid_academic_year(&academic_year) {
        return Err(HandlerErr::bad_params(
            "academicYear must look like AY_2024_2025",
        ));
    }
    if !is_valid_semester(&semester) {
        return Err(HandlerErr::bad_params(
            "semester must be FIRST, SECOND or MIDYEAR",
        ));
    }

    let id = Uuid::new_v4().to_string();
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO academic_terms(id, academic_year, semester, created_at)
             VALUES (?, ?, ?, ?)",
            (&id, &academic_year, &semester, Utc::now().to_rfc3339()),
        )
        .map_err(HandlerErr::db)?;
    if inserted == 0 {
        return Err(HandlerErr::new("conflict", "academic term already exists"));
    }

    Ok(json!({ "termId": id, "academicYear": academic_year, "semester": semester }))
}

fn handle_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, academic_year, semester FROM academic_terms
             ORDER BY academic_year DESC,
                      CASE semester WHEN 'FIRST' THEN 0 WHEN 'SECOND' THEN 1 ELSE 2 END",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "termId": r.get::<_, String>(0)?,
                "academicYear": r.get::<_, String>(1)?,
                "semester": r.get::<_, String>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(json!({ "terms": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handled = match req.method.as_str() {
        "terms.create" => require_db(state).and_then(|conn| {
            let session = require_session(&req.params)?;
            require_can(&session, Action::ManageTerms)?;
            handle_create(conn, &req.params)
        }),
        "terms.list" => require_db(state).and_then(|conn| {
            let _ = require_session(&req.params)?;
            handle_list(conn)
        }),
        _ => return None,
    };

    Some(match handled {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    })
}
