use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::ok;
use crate::ipc::helpers::{
    get_opt_i64, get_opt_str, get_required_str, require_can, require_db, require_session,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::policy::Action;

/// Seed offerings for every curriculum subject matching the filter. Idempotent:
/// subjects already offered in the term are counted as skipped, not errors.
fn handle_seed(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let term_id = get_required_str(params, "termId")?;
    let course = get_required_str(params, "course")?;
    let major = get_opt_str(params, "major").unwrap_or_default();
    let year_level = get_opt_i64(params, "yearLevel");
    let semester = get_opt_str(params, "semester").map(|s| s.to_uppercase());

    let term_exists: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM academic_terms WHERE id = ?",
            [&term_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db)?;
    if term_exists == 0 {
        return Err(HandlerErr::not_found("academic term not found"));
    }

    let mut sql = String::from(
        "SELECT id FROM curriculum_subjects WHERE course = ? AND major = ?",
    );
    let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(course), Box::new(major)];
    if let Some(y) = year_level {
        sql.push_str(" AND year_level = ?");
        values.push(Box::new(y));
    }
    if let Some(s) = semester {
        sql.push_str(" AND semester = ?");
        values.push(Box::new(s));
    }

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    let subject_ids: Vec<String> = stmt
        .query_map(
            rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())),
            |r| r.get(0),
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let now = Utc::now().to_rfc3339();
    let mut created = 0usize;
    let mut skipped = 0usize;
    for subject_id in &subject_ids {
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO subject_offerings(
                    id, curriculum_subject_id, term_id, is_active, created_at)
                 VALUES (?, ?, ?, 1, ?)",
                (Uuid::new_v4().to_string(), subject_id, &term_id, &now),
            )
            .map_err(HandlerErr::db)?;
        if inserted > 0 {
            created += 1;
        } else {
            skipped += 1;
        }
    }

    Ok(json!({ "termId": term_id, "created": created, "skipped": skipped }))
}

fn handle_set_active(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let offering_id = get_required_str(params, "offeringId")?;
    let is_active = params
        .get("isActive")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| HandlerErr::bad_params("missing isActive"))?;

    let changed = conn
        .execute(
            "UPDATE subject_offerings SET is_active = ? WHERE id = ?",
            (is_active as i64, &offering_id),
        )
        .map_err(HandlerErr::db)?;
    if changed == 0 {
        return Err(HandlerErr::not_found("offering not found"));
    }

    Ok(json!({ "offeringId": offering_id, "isActive": is_active }))
}

fn handle_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let term_id = get_required_str(params, "termId")?;
    let mut stmt = conn
        .prepare(
            "SELECT o.id, o.curriculum_subject_id, o.is_active,
                    c.course, c.major, c.course_code, c.title, c.lecture_units + c.lab_units
             FROM subject_offerings o
             JOIN curriculum_subjects c ON c.id = o.curriculum_subject_id
             WHERE o.term_id = ?
             ORDER BY c.course, c.major, c.course_code",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([&term_id], |r| {
            Ok(json!({
                "offeringId": r.get::<_, String>(0)?,
                "subjectId": r.get::<_, String>(1)?,
                "isActive": r.get::<_, i64>(2)? != 0,
                "course": r.get::<_, String>(3)?,
                "major": r.get::<_, String>(4)?,
                "courseCode": r.get::<_, String>(5)?,
                "title": r.get::<_, String>(6)?,
                "creditUnits": r.get::<_, f64>(7)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(json!({ "offerings": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handled = match req.method.as_str() {
        "offerings.seed" => require_db(state).and_then(|conn| {
            let session = require_session(&req.params)?;
            require_can(&session, Action::ManageOfferings)?;
            handle_seed(conn, &req.params)
        }),
        "offerings.setActive" => require_db(state).and_then(|conn| {
            let session = require_session(&req.params)?;
            require_can(&session, Action::ManageOfferings)?;
            handle_set_active(conn, &req.params)
        }),
        "offerings.list" => require_db(state).and_then(|conn| {
            let _ = require_session(&req.params)?;
            handle_list(conn, &req.params)
        }),
        _ => return None,
    };

    Some(match handled {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    })
}
