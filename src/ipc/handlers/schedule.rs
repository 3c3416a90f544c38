use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::ok;
use crate::ipc::helpers::{
    get_opt_str, get_required_str, require_can, require_db, require_session, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::policy::Action;
use crate::schedule::{self, AccessWindow, WindowCache};

fn parse_date(raw: &str) -> Result<String, HandlerErr> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .map_err(|_| HandlerErr::bad_params("date must be YYYY-MM-DD"))
}

fn handle_set(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let course = get_required_str(params, "course")?;
    let date = parse_date(&get_required_str(params, "date")?)?;
    let start_time = get_required_str(params, "startTime")?;
    let end_time = get_required_str(params, "endTime")?;
    let is_active = params.get("isActive").and_then(|v| v.as_bool()).unwrap_or(true);

    let (Some(start), Some(end)) = (
        schedule::parse_hhmm(&start_time),
        schedule::parse_hhmm(&end_time),
    ) else {
        return Err(HandlerErr::bad_params("times must be HH:MM"));
    };
    if start >= end {
        return Err(HandlerErr::bad_params("startTime must be before endTime"));
    }

    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO access_schedules(id, course, date, start_time, end_time, is_active, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(course, date) DO UPDATE SET
            start_time = excluded.start_time,
            end_time = excluded.end_time,
            is_active = excluded.is_active,
            updated_at = excluded.created_at",
        (
            Uuid::new_v4().to_string(),
            &course,
            &date,
            &start_time,
            &end_time,
            is_active as i64,
            &now,
        ),
    )
    .map_err(HandlerErr::db)?;

    // Stale windows must not outlive a write.
    state
        .window_cache
        .invalidate(&schedule::cache_key(&course, &date));

    Ok(json!({ "course": course, "date": date, "isActive": is_active }))
}

fn handle_delete(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let course = get_required_str(params, "course")?;
    let date = parse_date(&get_required_str(params, "date")?)?;

    let changed = conn
        .execute(
            "DELETE FROM access_schedules WHERE course = ? AND date = ?",
            (&course, &date),
        )
        .map_err(HandlerErr::db)?;
    if changed == 0 {
        return Err(HandlerErr::not_found("schedule not found"));
    }

    state
        .window_cache
        .invalidate(&schedule::cache_key(&course, &date));

    Ok(json!({ "course": course, "date": date, "deleted": true }))
}

fn handle_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course = get_opt_str(params, "course");
    let mut sql = String::from(
        "SELECT course, date, start_time, end_time, is_active FROM access_schedules",
    );
    if course.is_some() {
        sql.push_str(" WHERE course = ?");
    }
    sql.push_str(" ORDER BY date, course");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "course": r.get::<_, String>(0)?,
            "date": r.get::<_, String>(1)?,
            "startTime": r.get::<_, String>(2)?,
            "endTime": r.get::<_, String>(3)?,
            "isActive": r.get::<_, i64>(4)? != 0,
        }))
    };
    let rows = match course {
        Some(c) => stmt.query_map([&c], map_row),
        None => stmt.query_map([], map_row),
    }
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db)?;

    Ok(json!({ "schedules": rows }))
}

fn load_windows(conn: &Connection, course: &str, date: &str) -> anyhow::Result<Vec<AccessWindow>> {
    let mut stmt = conn.prepare(
        "SELECT start_time, end_time, is_active FROM access_schedules
         WHERE course = ? AND date = ?",
    )?;
    let windows = stmt
        .query_map((course, date), |r| {
            Ok(AccessWindow {
                start_time: r.get(0)?,
                end_time: r.get(1)?,
                is_active: r.get::<_, i64>(2)? != 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(windows)
}

/// Portal-open gate. Reads go through the TTL cache so a page-load storm does
/// not hammer the schedules table.
fn handle_check(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course = get_required_str(params, "course")?;
    let at = match get_opt_str(params, "at") {
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| HandlerErr::bad_params("at must be RFC 3339"))?,
        None => Utc::now(),
    };
    let date = at.date_naive().format("%Y-%m-%d").to_string();

    let AppState {
        db, window_cache, ..
    } = state;
    let conn = db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("bad_params", "no workspace selected"))?;

    // The cache clock is server time; `at` only feeds the open test. A
    // caller-supplied instant must not decide when an entry expires.
    let windows = schedule::resolve_windows(window_cache, &course, &date, Utc::now(), || {
        load_windows(conn, &course, &date)
    })
    .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let open = schedule::is_open_at(&windows, at.time());
    Ok(json!({
        "course": course,
        "date": date,
        "open": open,
        "windowCount": windows.len(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handled = match req.method.as_str() {
        "schedule.set" | "schedule.delete" => {
            let gated = require_session(&req.params)
                .and_then(|session| require_can(&session, Action::ManageSchedule));
            match gated {
                Ok(()) if req.method == "schedule.set" => handle_set(state, &req.params),
                Ok(()) => handle_delete(state, &req.params),
                Err(e) => Err(e),
            }
        }
        "schedule.list" => require_db(state).and_then(|conn| {
            let _ = require_session(&req.params)?;
            handle_list(conn, &req.params)
        }),
        "schedule.check" => {
            let session_ok = require_session(&req.params);
            match session_ok {
                Ok(_) => handle_check(state, &req.params),
                Err(e) => Err(e),
            }
        }
        _ => return None,
    };

    Some(match handled {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    })
}
