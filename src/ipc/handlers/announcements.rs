use chrono::{NaiveDate, Utc};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::ok;
use crate::ipc::helpers::{
    get_opt_str, get_required_str, require_can, require_db, require_session, HandlerErr, Session,
};
use crate::ipc::types::{AppState, Request};
use crate::policy::Action;

const KINDS: [&str; 2] = ["announcement", "event"];

fn handle_create(
    conn: &Connection,
    session: &Session,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let kind = get_opt_str(params, "kind").unwrap_or_else(|| "announcement".to_string());
    if !KINDS.contains(&kind.as_str()) {
        return Err(HandlerErr::bad_params("kind must be announcement or event"));
    }
    let title = get_required_str(params, "title")?;
    let body = get_required_str(params, "body")?;
    let event_date = get_opt_str(params, "eventDate");
    if kind == "event" {
        let Some(ref d) = event_date else {
            return Err(HandlerErr::bad_params("events need an eventDate"));
        };
        if NaiveDate::parse_from_str(d, "%Y-%m-%d").is_err() {
            return Err(HandlerErr::bad_params("eventDate must be YYYY-MM-DD"));
        }
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO announcements(id, kind, title, body, event_date, posted_by, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &kind,
            &title,
            &body,
            &event_date,
            &session.user_id,
            Utc::now().to_rfc3339(),
        ),
    )
    .map_err(HandlerErr::db)?;

    Ok(json!({ "announcementId": id, "kind": kind }))
}

fn handle_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "announcementId")?;
    let title = get_opt_str(params, "title");
    let body = get_opt_str(params, "body");
    let event_date = get_opt_str(params, "eventDate");
    if title.is_none() && body.is_none() && event_date.is_none() {
        return Err(HandlerErr::bad_params("no fields to update"));
    }
    if let Some(ref d) = event_date {
        if NaiveDate::parse_from_str(d, "%Y-%m-%d").is_err() {
            return Err(HandlerErr::bad_params("eventDate must be YYYY-MM-DD"));
        }
    }

    let changed = conn
        .execute(
            "UPDATE announcements SET
                title = COALESCE(?, title),
                body = COALESCE(?, body),
                event_date = COALESCE(?, event_date),
                updated_at = ?
             WHERE id = ?",
            (&title, &body, &event_date, Utc::now().to_rfc3339(), &id),
        )
        .map_err(HandlerErr::db)?;
    if changed == 0 {
        return Err(HandlerErr::not_found("announcement not found"));
    }

    Ok(json!({ "announcementId": id }))
}

fn handle_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "announcementId")?;
    let changed = conn
        .execute("DELETE FROM announcements WHERE id = ?", [&id])
        .map_err(HandlerErr::db)?;
    if changed == 0 {
        return Err(HandlerErr::not_found("announcement not found"));
    }
    Ok(json!({ "announcementId": id, "deleted": true }))
}

fn handle_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let kind = get_opt_str(params, "kind");
    if let Some(ref k) = kind {
        if !KINDS.contains(&k.as_str()) {
            return Err(HandlerErr::bad_params("kind must be announcement or event"));
        }
    }

    let mut sql = String::from(
        "SELECT id, kind, title, body, event_date, posted_by, created_at, updated_at
         FROM announcements",
    );
    if kind.is_some() {
        sql.push_str(" WHERE kind = ?");
    }
    sql.push_str(" ORDER BY created_at DESC");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "announcementId": r.get::<_, String>(0)?,
            "kind": r.get::<_, String>(1)?,
            "title": r.get::<_, String>(2)?,
            "body": r.get::<_, String>(3)?,
            "eventDate": r.get::<_, Option<String>>(4)?,
            "postedBy": r.get::<_, String>(5)?,
            "createdAt": r.get::<_, String>(6)?,
            "updatedAt": r.get::<_, Option<String>>(7)?,
        }))
    };
    let rows = match kind {
        Some(k) => stmt.query_map([&k], map_row),
        None => stmt.query_map([], map_row),
    }
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db)?;

    Ok(json!({ "announcements": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handled = match req.method.as_str() {
        "announcements.create" => require_db(state).and_then(|conn| {
            let session = require_session(&req.params)?;
            require_can(&session, Action::ManageAnnouncements)?;
            handle_create(conn, &session, &req.params)
        }),
        "announcements.update" => require_db(state).and_then(|conn| {
            let session = require_session(&req.params)?;
            require_can(&session, Action::ManageAnnouncements)?;
            handle_update(conn, &req.params)
        }),
        "announcements.delete" => require_db(state).and_then(|conn| {
            let session = require_session(&req.params)?;
            require_can(&session, Action::ManageAnnouncements)?;
            handle_delete(conn, &req.params)
        }),
        "announcements.list" => require_db(state).and_then(|conn| {
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
