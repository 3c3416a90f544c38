use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

use crate::grades::is_valid_semester;
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    get_opt_f64, get_opt_i64, get_opt_str, get_required_str, require_can, require_db,
    require_session, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::policy::Action;

fn handle_add(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course = get_required_str(params, "course")?;
    let major = get_opt_str(params, "major").unwrap_or_default();
    let year_level = get_opt_i64(params, "yearLevel")
        .ok_or_else(|| HandlerErr::bad_params("missing yearLevel"))?;
    if !(1..=6).contains(&year_level) {
        return Err(HandlerErr::bad_params("yearLevel must be 1..=6"));
    }
    let semester = get_required_str(params, "semester")?.to_uppercase();
    if !is_valid_semester(&semester) {
        return Err(HandlerErr::bad_params(
            "semester must be FIRST, SECOND or MIDYEAR",
        ));
    }
    let course_code = get_required_str(params, "courseCode")?.to_uppercase();
    let title = get_required_str(params, "title")?;
    let lecture_units = get_opt_f64(params, "lectureUnits").unwrap_or(0.0);
    let lab_units = get_opt_f64(params, "labUnits").unwrap_or(0.0);
    if lecture_units < 0.0 || lab_units < 0.0 {
        return Err(HandlerErr::bad_params("units must not be negative"));
    }
    let prerequisite = get_opt_str(params, "prerequisite");

    let id = Uuid::new_v4().to_string();
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO curriculum_subjects(
                id, course, major, year_level, semester, course_code, title,
                lecture_units, lab_units, prerequisite)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &id,
                &course,
                &major,
                year_level,
                &semester,
                &course_code,
                &title,
                lecture_units,
                lab_units,
                &prerequisite,
            ),
        )
        .map_err(HandlerErr::db)?;
    if inserted == 0 {
        return Err(HandlerErr::new(
            "conflict",
            "course code already in this curriculum",
        ));
    }

    Ok(json!({ "subjectId": id, "courseCode": course_code }))
}

fn handle_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;

    // Patch semantics: only supplied fields change.
    let mut sets: Vec<String> = Vec::new();
    let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    if let Some(title) = get_opt_str(params, "title") {
        sets.push("title = ?".to_string());
        values.push(Box::new(title));
    }
    if let Some(lec) = get_opt_f64(params, "lectureUnits") {
        if lec < 0.0 {
            return Err(HandlerErr::bad_params("units must not be negative"));
        }
        sets.push("lecture_units = ?".to_string());
        values.push(Box::new(lec));
    }
    if let Some(lab) = get_opt_f64(params, "labUnits") {
        if lab < 0.0 {
            return Err(HandlerErr::bad_params("units must not be negative"));
        }
        sets.push("lab_units = ?".to_string());
        values.push(Box::new(lab));
    }
    if let Some(prereq) = get_opt_str(params, "prerequisite") {
        sets.push("prerequisite = ?".to_string());
        values.push(Box::new(prereq));
    }
    if let Some(year_level) = get_opt_i64(params, "yearLevel") {
        if !(1..=6).contains(&year_level) {
            return Err(HandlerErr::bad_params("yearLevel must be 1..=6"));
        }
        sets.push("year_level = ?".to_string());
        values.push(Box::new(year_level));
    }
    if let Some(semester) = get_opt_str(params, "semester") {
        let semester = semester.to_uppercase();
        if !is_valid_semester(&semester) {
            return Err(HandlerErr::bad_params(
                "semester must be FIRST, SECOND or MIDYEAR",
            ));
        }
        sets.push("semester = ?".to_string());
        values.push(Box::new(semester));
    }
    if sets.is_empty() {
        return Err(HandlerErr::bad_params("no fields to update"));
    }
    values.push(Box::new(subject_id.clone()));

    let sql = format!(
        "UPDATE curriculum_subjects SET {} WHERE id = ?",
        sets.join(", ")
    );
    let changed = conn
        .execute(&sql, rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())))
        .map_err(HandlerErr::db)?;
    if changed == 0 {
        return Err(HandlerErr::not_found("curriculum subject not found"));
    }

    Ok(json!({ "subjectId": subject_id }))
}

fn handle_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;

    let offering_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM subject_offerings WHERE curriculum_subject_id = ?",
            [&subject_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db)?;
    if offering_count > 0 {
        return Err(HandlerErr::new(
            "conflict",
            "subject has offerings; deactivate them first",
        ));
    }

    let changed = conn
        .execute("DELETE FROM curriculum_subjects WHERE id = ?", [&subject_id])
        .map_err(HandlerErr::db)?;
    if changed == 0 {
        return Err(HandlerErr::not_found("curriculum subject not found"));
    }

    Ok(json!({ "subjectId": subject_id, "deleted": true }))
}

/// The curriculum checklist view: every required course for a course/major,
/// optionally narrowed to one year level or semester.
fn handle_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course = get_required_str(params, "course")?;
    let major = get_opt_str(params, "major").unwrap_or_default();
    let year_level = get_opt_i64(params, "yearLevel");
    let semester = get_opt_str(params, "semester").map(|s| s.to_uppercase());

    let mut sql = String::from(
        "SELECT id, course, major, year_level, semester, course_code, title,
                lecture_units, lab_units, prerequisite
         FROM curriculum_subjects
         WHERE course = ? AND major = ?",
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
    sql.push_str(
        " ORDER BY year_level,
                 CASE semester WHEN 'FIRST' THEN 0 WHEN 'SECOND' THEN 1 ELSE 2 END,
                 course_code",
    );

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map(
            rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())),
            |r| {
                Ok(json!({
                    "subjectId": r.get::<_, String>(0)?,
                    "course": r.get::<_, String>(1)?,
                    "major": r.get::<_, String>(2)?,
                    "yearLevel": r.get::<_, i64>(3)?,
                    "semester": r.get::<_, String>(4)?,
                    "courseCode": r.get::<_, String>(5)?,
                    "title": r.get::<_, String>(6)?,
                    "lectureUnits": r.get::<_, f64>(7)?,
                    "labUnits": r.get::<_, f64>(8)?,
                    "prerequisite": r.get::<_, Option<String>>(9)?,
                }))
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(json!({ "subjects": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handled = match req.method.as_str() {
        "curriculum.add" => require_db(state).and_then(|conn| {
            let session = require_session(&req.params)?;
            require_can(&session, Action::ManageCurriculum)?;
            handle_add(conn, &req.params)
        }),
        "curriculum.update" => require_db(state).and_then(|conn| {
            let session = require_session(&req.params)?;
            require_can(&session, Action::ManageCurriculum)?;
            handle_update(conn, &req.params)
        }),
        "curriculum.delete" => require_db(state).and_then(|conn| {
            let session = require_session(&req.params)?;
            require_can(&session, Action::ManageCurriculum)?;
            handle_delete(conn, &req.params)
        }),
        "curriculum.list" => require_db(state).and_then(|conn| {
            // Read-only for everyone with a session, students included.
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
