use rusqlite::Connection;
use serde_json::json;

use crate::ipc::error::err;
use crate::ipc::types::AppState;
use crate::policy::{can, Action, Role};
use crate::upload::clean_student_number;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn db(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: String,
    pub role: Role,
}

/// Pull the caller's session out of params. No session at all is
/// `unauthorized`; a malformed one is too.
pub fn require_session(params: &serde_json::Value) -> Result<Session, HandlerErr> {
    let Some(session) = params.get("session").filter(|v| v.is_object()) else {
        return Err(HandlerErr::new("unauthorized", "no session"));
    };
    let user_id = session
        .get("userId")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .unwrap_or("");
    let role_raw = session.get("role").and_then(|v| v.as_str()).unwrap_or("");
    let Some(role) = Role::parse(role_raw) else {
        return Err(HandlerErr::new("unauthorized", "invalid session role"));
    };
    if user_id.is_empty() {
        return Err(HandlerErr::new("unauthorized", "no session"));
    }
    Ok(Session {
        user_id: user_id.to_string(),
        role,
    })
}

pub fn require_can(session: &Session, action: Action) -> Result<(), HandlerErr> {
    if can(session.role, action) {
        return Ok(());
    }
    Err(HandlerErr {
        code: "forbidden",
        message: "role not permitted for this action".to_string(),
        details: Some(json!({ "role": format!("{:?}", session.role).to_lowercase() })),
    })
}

/// Grade reads: staff roles may view any student, a student only their own
/// number (their session userId is their student number). Both sides go
/// through the same dash-stripping as stored numbers.
pub fn require_grade_access(session: &Session, student_number: &str) -> Result<(), HandlerErr> {
    if can(session.role, Action::ViewAnyGrades) {
        return Ok(());
    }
    if can(session.role, Action::ViewOwnGrades)
        && clean_student_number(&session.user_id) == clean_student_number(student_number)
    {
        return Ok(());
    }
    Err(HandlerErr::new(
        "forbidden",
        "students may only view their own grades",
    ))
}

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("bad_params", "no workspace selected"))
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_opt_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn get_opt_f64(params: &serde_json::Value, key: &str) -> Option<f64> {
    match params.get(key) {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

pub fn get_opt_i64(params: &serde_json::Value, key: &str) -> Option<i64> {
    params.get(key).and_then(|v| v.as_i64())
}

pub fn get_opt_bool(params: &serde_json::Value, key: &str) -> bool {
    params.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}
