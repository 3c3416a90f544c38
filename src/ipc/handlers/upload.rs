use std::sync::atomic::Ordering;

use serde_json::json;

use crate::ipc::error::ok;
use crate::ipc::helpers::{
    get_opt_bool, get_opt_i64, get_opt_str, require_can, require_session, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::policy::Action;
use crate::upload::{self, UploadContext};

const UPLOAD_MAX_ROWS: usize = 5000;

fn handle_upload_batch(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let session = require_session(params)?;
    require_can(&session, Action::UploadGrades)?;

    let allow_legacy = get_opt_bool(params, "allowLegacy");
    if allow_legacy {
        require_can(&session, Action::AllowLegacyGrade)?;
    }

    let rows = params
        .get("rows")
        .and_then(|v| v.as_array())
        .ok_or_else(|| HandlerErr::bad_params("missing rows"))?;
    if rows.len() > UPLOAD_MAX_ROWS {
        return Err(HandlerErr {
            code: "bad_params",
            message: format!("too many rows (max {})", UPLOAD_MAX_ROWS),
            details: Some(json!({ "rows": rows.len() })),
        });
    }

    let academic_year = get_opt_str(params, "academicYear")
        .map(|s| s.to_uppercase())
        .unwrap_or_default();
    let semester = get_opt_str(params, "semester")
        .map(|s| s.to_uppercase())
        .unwrap_or_default();
    let chunk_size = get_opt_i64(params, "chunkSize")
        .filter(|n| *n > 0)
        .map(|n| n as usize)
        .unwrap_or(upload::DEFAULT_CHUNK_SIZE);

    let conn = state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("bad_params", "no workspace selected"))?;

    // A fresh batch always starts uncancelled.
    state.upload_cancel.store(false, Ordering::Relaxed);
    let ctx = UploadContext {
        conn,
        actor: session.user_id.clone(),
        academic_year,
        semester,
        allow_legacy,
        cancel: &state.upload_cancel,
        chunk_size,
    };
    let outcomes = upload::reconcile_batch(&ctx, rows);

    let created = outcomes.iter().filter(|o| o.outcome == upload::OUTCOME_CREATED).count();
    let updated = outcomes.iter().filter(|o| o.outcome == upload::OUTCOME_UPDATED).count();
    let skipped = outcomes.iter().filter(|o| o.outcome == upload::OUTCOME_SKIPPED).count();
    let rejected = outcomes.len() - created - updated - skipped;

    Ok(json!({
        "outcomes": outcomes,
        "created": created,
        "updated": updated,
        "skipped": skipped,
        "rejected": rejected,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.uploadBatch" => Some(match handle_upload_batch(state, &req.params) {
            Ok(result) => ok(&req.id, result),
            Err(e) => e.response(&req.id),
        }),
        _ => None,
    }
}
