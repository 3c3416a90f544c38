use serde_json::json;
use std::path::PathBuf;

use crate::backup;
use crate::db;
use crate::ipc::error::ok;
use crate::ipc::helpers::{get_required_str, require_can, require_session, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::policy::Action;
use crate::schedule::WindowCache;

fn handle_export(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let out_path = PathBuf::from(get_required_str(params, "outPath")?);
    let workspace = state
        .workspace
        .clone()
        .ok_or_else(|| HandlerErr::new("bad_params", "no workspace selected"))?;

    let summary = backup::export_workspace_bundle(&workspace, &out_path)
        .map_err(|e| HandlerErr::new("backup_failed", format!("{e:?}")))?;

    Ok(json!({
        "outPath": out_path.to_string_lossy(),
        "bundleFormat": summary.bundle_format,
        "dbSha256": summary.db_sha256,
    }))
}

fn handle_import(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let in_path = PathBuf::from(get_required_str(params, "inPath")?);
    let workspace = state
        .workspace
        .clone()
        .ok_or_else(|| HandlerErr::new("bad_params", "no workspace selected"))?;

    // The open connection points at the file being replaced; drop it first.
    state.db = None;
    let summary = backup::import_workspace_bundle(&in_path, &workspace)
        .map_err(|e| HandlerErr::new("backup_failed", format!("{e:?}")))?;
    let conn = db::open_db(&workspace)
        .map_err(|e| HandlerErr::new("db_open_failed", format!("{e:?}")))?;
    state.db = Some(conn);
    // The imported database may carry a different schedule set.
    state.window_cache.clear();

    Ok(json!({ "bundleFormatDetected": summary.bundle_format_detected }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handled = match req.method.as_str() {
        "backup.export" => require_session(&req.params)
            .and_then(|session| require_can(&session, Action::ManageBackups))
            .and_then(|()| handle_export(state, &req.params)),
        "backup.import" => require_session(&req.params)
            .and_then(|session| require_can(&session, Action::ManageBackups))
            .and_then(|()| handle_import(state, &req.params)),
        _ => return None,
    };

    Some(match handled {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    })
}
