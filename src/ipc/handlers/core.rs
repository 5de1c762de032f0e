use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{finish, HandlerResult};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

fn handle_health(state: &mut AppState, req: &Request) -> HandlerResult {
    Ok(ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    ))
}

/// Opens (or creates) the workspace database and makes it current.
pub fn select_workspace(state: &mut AppState, path: &Path) -> anyhow::Result<()> {
    let conn = db::open_db(path)?;
    state.workspace = Some(path.to_path_buf());
    state.db = Some(conn);
    info!(workspace = %path.to_string_lossy(), "workspace opened");
    Ok(())
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> HandlerResult {
    let Some(path) = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
    else {
        return Err(err(&req.id, "bad_params", "missing params.path", None));
    };

    select_workspace(state, &path).map_err(|e| {
        warn!(workspace = %path.to_string_lossy(), error = %e, "workspace open failed");
        err(&req.id, "db_open_failed", format!("{e:#}"), None)
    })?;
    Ok(ok(&req.id, json!({ "workspacePath": path.to_string_lossy() })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(finish(handle_health(state, req))),
        "workspace.select" => Some(finish(handle_workspace_select(state, req))),
        _ => None,
    }
}
