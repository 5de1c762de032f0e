use crate::backup;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::core::select_workspace;
use crate::ipc::helpers::{authorize, finish, optional_str, required_str, HandlerResult};
use crate::ipc::types::{AppState, Request, Role};
use serde_json::json;
use std::path::PathBuf;
use tracing::{info, warn};

fn target_workspace(state: &AppState, req: &Request) -> Result<PathBuf, serde_json::Value> {
    optional_str(req, "workspacePath")
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone())
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn handle_backup_export(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, &[Role::Admin])?;
    let out_path = required_str(req, "outPath")?;
    let workspace_path = target_workspace(state, req)?;

    if let Some(conn) = state.db.as_ref() {
        let _ = conn.execute_batch("PRAGMA wal_checkpoint(FULL)");
    }

    let out = PathBuf::from(&out_path);
    let export = backup::export_workspace_bundle(&workspace_path, &out).map_err(|e| {
        warn!(path = %out_path, error = %e, "backup export failed");
        err(
            &req.id,
            "backup_failed",
            format!("{e:#}"),
            Some(json!({ "path": out_path })),
        )
    })?;
    info!(path = %out_path, sha256 = %export.db_sha256, "workspace exported");

    Ok(ok(
        &req.id,
        json!({
            "path": out_path,
            "bundleFormat": export.bundle_format,
            "entryCount": export.entry_count,
            "dbSha256": export.db_sha256,
        }),
    ))
}

fn handle_backup_import(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, &[Role::Admin])?;
    let in_path = required_str(req, "inPath")?;
    let workspace_path = target_workspace(state, req)?;

    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return Err(err(
            &req.id,
            "not_found",
            "bundle file not found",
            Some(json!({ "path": in_path })),
        ));
    }

    let replacing_current = state.workspace.as_deref() == Some(workspace_path.as_path());
    if replacing_current {
        // Release the handle before the file is swapped.
        state.db = None;
    }

    let imported = backup::import_workspace_bundle(&src, &workspace_path);
    if imported.is_ok() || replacing_current {
        select_workspace(state, &workspace_path)
            .map_err(|e| err(&req.id, "db_open_failed", format!("{e:#}"), None))?;
    }
    let import = imported.map_err(|e| {
        warn!(path = %in_path, error = %e, "backup import failed");
        err(
            &req.id,
            "backup_failed",
            format!("{e:#}"),
            Some(json!({ "path": in_path })),
        )
    })?;

    info!(
        workspace = %workspace_path.to_string_lossy(),
        format = %import.bundle_format_detected,
        "workspace imported"
    );
    Ok(ok(
        &req.id,
        json!({
            "workspacePath": workspace_path.to_string_lossy(),
            "bundleFormatDetected": import.bundle_format_detected,
        }),
    ))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.export" => Some(finish(handle_backup_export(state, req))),
        "backup.import" => Some(finish(handle_backup_import(state, req))),
        _ => None,
    }
}
