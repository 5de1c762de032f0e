mod backup;
mod calc;
mod config;
mod db;
mod ipc;
mod repo;

use std::io::{self, BufRead, Write};
use tracing::{error, info, info_span, warn};

fn main() {
    let config = config::Config::from_env();
    config::init_tracing(&config);
    info!(version = env!("CARGO_PKG_VERSION"), "bulletind starting");

    let mut state = ipc::AppState {
        workspace: None,
        db: None,
    };
    if let Some(path) = config.workspace.as_deref() {
        if let Err(e) = ipc::select_workspace(&mut state, path) {
            // Keep serving; the client can still call workspace.select.
            error!(
                workspace = %path.to_string_lossy(),
                error = %format!("{e:#}"),
                "startup workspace failed"
            );
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => {
                let span = info_span!("request", id = %req.id, method = %req.method);
                let _enter = span.enter();
                ipc::handle_request(&mut state, req)
            }
            Err(e) => {
                warn!(error = %e, "unparseable request line");
                // No id to echo back.
                let mut resp = ipc::err("", "bad_json", e.to_string(), None);
                if let Some(obj) = resp.as_object_mut() {
                    obj.remove("id");
                }
                resp
            }
        };

        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    info!("stdin closed, shutting down");
}
