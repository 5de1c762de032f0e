use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{authorize, db_conn, finish, HandlerResult};
use crate::ipc::types::{AppState, Request, Role};
use rusqlite::Connection;
use serde_json::{json, Map, Value};

const PROFILE_KEY: &str = "school.profile";
const PROFILE_FIELDS: [&str; 6] = [
    "schoolName",
    "schoolCode",
    "province",
    "city",
    "headName",
    "motto",
];

fn default_profile() -> Value {
    let mut m = Map::new();
    for field in PROFILE_FIELDS {
        m.insert(field.to_string(), Value::String(String::new()));
    }
    Value::Object(m)
}

/// Stored profile merged over the defaults, so readers always see every field.
pub fn load_profile(conn: &Connection) -> anyhow::Result<Value> {
    let mut merged = default_profile();
    if let Some(Value::Object(stored)) = db::settings_get_json(conn, PROFILE_KEY)? {
        if let Value::Object(m) = &mut merged {
            for (k, v) in stored {
                m.insert(k, v);
            }
        }
    }
    Ok(merged)
}

fn handle_settings_get(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, &[])?;
    let conn = db_conn(state, req)?;
    let profile = load_profile(conn)
        .map_err(|e| err(&req.id, "db_query_failed", format!("{e:#}"), None))?;
    Ok(ok(&req.id, json!({ "profile": profile })))
}

fn handle_settings_set(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, &[Role::Admin, Role::Direction])?;
    let conn = db_conn(state, req)?;
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return Err(err(&req.id, "bad_params", "patch must be an object", None));
    };

    for (k, v) in patch {
        if !PROFILE_FIELDS.contains(&k.as_str()) {
            return Err(err(
                &req.id,
                "bad_params",
                format!("unknown profile field: {}", k),
                Some(json!({ "allowed": PROFILE_FIELDS })),
            ));
        }
        if !v.is_string() {
            return Err(err(
                &req.id,
                "bad_params",
                format!("{} must be a string", k),
                None,
            ));
        }
    }

    let mut profile = load_profile(conn)
        .map_err(|e| err(&req.id, "db_query_failed", format!("{e:#}"), None))?;
    if let Value::Object(m) = &mut profile {
        for (k, v) in patch {
            m.insert(k.clone(), Value::String(v.as_str().unwrap_or("").trim().to_string()));
        }
    }
    db::settings_set_json(conn, PROFILE_KEY, &profile)
        .map_err(|e| err(&req.id, "db_update_failed", format!("{e:#}"), None))?;
    Ok(ok(&req.id, json!({ "profile": profile })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "settings.get" => Some(finish(handle_settings_get(state, req))),
        "settings.set" => Some(finish(handle_settings_set(state, req))),
        _ => None,
    }
}
