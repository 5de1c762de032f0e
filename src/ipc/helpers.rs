use crate::calc::{CalcError, Period};
use crate::ipc::error::err;
use crate::ipc::types::{AppState, AuthContext, Request, Role};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::{json, Value};

/// Handlers return `Err` with a ready-to-send error response.
pub type HandlerResult = Result<Value, Value>;

pub fn finish(result: HandlerResult) -> Value {
    result.unwrap_or_else(|e| e)
}

/// Role gate. An empty `roles` slice admits any authenticated caller.
pub fn authorize(req: &Request, roles: &[Role]) -> Result<AuthContext, Value> {
    let Some(raw) = req.auth.as_ref() else {
        return Err(err(&req.id, "unauthorized", "missing auth context", None));
    };
    let auth: AuthContext = serde_json::from_value(raw.clone()).map_err(|e| {
        err(
            &req.id,
            "unauthorized",
            format!("invalid auth context: {}", e),
            None,
        )
    })?;
    if !auth.allows(roles) {
        return Err(err(
            &req.id,
            "forbidden",
            format!("role {} may not call {}", auth.role.as_str(), req.method),
            Some(json!({
                "role": auth.role.as_str(),
                "allowed": roles.iter().map(|r| r.as_str()).collect::<Vec<_>>(),
            })),
        ));
    }
    Ok(auth)
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, Value> {
    let v = req
        .params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))?;
    if v.is_empty() {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must not be empty", key),
            None,
        ));
    }
    Ok(v)
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn required_positive(req: &Request, key: &str) -> Result<f64, Value> {
    let Some(n) = req.params.get(key).and_then(|v| v.as_f64()) else {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must be a number", key),
            None,
        ));
    };
    if !(n > 0.0) || !n.is_finite() {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must be greater than zero", key),
            Some(json!({ key: n })),
        ));
    }
    Ok(n)
}

pub fn parse_period(req: &Request, allow_annual: bool) -> Result<Period, Value> {
    let raw = required_str(req, "period")?;
    match Period::parse(&raw) {
        Some(Period::Annual) if !allow_annual => Err(err(
            &req.id,
            "bad_params",
            "evaluations belong to a term, not to annuelle",
            Some(json!({ "period": raw })),
        )),
        Some(p) => Ok(p),
        None => Err(err(
            &req.id,
            "bad_params",
            "period must be one of: 1er_trimestre, 2eme_trimestre, 3eme_trimestre, annuelle",
            Some(json!({ "period": raw })),
        )),
    }
}

pub fn parse_date(req: &Request, key: &str) -> Result<String, Value> {
    let raw = required_str(req, key)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .map_err(|_| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be a YYYY-MM-DD date", key),
                Some(json!({ key: raw })),
            )
        })
}

pub fn optional_date(req: &Request, key: &str) -> Result<Option<String>, Value> {
    if optional_str(req, key).is_none() {
        return Ok(None);
    }
    parse_date(req, key).map(Some)
}

pub fn calc_err(req: &Request, e: CalcError) -> Value {
    err(&req.id, &e.code, e.message, e.details)
}

pub fn db_failed(req: &Request, code: &str, e: rusqlite::Error, table: &str) -> Value {
    err(&req.id, code, e.to_string(), Some(json!({ "table": table })))
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
