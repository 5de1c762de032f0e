use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    authorize, db_conn, db_failed, finish, now_rfc3339, optional_date, optional_str,
    required_str, HandlerResult,
};
use crate::ipc::types::{AppState, Request, Role};
use chrono::NaiveDate;
use rusqlite::types::Value as SqlValue;
use rusqlite::OptionalExtension;
use serde_json::{json, Value};
use uuid::Uuid;

const ROSTER_ROLES: [Role; 3] = [Role::Admin, Role::Direction, Role::Secretariat];

fn normalize_sex(req: &Request, raw: Option<String>) -> Result<Option<String>, Value> {
    match raw.as_deref().map(|s| s.to_ascii_uppercase()) {
        None => Ok(None),
        Some(s) if s == "M" || s == "F" => Ok(Some(s)),
        Some(other) => Err(err(
            &req.id,
            "bad_params",
            "sex must be M or F",
            Some(json!({ "sex": other })),
        )),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, &ROSTER_ROLES)?;
    let conn = db_conn(state, req)?;
    let class_id = required_str(req, "classId")?;
    let surname = required_str(req, "surname")?;
    let given_name = required_str(req, "givenName")?;
    let matricule = optional_str(req, "matricule");
    let sex = normalize_sex(req, optional_str(req, "sex"))?;
    let birth_date = optional_date(req, "birthDate")?;

    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| db_failed(req, "db_query_failed", e, "classes"))?;
    if exists.is_none() {
        return Err(err(&req.id, "not_found", "class not found", None));
    }

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, class_id, surname, given_name, matricule, sex, birth_date, active, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, 1, ?)",
        (
            &student_id,
            &class_id,
            &surname,
            &given_name,
            &matricule,
            &sex,
            &birth_date,
            now_rfc3339(),
        ),
    )
    .map_err(|e| db_failed(req, "db_insert_failed", e, "students"))?;

    Ok(ok(&req.id, json!({ "studentId": student_id })))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, &[])?;
    let conn = db_conn(state, req)?;
    let class_id = required_str(req, "classId")?;
    let include_inactive = req
        .params
        .get("includeInactive")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let mut stmt = conn
        .prepare(
            "SELECT id, surname, given_name, matricule, sex, birth_date, active
             FROM students
             WHERE class_id = ?1 AND (?2 OR active = 1)
             ORDER BY surname, given_name",
        )
        .map_err(|e| db_failed(req, "db_query_failed", e, "students"))?;
    let students = stmt
        .query_map((&class_id, include_inactive), |r| {
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "surname": r.get::<_, String>(1)?,
                "givenName": r.get::<_, String>(2)?,
                "matricule": r.get::<_, Option<String>>(3)?,
                "sex": r.get::<_, Option<String>>(4)?,
                "birthDate": r.get::<_, Option<String>>(5)?,
                "active": r.get::<_, i64>(6)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_failed(req, "db_query_failed", e, "students"))?;
    Ok(ok(&req.id, json!({ "students": students })))
}

/// `None`: key absent. `Some(None)`: cleared with null or blank text.
fn patch_text(
    req: &Request,
    patch: &serde_json::Map<String, Value>,
    key: &str,
) -> Result<Option<Option<String>>, Value> {
    match patch.get(key) {
        None => Ok(None),
        Some(Value::Null) => Ok(Some(None)),
        Some(Value::String(s)) => {
            let t = s.trim();
            Ok(Some(if t.is_empty() { None } else { Some(t.to_string()) }))
        }
        Some(_) => Err(err(
            &req.id,
            "bad_params",
            format!("patch.{} must be a string or null", key),
            None,
        )),
    }
}

fn handle_students_update(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, &ROSTER_ROLES)?;
    let conn = db_conn(state, req)?;
    let student_id = required_str(req, "studentId")?;
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return Err(err(&req.id, "bad_params", "patch must be an object", None));
    };

    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| db_failed(req, "db_query_failed", e, "students"))?;
    if exists.is_none() {
        return Err(err(&req.id, "not_found", "student not found", None));
    }

    let mut sets: Vec<&str> = Vec::new();
    let mut values: Vec<SqlValue> = Vec::new();

    for (key, column, required) in [
        ("surname", "surname = ?", true),
        ("givenName", "given_name = ?", true),
        ("matricule", "matricule = ?", false),
    ] {
        if let Some(v) = patch_text(req, patch, key)? {
            if required && v.is_none() {
                return Err(err(
                    &req.id,
                    "bad_params",
                    format!("patch.{} must not be empty", key),
                    None,
                ));
            }
            sets.push(column);
            values.push(v.map(SqlValue::Text).unwrap_or(SqlValue::Null));
        }
    }
    if let Some(v) = patch_text(req, patch, "sex")? {
        let sex = normalize_sex(req, v)?;
        sets.push("sex = ?");
        values.push(sex.map(SqlValue::Text).unwrap_or(SqlValue::Null));
    }
    if let Some(v) = patch_text(req, patch, "birthDate")? {
        let date = match v {
            Some(raw) => Some(
                NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .map_err(|_| {
                        err(
                            &req.id,
                            "bad_params",
                            "patch.birthDate must be a YYYY-MM-DD date",
                            None,
                        )
                    })?,
            ),
            None => None,
        };
        sets.push("birth_date = ?");
        values.push(date.map(SqlValue::Text).unwrap_or(SqlValue::Null));
    }
    if let Some(v) = patch.get("active") {
        let Some(active) = v.as_bool() else {
            return Err(err(
                &req.id,
                "bad_params",
                "patch.active must be a boolean",
                None,
            ));
        };
        sets.push("active = ?");
        values.push(SqlValue::Integer(active as i64));
    }

    if sets.is_empty() {
        return Ok(ok(&req.id, json!({ "updated": false })));
    }

    sets.push("updated_at = ?");
    values.push(SqlValue::Text(now_rfc3339()));
    values.push(SqlValue::Text(student_id.clone()));
    let sql = format!("UPDATE students SET {} WHERE id = ?", sets.join(", "));
    conn.execute(&sql, rusqlite::params_from_iter(values))
        .map_err(|e| db_failed(req, "db_update_failed", e, "students"))?;

    Ok(ok(&req.id, json!({ "updated": true, "studentId": student_id })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" => Some(finish(handle_students_create(state, req))),
        "students.list" => Some(finish(handle_students_list(state, req))),
        "students.update" => Some(finish(handle_students_update(state, req))),
        _ => None,
    }
}
