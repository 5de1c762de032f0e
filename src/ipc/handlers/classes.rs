use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    authorize, db_conn, db_failed, finish, optional_date, optional_str, required_str,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request, Role};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_years_create(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, &[Role::Admin, Role::Direction])?;
    let conn = db_conn(state, req)?;
    let label = required_str(req, "label")?;
    let start_date = optional_date(req, "startDate")?;
    let end_date = optional_date(req, "endDate")?;
    if let (Some(s), Some(e)) = (&start_date, &end_date) {
        if e < s {
            return Err(err(
                &req.id,
                "bad_params",
                "endDate must not precede startDate",
                None,
            ));
        }
    }

    let year_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO academic_years(id, label, start_date, end_date) VALUES(?, ?, ?, ?)",
        (&year_id, &label, &start_date, &end_date),
    )
    .map_err(|e| db_failed(req, "db_insert_failed", e, "academic_years"))?;

    Ok(ok(
        &req.id,
        json!({ "academicYearId": year_id, "label": label }),
    ))
}

fn handle_years_list(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, &[])?;
    let conn = db_conn(state, req)?;
    let mut stmt = conn
        .prepare(
            "SELECT id, label, start_date, end_date
             FROM academic_years
             ORDER BY label",
        )
        .map_err(|e| db_failed(req, "db_query_failed", e, "academic_years"))?;
    let years = stmt
        .query_map([], |r| {
            Ok(json!({
                "academicYearId": r.get::<_, String>(0)?,
                "label": r.get::<_, String>(1)?,
                "startDate": r.get::<_, Option<String>>(2)?,
                "endDate": r.get::<_, Option<String>>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_failed(req, "db_query_failed", e, "academic_years"))?;
    Ok(ok(&req.id, json!({ "years": years })))
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, &[Role::Admin, Role::Direction])?;
    let conn = db_conn(state, req)?;
    let year_id = required_str(req, "academicYearId")?;
    let name = required_str(req, "name")?;
    let level = optional_str(req, "level");

    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM academic_years WHERE id = ?",
            [&year_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| db_failed(req, "db_query_failed", e, "academic_years"))?;
    if exists.is_none() {
        return Err(err(&req.id, "not_found", "academic year not found", None));
    }

    let class_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, academic_year_id, name, level) VALUES(?, ?, ?, ?)",
        (&class_id, &year_id, &name, &level),
    )
    .map_err(|e| db_failed(req, "db_insert_failed", e, "classes"))?;

    Ok(ok(&req.id, json!({ "classId": class_id, "name": name })))
}

fn handle_classes_list(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, &[])?;
    let conn = db_conn(state, req)?;
    let year_id = optional_str(req, "academicYearId");

    // Correlated subqueries avoid double-counting from joins.
    let mut stmt = conn
        .prepare(
            "SELECT
               c.id,
               c.name,
               c.level,
               c.academic_year_id,
               (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id AND s.active = 1),
               (SELECT COUNT(*) FROM subjects m WHERE m.class_id = c.id)
             FROM classes c
             WHERE (?1 IS NULL OR c.academic_year_id = ?1)
             ORDER BY c.name",
        )
        .map_err(|e| db_failed(req, "db_query_failed", e, "classes"))?;
    let classes = stmt
        .query_map([&year_id], |r| {
            Ok(json!({
                "classId": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "level": r.get::<_, Option<String>>(2)?,
                "academicYearId": r.get::<_, String>(3)?,
                "studentCount": r.get::<_, i64>(4)?,
                "subjectCount": r.get::<_, i64>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_failed(req, "db_query_failed", e, "classes"))?;
    Ok(ok(&req.id, json!({ "classes": classes })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "years.create" => Some(finish(handle_years_create(state, req))),
        "years.list" => Some(finish(handle_years_list(state, req))),
        "classes.create" => Some(finish(handle_classes_create(state, req))),
        "classes.list" => Some(finish(handle_classes_list(state, req))),
        _ => None,
    }
}
