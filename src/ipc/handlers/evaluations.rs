use crate::calc::{AssessmentType, Period};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    authorize, db_conn, db_failed, finish, optional_str, parse_date, parse_period,
    required_positive, required_str, HandlerResult,
};
use crate::ipc::types::{AppState, Request, Role};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_subjects_create(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, &[Role::Admin, Role::Direction])?;
    let conn = db_conn(state, req)?;
    let class_id = required_str(req, "classId")?;
    let name = required_str(req, "name")?;
    let coefficient = required_positive(req, "coefficient")?;

    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| db_failed(req, "db_query_failed", e, "classes"))?;
    if exists.is_none() {
        return Err(err(&req.id, "not_found", "class not found", None));
    }

    let subject_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO subjects(id, class_id, name, coefficient) VALUES(?, ?, ?, ?)",
        (&subject_id, &class_id, &name, coefficient),
    )
    .map_err(|e| db_failed(req, "db_insert_failed", e, "subjects"))?;

    Ok(ok(
        &req.id,
        json!({ "subjectId": subject_id, "name": name, "coefficient": coefficient }),
    ))
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, &[])?;
    let conn = db_conn(state, req)?;
    let class_id = required_str(req, "classId")?;
    let mut stmt = conn
        .prepare(
            "SELECT m.id, m.name, m.coefficient,
                    (SELECT COUNT(*) FROM evaluations e WHERE e.subject_id = m.id)
             FROM subjects m
             WHERE m.class_id = ?
             ORDER BY m.name",
        )
        .map_err(|e| db_failed(req, "db_query_failed", e, "subjects"))?;
    let subjects = stmt
        .query_map([&class_id], |r| {
            Ok(json!({
                "subjectId": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "coefficient": r.get::<_, f64>(2)?,
                "evaluationCount": r.get::<_, i64>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_failed(req, "db_query_failed", e, "subjects"))?;
    Ok(ok(&req.id, json!({ "subjects": subjects })))
}

fn handle_evaluations_create(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, &[Role::Admin, Role::Direction, Role::Enseignant])?;
    let conn = db_conn(state, req)?;
    let subject_id = required_str(req, "subjectId")?;
    let label = required_str(req, "label")?;
    let kind_raw = required_str(req, "type")?;
    let Some(kind) = AssessmentType::parse(&kind_raw) else {
        return Err(err(
            &req.id,
            "bad_params",
            "type must be one of: interrogation, devoir, examen, travail_pratique",
            Some(json!({ "type": kind_raw })),
        ));
    };
    let coefficient = required_positive(req, "coefficient")?;
    let max_score = required_positive(req, "maxScore")?;
    let period = parse_period(req, false)?;
    let date = parse_date(req, "date")?;

    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [&subject_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| db_failed(req, "db_query_failed", e, "subjects"))?;
    if exists.is_none() {
        return Err(err(&req.id, "not_found", "subject not found", None));
    }

    let evaluation_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO evaluations(id, subject_id, label, kind, coefficient, max_score, period, eval_date)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &evaluation_id,
            &subject_id,
            &label,
            kind.as_str(),
            coefficient,
            max_score,
            period.as_str(),
            &date,
        ),
    )
    .map_err(|e| db_failed(req, "db_insert_failed", e, "evaluations"))?;

    Ok(ok(&req.id, json!({ "evaluationId": evaluation_id })))
}

fn handle_evaluations_list(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, &[])?;
    let conn = db_conn(state, req)?;
    let subject_id = required_str(req, "subjectId")?;
    let period = match optional_str(req, "period") {
        Some(_) => Some(parse_period(req, true)?),
        None => None,
    };
    let period_filter = period.filter(|p| p.is_term()).map(Period::as_str);

    let mut stmt = conn
        .prepare(
            "SELECT e.id, e.label, e.kind, e.coefficient, e.max_score, e.period, e.eval_date,
                    (SELECT COUNT(*) FROM grades g WHERE g.evaluation_id = e.id)
             FROM evaluations e
             WHERE e.subject_id = ?1 AND (?2 IS NULL OR e.period = ?2)
             ORDER BY e.eval_date, e.rowid",
        )
        .map_err(|e| db_failed(req, "db_query_failed", e, "evaluations"))?;
    let evaluations = stmt
        .query_map((&subject_id, period_filter), |r| {
            Ok(json!({
                "evaluationId": r.get::<_, String>(0)?,
                "label": r.get::<_, String>(1)?,
                "type": r.get::<_, String>(2)?,
                "coefficient": r.get::<_, f64>(3)?,
                "maxScore": r.get::<_, f64>(4)?,
                "period": r.get::<_, String>(5)?,
                "date": r.get::<_, String>(6)?,
                "gradeCount": r.get::<_, i64>(7)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_failed(req, "db_query_failed", e, "evaluations"))?;
    Ok(ok(&req.id, json!({ "evaluations": evaluations })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.create" => Some(finish(handle_subjects_create(state, req))),
        "subjects.list" => Some(finish(handle_subjects_list(state, req))),
        "evaluations.create" => Some(finish(handle_evaluations_create(state, req))),
        "evaluations.list" => Some(finish(handle_evaluations_list(state, req))),
        _ => None,
    }
}
