use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    authorize, db_conn, db_failed, finish, now_rfc3339, required_str, HandlerResult,
};
use crate::ipc::types::{AppState, Request, Role};
use rusqlite::OptionalExtension;
use serde_json::json;
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

const MAX_GRADES_PER_CALL: usize = 500;

struct GradeInput {
    student_id: String,
    raw_score: f64,
    observation: Option<String>,
}

fn parse_grades(req: &Request) -> Result<Vec<GradeInput>, serde_json::Value> {
    let Some(items) = req.params.get("grades").and_then(|v| v.as_array()) else {
        return Err(err(&req.id, "bad_params", "grades must be an array", None));
    };
    if items.is_empty() {
        return Err(err(&req.id, "bad_params", "grades must not be empty", None));
    }
    if items.len() > MAX_GRADES_PER_CALL {
        return Err(err(
            &req.id,
            "bad_params",
            format!("at most {} grades per call", MAX_GRADES_PER_CALL),
            Some(json!({ "count": items.len() })),
        ));
    }

    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let Some(student_id) = item.get("studentId").and_then(|v| v.as_str()) else {
            return Err(err(
                &req.id,
                "bad_params",
                format!("grades[{}].studentId missing", i),
                None,
            ));
        };
        if !seen.insert(student_id.to_string()) {
            return Err(err(
                &req.id,
                "bad_params",
                format!("grades[{}] repeats student {}", i, student_id),
                None,
            ));
        }
        // Scores above the evaluation's max are accepted as entered.
        let raw_score = match item.get("rawScore").and_then(|v| v.as_f64()) {
            Some(v) if v >= 0.0 && v.is_finite() => v,
            _ => {
                return Err(err(
                    &req.id,
                    "bad_params",
                    format!("grades[{}].rawScore must be a number >= 0", i),
                    None,
                ))
            }
        };
        let observation = item
            .get("observation")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        out.push(GradeInput {
            student_id: student_id.to_string(),
            raw_score,
            observation,
        });
    }
    Ok(out)
}

fn handle_grades_record(state: &mut AppState, req: &Request) -> HandlerResult {
    let auth = authorize(req, &[Role::Admin, Role::Enseignant])?;
    let conn = db_conn(state, req)?;
    let evaluation_id = required_str(req, "evaluationId")?;
    let grades = parse_grades(req)?;

    let class_id: Option<String> = conn
        .query_row(
            "SELECT s.class_id
             FROM evaluations e
             JOIN subjects s ON s.id = e.subject_id
             WHERE e.id = ?",
            [&evaluation_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| db_failed(req, "db_query_failed", e, "evaluations"))?;
    let Some(class_id) = class_id else {
        return Err(err(&req.id, "not_found", "evaluation not found", None));
    };

    let mut roster_stmt = conn
        .prepare("SELECT id FROM students WHERE class_id = ?")
        .map_err(|e| db_failed(req, "db_query_failed", e, "students"))?;
    let roster: HashSet<String> = roster_stmt
        .query_map([&class_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<HashSet<_>, _>>())
        .map_err(|e| db_failed(req, "db_query_failed", e, "students"))?;
    let strangers: Vec<&str> = grades
        .iter()
        .filter(|g| !roster.contains(&g.student_id))
        .map(|g| g.student_id.as_str())
        .collect();
    if !strangers.is_empty() {
        return Err(err(
            &req.id,
            "bad_params",
            "some students are not enrolled in the evaluation's class",
            Some(json!({ "studentIds": strangers })),
        ));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| err(&req.id, "db_tx_failed", e.to_string(), None))?;
    let now = now_rfc3339();
    for g in &grades {
        if let Err(e) = tx.execute(
            "INSERT INTO grades(id, evaluation_id, student_id, raw_score, observation, updated_at)
             VALUES(?, ?, ?, ?, ?, ?)
             ON CONFLICT(evaluation_id, student_id) DO UPDATE SET
               raw_score = excluded.raw_score,
               observation = excluded.observation,
               updated_at = excluded.updated_at",
            (
                Uuid::new_v4().to_string(),
                &evaluation_id,
                &g.student_id,
                g.raw_score,
                &g.observation,
                &now,
            ),
        ) {
            let _ = tx.rollback();
            return Err(db_failed(req, "db_insert_failed", e, "grades"));
        }
    }
    tx.commit()
        .map_err(|e| err(&req.id, "db_tx_failed", e.to_string(), None))?;

    debug!(
        evaluation_id = %evaluation_id,
        count = grades.len(),
        user_id = %auth.user_id,
        "grades recorded"
    );
    Ok(ok(&req.id, json!({ "recorded": grades.len() })))
}

fn handle_grades_list(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, &[])?;
    let conn = db_conn(state, req)?;
    let evaluation_id = required_str(req, "evaluationId")?;

    let max_score: Option<f64> = conn
        .query_row(
            "SELECT max_score FROM evaluations WHERE id = ?",
            [&evaluation_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| db_failed(req, "db_query_failed", e, "evaluations"))?;
    let Some(max_score) = max_score else {
        return Err(err(&req.id, "not_found", "evaluation not found", None));
    };

    let mut stmt = conn
        .prepare(
            "SELECT g.student_id, s.surname, s.given_name, g.raw_score, g.observation
             FROM grades g
             JOIN students s ON s.id = g.student_id
             WHERE g.evaluation_id = ?
             ORDER BY s.surname, s.given_name",
        )
        .map_err(|e| db_failed(req, "db_query_failed", e, "grades"))?;
    let grades = stmt
        .query_map([&evaluation_id], |r| {
            let raw_score: f64 = r.get(3)?;
            let on_twenty = calc::normalize(raw_score, max_score).ok();
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "surname": r.get::<_, String>(1)?,
                "givenName": r.get::<_, String>(2)?,
                "rawScore": raw_score,
                "onTwenty": on_twenty,
                "mention": on_twenty.map(|v| calc::mention_band(v).label),
                "observation": r.get::<_, Option<String>>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| db_failed(req, "db_query_failed", e, "grades"))?;

    Ok(ok(
        &req.id,
        json!({ "maxScore": max_score, "grades": grades }),
    ))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.record" => Some(finish(handle_grades_record(state, req))),
        "grades.list" => Some(finish(handle_grades_list(state, req))),
        _ => None,
    }
}
