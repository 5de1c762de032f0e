use crate::calc::{
    self, CalcError, ClassPeriodStatistics, Period, StudentInput, StudentPeriodReport,
};
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup::load_profile;
use crate::ipc::helpers::{
    authorize, calc_err, db_conn, finish, parse_period, required_str, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::repo::{AssessmentRepository, ClassInfo, RosterStudent, SqliteRepository};
use serde_json::{json, Value};
use tracing::{info, warn};

fn class_or_not_found<R: AssessmentRepository>(
    repo: &R,
    class_id: &str,
) -> Result<ClassInfo, CalcError> {
    repo.fetch_class(class_id)?
        .ok_or_else(|| CalcError::new("not_found", "class not found"))
}

pub struct StudentBulletin {
    pub class: ClassInfo,
    pub student: RosterStudent,
    pub report: StudentPeriodReport,
}

pub struct ClassBulletin {
    pub class: ClassInfo,
    pub statistics: ClassPeriodStatistics,
    pub failures: Vec<Value>,
}

fn header(profile: Value, class: &ClassInfo, period: Period) -> Value {
    json!({
        "school": profile,
        "class": class,
        "academicYear": class.academic_year_label,
        "period": period.as_str(),
    })
}

pub fn student_bulletin<R: AssessmentRepository>(
    repo: &R,
    student_id: &str,
    period: Period,
) -> Result<StudentBulletin, CalcError> {
    let student = repo
        .fetch_student(student_id)?
        .ok_or_else(|| CalcError::new("not_found", "student not found"))?;
    let class = class_or_not_found(repo, &student.class_id)?;
    let catalog = repo.fetch_subjects(&class.class_id)?;
    let rows = repo.fetch_assessments(student_id, &class.academic_year_id, period)?;

    let report = calc::build_student_report(&catalog, &rows).map_err(|e| {
        warn!(student_id = %student_id, error = %e, "bulletin rejected");
        CalcError::from(e)
    })?;

    Ok(StudentBulletin {
        class,
        student,
        report,
    })
}

pub fn class_bulletin<R: AssessmentRepository>(
    repo: &R,
    class_id: &str,
    period: Period,
) -> Result<ClassBulletin, CalcError> {
    let class = class_or_not_found(repo, class_id)?;
    let catalog = repo.fetch_subjects(class_id)?;
    let roster = repo.fetch_class_roster(class_id)?;

    let mut inputs = Vec::with_capacity(roster.len());
    for student in roster {
        let rows =
            repo.fetch_assessments(&student.student_id, &class.academic_year_id, period)?;
        inputs.push(StudentInput {
            student_id: student.student_id,
            surname: student.surname,
            given_name: student.given_name,
            rows,
        });
    }

    let batch = calc::build_class_batch(&catalog, inputs);
    let failures: Vec<Value> = batch
        .failures
        .iter()
        .map(|f| {
            warn!(
                student_id = %f.student_id,
                error = %f.error,
                "student left out of class bulletin"
            );
            let e = CalcError::from(f.error.clone());
            json!({
                "studentId": f.student_id,
                "surname": f.surname,
                "givenName": f.given_name,
                "code": e.code,
                "message": e.message,
                "details": e.details,
            })
        })
        .collect();

    info!(
        class_id = %class_id,
        period = period.as_str(),
        students = batch.statistics.student_count,
        evaluated = batch.statistics.evaluated_count,
        failures = failures.len(),
        "class bulletin built"
    );

    Ok(ClassBulletin {
        class,
        statistics: batch.statistics,
        failures,
    })
}

fn school_profile(conn: &rusqlite::Connection, req: &Request) -> Result<Value, Value> {
    load_profile(conn).map_err(|e| err(&req.id, "db_query_failed", format!("{e:#}"), None))
}

fn handle_bulletins_student(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, &[])?;
    let conn = db_conn(state, req)?;
    let student_id = required_str(req, "studentId")?;
    let period = parse_period(req, true)?;

    let repo = SqliteRepository::new(conn);
    let b = student_bulletin(&repo, &student_id, period).map_err(|e| calc_err(req, e))?;
    Ok(ok(
        &req.id,
        json!({
            "header": header(school_profile(conn, req)?, &b.class, period),
            "student": b.student,
            "report": b.report,
        }),
    ))
}

fn handle_bulletins_class(state: &mut AppState, req: &Request) -> HandlerResult {
    authorize(req, &[])?;
    let conn = db_conn(state, req)?;
    let class_id = required_str(req, "classId")?;
    let period = parse_period(req, true)?;

    let repo = SqliteRepository::new(conn);
    let b = class_bulletin(&repo, &class_id, period).map_err(|e| calc_err(req, e))?;
    Ok(ok(
        &req.id,
        json!({
            "header": header(school_profile(conn, req)?, &b.class, period),
            "statistics": b.statistics,
            "failures": b.failures,
        }),
    ))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "bulletins.student" => Some(finish(handle_bulletins_student(state, req))),
        "bulletins.class" => Some(finish(handle_bulletins_class(state, req))),
        _ => None,
    }
}
