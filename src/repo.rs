use crate::calc::{AssessmentType, CalcError, Period, ScoredAssessment, SubjectRef};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterStudent {
    pub student_id: String,
    pub class_id: String,
    pub surname: String,
    pub given_name: String,
    pub matricule: Option<String>,
    pub sex: Option<String>,
    pub birth_date: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassInfo {
    pub class_id: String,
    pub name: String,
    pub level: Option<String>,
    pub academic_year_id: String,
    pub academic_year_label: String,
}

/// Read side of the grading data. Handlers depend on this rather than on SQL.
pub trait AssessmentRepository {
    /// Rows ordered by subject name, then assessment date. `Period::Annual` spans the year.
    fn fetch_assessments(
        &self,
        student_id: &str,
        academic_year_id: &str,
        period: Period,
    ) -> Result<Vec<ScoredAssessment>, CalcError>;

    /// Active students ordered by surname, then given name.
    fn fetch_class_roster(&self, class_id: &str) -> Result<Vec<RosterStudent>, CalcError>;

    fn fetch_subjects(&self, class_id: &str) -> Result<Vec<SubjectRef>, CalcError>;

    fn fetch_student(&self, student_id: &str) -> Result<Option<RosterStudent>, CalcError>;

    fn fetch_class(&self, class_id: &str) -> Result<Option<ClassInfo>, CalcError>;
}

pub struct SqliteRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

fn db_err(e: rusqlite::Error) -> CalcError {
    CalcError::new("db_query_failed", e.to_string())
}

fn roster_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<RosterStudent> {
    Ok(RosterStudent {
        student_id: r.get(0)?,
        class_id: r.get(1)?,
        surname: r.get(2)?,
        given_name: r.get(3)?,
        matricule: r.get(4)?,
        sex: r.get(5)?,
        birth_date: r.get(6)?,
    })
}

impl AssessmentRepository for SqliteRepository<'_> {
    fn fetch_assessments(
        &self,
        student_id: &str,
        academic_year_id: &str,
        period: Period,
    ) -> Result<Vec<ScoredAssessment>, CalcError> {
        let period_filter: Option<&str> = if period.is_term() {
            Some(period.as_str())
        } else {
            None
        };

        let mut stmt = self
            .conn
            .prepare(
                "SELECT s.id, s.name, s.coefficient,
                        e.label, e.kind, e.coefficient, g.raw_score, e.max_score, e.eval_date,
                        g.observation
                 FROM grades g
                 JOIN evaluations e ON e.id = g.evaluation_id
                 JOIN subjects s ON s.id = e.subject_id
                 JOIN classes c ON c.id = s.class_id
                 WHERE g.student_id = ?1
                   AND c.academic_year_id = ?2
                   AND (?3 IS NULL OR e.period = ?3)
                 ORDER BY s.name, e.eval_date, e.rowid",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map((student_id, academic_year_id, period_filter), |r| {
                let kind: String = r.get(4)?;
                Ok(ScoredAssessment {
                    subject_id: r.get(0)?,
                    subject_name: r.get(1)?,
                    subject_weight: r.get(2)?,
                    assessment_label: r.get(3)?,
                    assessment_type: AssessmentType::from_stored(&kind),
                    assessment_weight: r.get(5)?,
                    raw_score: r.get(6)?,
                    max_score: r.get(7)?,
                    date: r.get(8)?,
                    observation: r.get(9)?,
                })
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(db_err)?;
        Ok(rows)
    }

    fn fetch_class_roster(&self, class_id: &str) -> Result<Vec<RosterStudent>, CalcError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, class_id, surname, given_name, matricule, sex, birth_date
                 FROM students
                 WHERE class_id = ? AND active = 1
                 ORDER BY surname, given_name",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([class_id], roster_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(db_err)?;
        Ok(rows)
    }

    fn fetch_subjects(&self, class_id: &str) -> Result<Vec<SubjectRef>, CalcError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, name, coefficient
                 FROM subjects
                 WHERE class_id = ?
                 ORDER BY name",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([class_id], |r| {
                Ok(SubjectRef {
                    subject_id: r.get(0)?,
                    subject_name: r.get(1)?,
                    subject_weight: r.get(2)?,
                })
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(db_err)?;
        Ok(rows)
    }

    fn fetch_student(&self, student_id: &str) -> Result<Option<RosterStudent>, CalcError> {
        self.conn
            .query_row(
                "SELECT id, class_id, surname, given_name, matricule, sex, birth_date
                 FROM students
                 WHERE id = ?",
                [student_id],
                roster_row,
            )
            .optional()
            .map_err(db_err)
    }

    fn fetch_class(&self, class_id: &str) -> Result<Option<ClassInfo>, CalcError> {
        self.conn
            .query_row(
                "SELECT c.id, c.name, c.level, c.academic_year_id, y.label
                 FROM classes c
                 JOIN academic_years y ON y.id = c.academic_year_id
                 WHERE c.id = ?",
                [class_id],
                |r| {
                    Ok(ClassInfo {
                        class_id: r.get(0)?,
                        name: r.get(1)?,
                        level: r.get(2)?,
                        academic_year_id: r.get(3)?,
                        academic_year_label: r.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(db_err)
    }
}
