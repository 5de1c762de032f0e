use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::cmp::Ordering;
use std::collections::HashMap;
use thiserror::Error;

/// Every average produced here lives on this scale.
pub const SCALE: f64 = 20.0;
pub const PASS_MARK: f64 = 10.0;
pub const NOT_EVALUATED: &str = "Non évalué";
pub const INVALID_ASSESSMENT_MESSAGE: &str = "données de notation invalides";

/// Inclusive lower bounds, best band first. Anything below the last one is "Insuffisant".
const MENTION_BANDS: [(f64, &str); 5] = [
    (16.0, "Excellent"),
    (14.0, "Très bien"),
    (12.0, "Bien"),
    (10.0, "Assez bien"),
    (8.0, "Passable"),
];
const LOWEST_MENTION: &str = "Insuffisant";

/// Comparisons of averages (bands, pass mark, ties) happen on this grid.
const SCORE_STEPS_PER_POINT: f64 = 1e6;

/// Averages that differ only by floating-point noise map to the same key.
fn score_key(x: f64) -> i64 {
    (x * SCORE_STEPS_PER_POINT).round() as i64
}

/// VB6-compatible 1-decimal rounding:
/// `Int(10*x + 0.5) / 10`
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentType {
    Interrogation,
    Devoir,
    Examen,
    TravailPratique,
}

impl AssessmentType {
    pub fn as_str(self) -> &'static str {
        match self {
            AssessmentType::Interrogation => "interrogation",
            AssessmentType::Devoir => "devoir",
            AssessmentType::Examen => "examen",
            AssessmentType::TravailPratique => "travail_pratique",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "interrogation" => Some(AssessmentType::Interrogation),
            "devoir" => Some(AssessmentType::Devoir),
            "examen" => Some(AssessmentType::Examen),
            "travail_pratique" | "tp" => Some(AssessmentType::TravailPratique),
            _ => None,
        }
    }

    /// Stored rows predate the enum; unknown kinds read back as interrogations.
    pub fn from_stored(raw: &str) -> Self {
        Self::parse(raw).unwrap_or(AssessmentType::Interrogation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "1er_trimestre")]
    FirstTerm,
    #[serde(rename = "2eme_trimestre")]
    SecondTerm,
    #[serde(rename = "3eme_trimestre")]
    ThirdTerm,
    #[serde(rename = "annuelle")]
    Annual,
}

impl Period {
    pub fn as_str(self) -> &'static str {
        match self {
            Period::FirstTerm => "1er_trimestre",
            Period::SecondTerm => "2eme_trimestre",
            Period::ThirdTerm => "3eme_trimestre",
            Period::Annual => "annuelle",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "1er_trimestre" => Some(Period::FirstTerm),
            "2eme_trimestre" => Some(Period::SecondTerm),
            "3eme_trimestre" => Some(Period::ThirdTerm),
            "annuelle" => Some(Period::Annual),
            _ => None,
        }
    }

    pub fn is_term(self) -> bool {
        self != Period::Annual
    }
}

/// One recorded grade, already joined with its subject and assessment metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredAssessment {
    pub subject_id: String,
    pub subject_name: String,
    pub subject_weight: f64,
    pub assessment_label: String,
    pub assessment_type: AssessmentType,
    pub assessment_weight: f64,
    pub raw_score: f64,
    pub max_score: f64,
    /// ISO `YYYY-MM-DD`, so lexical order is chronological.
    pub date: String,
    pub observation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error(
    "assessment '{}' in '{}' has max score {max_score}; it must be greater than zero",
    .assessment_label.as_deref().unwrap_or("?"),
    .subject_name.as_deref().unwrap_or("?")
)]
pub struct InvalidAssessmentError {
    pub max_score: f64,
    pub subject_name: Option<String>,
    pub assessment_label: Option<String>,
}

impl InvalidAssessmentError {
    fn for_max_score(max_score: f64) -> Self {
        Self {
            max_score,
            subject_name: None,
            assessment_label: None,
        }
    }

    fn located(mut self, assessment: &ScoredAssessment) -> Self {
        self.subject_name = Some(assessment.subject_name.clone());
        self.assessment_label = Some(assessment.assessment_label.clone());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<InvalidAssessmentError> for CalcError {
    fn from(e: InvalidAssessmentError) -> Self {
        CalcError::new("invalid_assessment", INVALID_ASSESSMENT_MESSAGE).with_details(json!({
            "subjectName": e.subject_name,
            "assessmentLabel": e.assessment_label,
            "maxScore": e.max_score,
            "reason": e.to_string(),
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Mention {
    pub label: &'static str,
    /// 1 is the best band.
    pub rank: u8,
}

/// Shared by subject, overall and per-assessment marks. NaN falls through to the lowest band.
pub fn mention_band(average: f64) -> Mention {
    let key = score_key(average);
    for (i, &(floor, label)) in MENTION_BANDS.iter().enumerate() {
        if !average.is_nan() && key >= score_key(floor) {
            return Mention {
                label,
                rank: (i + 1) as u8,
            };
        }
    }
    Mention {
        label: LOWEST_MENTION,
        rank: (MENTION_BANDS.len() + 1) as u8,
    }
}

/// Scales a raw score onto /20. Scores above `max_score` are not clamped.
pub fn normalize(raw_score: f64, max_score: f64) -> Result<f64, InvalidAssessmentError> {
    if !(max_score > 0.0) || !max_score.is_finite() {
        return Err(InvalidAssessmentError::for_max_score(max_score));
    }
    Ok(raw_score * SCALE / max_score)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRef {
    pub subject_id: String,
    pub subject_name: String,
    pub subject_weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentScore {
    pub label: String,
    pub assessment_type: AssessmentType,
    pub date: String,
    pub weight: f64,
    pub normalized_score: f64,
    pub mention: Mention,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAverage {
    pub subject_id: String,
    pub subject_name: String,
    pub subject_weight: f64,
    pub average: f64,
    pub mention: Mention,
    /// False when nothing was recorded; the 0 average is then a placeholder, not a mark.
    pub evaluated: bool,
    pub assessment_breakdown: Vec<AssessmentScore>,
}

impl SubjectAverage {
    pub fn empty(subject: &SubjectRef) -> Self {
        Self {
            subject_id: subject.subject_id.clone(),
            subject_name: subject.subject_name.clone(),
            subject_weight: subject.subject_weight,
            average: 0.0,
            mention: mention_band(0.0),
            evaluated: false,
            assessment_breakdown: Vec::new(),
        }
    }

    fn earliest_date(&self) -> Option<&str> {
        self.assessment_breakdown
            .iter()
            .map(|a| a.date.as_str())
            .min()
    }
}

/// Averages one subject's assessments. The caller groups rows by subject beforehand.
pub fn aggregate_subject(
    assessments: &[ScoredAssessment],
) -> Result<SubjectAverage, InvalidAssessmentError> {
    let mut weighted_sum = 0.0_f64;
    let mut weight_sum = 0.0_f64;
    let mut breakdown = Vec::with_capacity(assessments.len());

    for a in assessments {
        let score = normalize(a.raw_score, a.max_score).map_err(|e| e.located(a))?;
        weighted_sum += score * a.assessment_weight;
        weight_sum += a.assessment_weight;
        breakdown.push(AssessmentScore {
            label: a.assessment_label.clone(),
            assessment_type: a.assessment_type,
            date: a.date.clone(),
            weight: a.assessment_weight,
            normalized_score: score,
            mention: mention_band(score),
            observation: a.observation.clone(),
        });
    }

    let (average, evaluated) = if weight_sum > 0.0 {
        (weighted_sum / weight_sum, true)
    } else {
        (0.0, false)
    };

    let (subject_id, subject_name, subject_weight) = match assessments.first() {
        Some(a) => (a.subject_id.clone(), a.subject_name.clone(), a.subject_weight),
        None => (String::new(), String::new(), 0.0),
    };

    Ok(SubjectAverage {
        subject_id,
        subject_name,
        subject_weight,
        average,
        mention: mention_band(average),
        evaluated,
        assessment_breakdown: breakdown,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentPeriodReport {
    pub overall_average: f64,
    pub mention: Mention,
    pub subject_averages: Vec<SubjectAverage>,
    pub total_weight: f64,
    pub evaluated: bool,
}

pub fn build_report(subject_averages: &[SubjectAverage]) -> StudentPeriodReport {
    let mut weighted_sum = 0.0_f64;
    let mut total_weight = 0.0_f64;
    for s in subject_averages {
        if !s.evaluated || s.subject_weight <= 0.0 {
            continue;
        }
        weighted_sum += s.average * s.subject_weight;
        total_weight += s.subject_weight;
    }

    let overall_average = if total_weight > 0.0 {
        weighted_sum / total_weight
    } else {
        0.0
    };

    let mut ordered = subject_averages.to_vec();
    ordered.sort_by(|a, b| {
        a.subject_name
            .cmp(&b.subject_name)
            .then_with(|| a.earliest_date().cmp(&b.earliest_date()))
    });

    StudentPeriodReport {
        overall_average,
        mention: mention_band(overall_average),
        subject_averages: ordered,
        total_weight,
        evaluated: total_weight > 0.0,
    }
}

/// Groups rows by subject id, keeping the order in which subjects first appear.
pub fn group_by_subject(rows: &[ScoredAssessment]) -> Vec<Vec<ScoredAssessment>> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<Vec<ScoredAssessment>> = Vec::new();
    for row in rows {
        let slot = *index.entry(row.subject_id.as_str()).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(row.clone());
    }
    groups
}

/// Builds one student's report. Catalog subjects without rows are listed as not evaluated;
/// rows for subjects missing from the catalog still count.
pub fn build_student_report(
    catalog: &[SubjectRef],
    rows: &[ScoredAssessment],
) -> Result<StudentPeriodReport, InvalidAssessmentError> {
    let groups = group_by_subject(rows);
    let position: HashMap<&str, usize> = groups
        .iter()
        .enumerate()
        .filter_map(|(i, g)| g.first().map(|a| (a.subject_id.as_str(), i)))
        .collect();
    let mut used = vec![false; groups.len()];

    let mut subjects = Vec::with_capacity(catalog.len().max(groups.len()));
    for subject in catalog {
        match position.get(subject.subject_id.as_str()) {
            Some(&i) => {
                used[i] = true;
                subjects.push(aggregate_subject(&groups[i])?);
            }
            None => subjects.push(SubjectAverage::empty(subject)),
        }
    }
    for (group, seen) in groups.iter().zip(&used) {
        if !seen {
            subjects.push(aggregate_subject(group)?);
        }
    }

    Ok(build_report(&subjects))
}

#[derive(Debug, Clone)]
pub struct ClassEntry {
    pub student_id: String,
    pub surname: String,
    pub given_name: String,
    pub report: StudentPeriodReport,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedStudent {
    pub student_id: String,
    pub surname: String,
    pub given_name: String,
    pub rank: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<&'static str>,
    pub report: StudentPeriodReport,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassPeriodStatistics {
    pub student_reports: Vec<RankedStudent>,
    pub class_average: f64,
    pub pass_rate: f64,
    pub top_score: f64,
    pub lowest_score: f64,
    pub evaluated_count: usize,
    pub student_count: usize,
}

fn ranking_order(a: &ClassEntry, b: &ClassEntry) -> Ordering {
    let by_name = || {
        a.surname
            .cmp(&b.surname)
            .then_with(|| a.given_name.cmp(&b.given_name))
    };
    match (a.report.evaluated, b.report.evaluated) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (true, true) => score_key(b.report.overall_average)
            .cmp(&score_key(a.report.overall_average))
            .then_with(by_name),
        (false, false) => by_name(),
    }
}

pub fn build_class_statistics(mut entries: Vec<ClassEntry>) -> ClassPeriodStatistics {
    entries.sort_by(ranking_order);

    let evaluated: Vec<f64> = entries
        .iter()
        .filter(|e| e.report.evaluated)
        .map(|e| e.report.overall_average)
        .collect();
    let evaluated_count = evaluated.len();

    let (class_average, pass_rate, top_score, lowest_score) = if evaluated_count > 0 {
        let n = evaluated_count as f64;
        let passed = evaluated
            .iter()
            .filter(|v| score_key(**v) >= score_key(PASS_MARK))
            .count() as f64;
        (
            evaluated.iter().sum::<f64>() / n,
            round_off_1_decimal(passed / n * 100.0),
            evaluated.iter().copied().fold(f64::MIN, f64::max),
            evaluated.iter().copied().fold(f64::MAX, f64::min),
        )
    } else {
        (0.0, 0.0, 0.0, 0.0)
    };

    // Competition ranking: equal averages share a rank and the next rank skips.
    let mut student_reports = Vec::with_capacity(entries.len());
    let mut previous: Option<(i64, u32)> = None;
    let student_count = entries.len();
    for (position, e) in entries.into_iter().enumerate() {
        let (rank, status) = if e.report.evaluated {
            let key = score_key(e.report.overall_average);
            let rank = match previous {
                Some((prev_key, prev_rank)) if prev_key == key => prev_rank,
                _ => (position + 1) as u32,
            };
            previous = Some((key, rank));
            (Some(rank), None)
        } else {
            (None, Some(NOT_EVALUATED))
        };
        student_reports.push(RankedStudent {
            student_id: e.student_id,
            surname: e.surname,
            given_name: e.given_name,
            rank,
            status,
            report: e.report,
        });
    }

    ClassPeriodStatistics {
        student_reports,
        class_average,
        pass_rate,
        top_score,
        lowest_score,
        evaluated_count,
        student_count,
    }
}

#[derive(Debug, Clone)]
pub struct StudentInput {
    pub student_id: String,
    pub surname: String,
    pub given_name: String,
    pub rows: Vec<ScoredAssessment>,
}

#[derive(Debug, Clone)]
pub struct StudentFailure {
    pub student_id: String,
    pub surname: String,
    pub given_name: String,
    pub error: InvalidAssessmentError,
}

#[derive(Debug, Clone)]
pub struct ClassBatch {
    pub statistics: ClassPeriodStatistics,
    pub failures: Vec<StudentFailure>,
}

/// Builds every student's report independently; a bad row only drops its own student.
pub fn build_class_batch(catalog: &[SubjectRef], inputs: Vec<StudentInput>) -> ClassBatch {
    let results: Vec<(StudentInput, Result<StudentPeriodReport, InvalidAssessmentError>)> = inputs
        .into_par_iter()
        .map(|input| {
            let report = build_student_report(catalog, &input.rows);
            (input, report)
        })
        .collect();

    let mut entries = Vec::with_capacity(results.len());
    let mut failures = Vec::new();
    for (input, result) in results {
        match result {
            Ok(report) => entries.push(ClassEntry {
                student_id: input.student_id,
                surname: input.surname,
                given_name: input.given_name,
                report,
            }),
            Err(error) => failures.push(StudentFailure {
                student_id: input.student_id,
                surname: input.surname,
                given_name: input.given_name,
                error,
            }),
        }
    }

    ClassBatch {
        statistics: build_class_statistics(entries),
        failures,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(subject: &str, subject_weight: f64, weight: f64, raw: f64, max: f64, date: &str) -> ScoredAssessment {
        ScoredAssessment {
            subject_id: format!("subj-{}", subject.to_ascii_lowercase()),
            subject_name: subject.to_string(),
            subject_weight,
            assessment_label: format!("{} {}", subject, date),
            assessment_type: AssessmentType::Interrogation,
            assessment_weight: weight,
            raw_score: raw,
            max_score: max,
            date: date.to_string(),
            observation: None,
        }
    }

    fn subject(name: &str, weight: f64, average: f64) -> SubjectAverage {
        SubjectAverage {
            subject_id: name.to_ascii_lowercase(),
            subject_name: name.to_string(),
            subject_weight: weight,
            average,
            mention: mention_band(average),
            evaluated: true,
            assessment_breakdown: vec![AssessmentScore {
                label: "Examen".into(),
                assessment_type: AssessmentType::Examen,
                date: "2024-10-01".into(),
                weight: 1.0,
                normalized_score: average,
                mention: mention_band(average),
                observation: None,
            }],
        }
    }

    fn entry(id: &str, surname: &str, given: &str, overall: Option<f64>) -> ClassEntry {
        let subjects: Vec<SubjectAverage> = overall
            .map(|avg| vec![subject("Math", 1.0, avg)])
            .unwrap_or_default();
        ClassEntry {
            student_id: id.to_string(),
            surname: surname.to_string(),
            given_name: given.to_string(),
            report: build_report(&subjects),
        }
    }

    #[test]
    fn round_off_matches_vb6() {
        assert_eq!(round_off_1_decimal(0.0), 0.0);
        assert_eq!(round_off_1_decimal(3.54), 3.5);
        assert_eq!(round_off_1_decimal(3.55), 3.6);
        assert_eq!(round_off_1_decimal(66.666_666), 66.7);
    }

    #[test]
    fn normalize_bounds() {
        assert_eq!(normalize(10.0, 10.0).unwrap(), 20.0);
        assert_eq!(normalize(0.0, 10.0).unwrap(), 0.0);
        assert_eq!(normalize(15.0, 30.0).unwrap(), 10.0);
    }

    #[test]
    fn normalize_is_linear_in_raw_score() {
        for &(raw, max) in &[(3.0, 10.0), (7.5, 40.0), (12.0, 20.0)] {
            for &k in &[0.5, 2.0, 3.25] {
                let lhs = normalize(k * raw, max).unwrap();
                let rhs = k * normalize(raw, max).unwrap();
                assert!((lhs - rhs).abs() < 1e-9, "k={k} raw={raw} max={max}");
            }
        }
    }

    #[test]
    fn normalize_does_not_clamp_scores_above_max() {
        assert_eq!(normalize(12.0, 10.0).unwrap(), 24.0);
    }

    #[test]
    fn normalize_rejects_non_positive_max() {
        assert!(normalize(5.0, 0.0).is_err());
        assert!(normalize(5.0, -10.0).is_err());
        assert!(normalize(5.0, f64::NAN).is_err());
    }

    #[test]
    fn mention_band_boundaries_are_inclusive_low() {
        assert_eq!(mention_band(16.0).label, "Excellent");
        assert_eq!(mention_band(15.99).label, "Très bien");
        assert_eq!(mention_band(14.0).label, "Très bien");
        assert_eq!(mention_band(12.0).label, "Bien");
        assert_eq!(mention_band(11.99).label, "Assez bien");
        assert_eq!(mention_band(10.0).label, "Assez bien");
        assert_eq!(mention_band(8.0).label, "Passable");
        assert_eq!(mention_band(7.99).label, "Insuffisant");
        assert_eq!(mention_band(0.0).label, "Insuffisant");
        assert_eq!(mention_band(25.0).rank, 1);
        assert_eq!(mention_band(0.0).rank, 6);
        assert_eq!(mention_band(f64::NAN).label, "Insuffisant");
    }

    #[test]
    fn empty_subject_is_not_an_error() {
        let s = aggregate_subject(&[]).expect("empty subject");
        assert_eq!(s.average, 0.0);
        assert_eq!(s.mention.label, "Insuffisant");
        assert!(!s.evaluated);
        assert!(s.assessment_breakdown.is_empty());
    }

    #[test]
    fn subject_average_is_weighted_by_assessment_coefficient() {
        // 8/10 -> 16 (weight 1), 30/40 -> 15 (weight 2): (16 + 30) / 3
        let rows = vec![
            row("Math", 4.0, 1.0, 8.0, 10.0, "2024-10-01"),
            row("Math", 4.0, 2.0, 30.0, 40.0, "2024-11-15"),
        ];
        let s = aggregate_subject(&rows).expect("aggregate");
        assert!((s.average - 46.0 / 3.0).abs() < 1e-9);
        assert_eq!(s.mention.label, "Très bien");
        assert_eq!(s.subject_weight, 4.0);
        assert_eq!(s.assessment_breakdown.len(), 2);
        assert_eq!(s.assessment_breakdown[0].mention.label, "Excellent");
    }

    #[test]
    fn subject_error_names_the_offending_assessment() {
        let rows = vec![
            row("Math", 4.0, 1.0, 8.0, 10.0, "2024-10-01"),
            row("Math", 4.0, 1.0, 8.0, 0.0, "2024-10-02"),
        ];
        let e = aggregate_subject(&rows).expect_err("max score 0");
        assert_eq!(e.subject_name.as_deref(), Some("Math"));
        assert_eq!(e.assessment_label.as_deref(), Some("Math 2024-10-02"));
    }

    #[test]
    fn overall_average_uses_subject_weights() {
        let report = build_report(&[subject("Français", 2.0, 10.0), subject("Math", 3.0, 16.0)]);
        assert!((report.overall_average - 13.6).abs() < 1e-9);
        assert_eq!(report.mention.label, "Bien");
        assert_eq!(report.total_weight, 5.0);
        assert!(report.evaluated);
    }

    #[test]
    fn overall_ignores_unevaluated_and_zero_weight_subjects() {
        let mut zero_weight = subject("Dessin", 0.0, 2.0);
        zero_weight.subject_weight = 0.0;
        let empty = SubjectAverage::empty(&SubjectRef {
            subject_id: "geo".into(),
            subject_name: "Géographie".into(),
            subject_weight: 2.0,
        });
        let report = build_report(&[subject("Math", 3.0, 14.0), zero_weight, empty]);
        assert_eq!(report.overall_average, 14.0);
        assert_eq!(report.total_weight, 3.0);
        assert_eq!(report.subject_averages.len(), 3);
    }

    #[test]
    fn report_with_nothing_recorded_is_not_evaluated() {
        let report = build_report(&[]);
        assert_eq!(report.overall_average, 0.0);
        assert!(!report.evaluated);
        assert_eq!(report.mention.label, "Insuffisant");
    }

    #[test]
    fn report_orders_subjects_by_name_then_first_date() {
        let mut late = subject("Math", 1.0, 10.0);
        late.subject_id = "math-b".into();
        late.assessment_breakdown[0].date = "2024-12-01".into();
        let report = build_report(&[late, subject("Anglais", 1.0, 12.0), subject("Math", 1.0, 11.0)]);
        let order: Vec<&str> = report
            .subject_averages
            .iter()
            .map(|s| s.subject_id.as_str())
            .collect();
        assert_eq!(order, vec!["anglais", "math", "math-b"]);
    }

    #[test]
    fn build_report_is_idempotent() {
        let input = vec![subject("Math", 3.0, 16.0), subject("Français", 2.0, 10.0)];
        let a = build_report(&input);
        let b = build_report(&input);
        assert_eq!(a, b);
        assert_eq!(a.overall_average.to_bits(), b.overall_average.to_bits());
    }

    #[test]
    fn grouping_keeps_first_appearance_order() {
        let rows = vec![
            row("Math", 1.0, 1.0, 5.0, 10.0, "2024-10-01"),
            row("Bio", 1.0, 1.0, 5.0, 10.0, "2024-10-02"),
            row("Math", 1.0, 1.0, 7.0, 10.0, "2024-10-03"),
        ];
        let groups = group_by_subject(&rows);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[1][0].subject_name, "Bio");
    }

    #[test]
    fn student_report_lists_catalog_subjects_without_grades() {
        let catalog = vec![
            SubjectRef {
                subject_id: "subj-math".into(),
                subject_name: "Math".into(),
                subject_weight: 3.0,
            },
            SubjectRef {
                subject_id: "subj-hist".into(),
                subject_name: "Histoire".into(),
                subject_weight: 2.0,
            },
        ];
        let rows = vec![
            row("Math", 3.0, 1.0, 16.0, 20.0, "2024-10-01"),
            row("Chimie", 1.0, 1.0, 10.0, 20.0, "2024-10-01"),
        ];
        let report = build_student_report(&catalog, &rows).expect("report");
        assert_eq!(report.subject_averages.len(), 3);
        let hist = report
            .subject_averages
            .iter()
            .find(|s| s.subject_id == "subj-hist")
            .expect("history listed");
        assert!(!hist.evaluated);
        // (16*3 + 10*1) / 4
        assert!((report.overall_average - 14.5).abs() < 1e-9);
    }

    #[test]
    fn class_statistics_with_unevaluated_student() {
        let stats = build_class_statistics(vec![
            entry("c", "Ilunga", "Céline", None),
            entry("b", "Kabila", "Jean", Some(9.0)),
            entry("a", "Mbuyi", "Aline", Some(18.0)),
        ]);
        assert_eq!(stats.class_average, 13.5);
        assert_eq!(stats.pass_rate, 50.0);
        assert_eq!(stats.top_score, 18.0);
        assert_eq!(stats.lowest_score, 9.0);
        assert_eq!(stats.evaluated_count, 2);
        assert_eq!(stats.student_count, 3);

        let ids: Vec<&str> = stats
            .student_reports
            .iter()
            .map(|s| s.student_id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(stats.student_reports[2].status, Some(NOT_EVALUATED));
        assert_eq!(stats.student_reports[2].rank, None);
        assert_eq!(stats.student_reports[0].rank, Some(1));
    }

    #[test]
    fn ties_break_by_surname_then_given_name_and_share_rank() {
        let stats = build_class_statistics(vec![
            entry("3", "Tshala", "Bea", Some(12.0)),
            entry("2", "Kasongo", "Zoé", Some(12.0)),
            entry("1", "Kasongo", "Alain", Some(12.0)),
            entry("4", "Amisi", "Paul", Some(11.0)),
        ]);
        let ids: Vec<&str> = stats
            .student_reports
            .iter()
            .map(|s| s.student_id.as_str())
            .collect();
        assert_eq!(ids, vec!["1", "2", "3", "4"]);
        let ranks: Vec<Option<u32>> = stats.student_reports.iter().map(|s| s.rank).collect();
        assert_eq!(ranks, vec![Some(1), Some(1), Some(1), Some(4)]);
    }

    #[test]
    fn class_statistics_without_evaluated_students_are_zero() {
        let stats = build_class_statistics(vec![entry("x", "Banza", "Eric", None)]);
        assert_eq!(stats.class_average, 0.0);
        assert_eq!(stats.pass_rate, 0.0);
        assert_eq!(stats.top_score, 0.0);
        assert_eq!(stats.evaluated_count, 0);
    }

    #[test]
    fn pass_rate_rounds_to_one_decimal() {
        let stats = build_class_statistics(vec![
            entry("a", "A", "a", Some(10.0)),
            entry("b", "B", "b", Some(12.0)),
            entry("c", "C", "c", Some(4.0)),
        ]);
        assert_eq!(stats.pass_rate, 66.7);
    }

    #[test]
    fn batch_isolates_invalid_students() {
        let inputs = vec![
            StudentInput {
                student_id: "ok".into(),
                surname: "Lukusa".into(),
                given_name: "Marie".into(),
                rows: vec![row("Math", 2.0, 1.0, 14.0, 20.0, "2024-10-01")],
            },
            StudentInput {
                student_id: "bad".into(),
                surname: "Mutombo".into(),
                given_name: "Paul".into(),
                rows: vec![row("Math", 2.0, 1.0, 14.0, 0.0, "2024-10-01")],
            },
        ];
        let batch = build_class_batch(&[], inputs);
        assert_eq!(batch.failures.len(), 1);
        assert_eq!(batch.failures[0].student_id, "bad");
        assert_eq!(batch.statistics.student_reports.len(), 1);
        assert_eq!(batch.statistics.student_reports[0].report.overall_average, 14.0);
    }

    #[test]
    fn invalid_assessment_maps_to_user_facing_calc_error() {
        let e: CalcError = normalize(1.0, 0.0).unwrap_err().into();
        assert_eq!(e.code, "invalid_assessment");
        assert_eq!(e.message, INVALID_ASSESSMENT_MESSAGE);
    }

    #[test]
    fn period_and_type_parsing() {
        assert_eq!(Period::parse("2eme_trimestre"), Some(Period::SecondTerm));
        assert_eq!(Period::parse("annuelle"), Some(Period::Annual));
        assert_eq!(Period::parse("semestre"), None);
        assert!(!Period::Annual.is_term());
        assert_eq!(AssessmentType::parse("TP"), Some(AssessmentType::TravailPratique));
        assert_eq!(AssessmentType::from_stored("quiz"), AssessmentType::Interrogation);
    }

    #[test]
    fn scores_landing_on_a_band_floor_get_that_band() {
        // 9.6/12 and 4.8/12 are exactly 16/20 and 8/20.
        let top = aggregate_subject(&[row("Math", 1.0, 1.0, 9.6, 12.0, "2024-10-01")])
            .expect("aggregate");
        assert_eq!(top.mention.label, "Excellent");
        let low = aggregate_subject(&[row("Math", 1.0, 1.0, 4.8, 12.0, "2024-10-01")])
            .expect("aggregate");
        assert_eq!(low.mention.label, "Passable");
        assert_eq!(mention_band(16.0 - 1e-12).label, "Excellent");
        assert_eq!(mention_band(10.0 - 1e-12).label, "Assez bien");
    }

    #[test]
    fn equal_averages_reached_differently_share_a_rank() {
        // One subject at 13.6 against (10*2 + 16*3) / 5.
        let single = ClassEntry {
            student_id: "z".into(),
            surname: "Zola".into(),
            given_name: "Marc".into(),
            report: build_report(&[subject("Math", 1.0, 13.6 - 2e-15)]),
        };
        let mixed = ClassEntry {
            student_id: "a".into(),
            surname: "Amisi".into(),
            given_name: "Léa".into(),
            report: build_report(&[subject("Français", 2.0, 10.0), subject("Math", 3.0, 16.0)]),
        };
        let stats = build_class_statistics(vec![single, mixed]);
        let ranking: Vec<(&str, Option<u32>)> = stats
            .student_reports
            .iter()
            .map(|s| (s.surname.as_str(), s.rank))
            .collect();
        assert_eq!(ranking, vec![("Amisi", Some(1)), ("Zola", Some(1))]);
        assert_eq!(stats.pass_rate, 100.0);
    }
}
