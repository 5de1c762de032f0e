#![allow(dead_code)]

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_bulletind");
    let mut child = Command::new(exe)
        .env_remove("BULLETIND_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn bulletind");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn auth(role: &str) -> Value {
    json!({ "userId": format!("{}-1", role), "role": role })
}

pub fn send_line(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, line: &str) -> Value {
    writeln!(stdin, "{}", line).expect("write request");
    stdin.flush().expect("flush request");

    let mut out = String::new();
    reader.read_line(&mut out).expect("read response line");
    assert!(!out.trim().is_empty(), "empty response for {}", line);
    serde_json::from_str(out.trim()).expect("parse response json")
}

pub fn request_as(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
    auth: Option<Value>,
) -> Value {
    let mut payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    if let Some(a) = auth {
        payload["auth"] = a;
    }
    let value = send_line(stdin, reader, &payload.to_string());
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

/// Sends as `admin` and unwraps `result`.
pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let value = request_as(stdin, reader, id, method, params, Some(auth("admin")));
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or(Value::Null)
}

pub fn error_code(value: &Value) -> Option<&str> {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

pub fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, value))
        .to_string()
}

pub struct Fixture {
    pub year_id: String,
    pub class_id: String,
}

/// Opens the workspace and creates one year with one class.
pub fn open_class(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) -> Fixture {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let year = request_ok(
        stdin,
        reader,
        "year",
        "years.create",
        json!({ "label": "2025-2026", "startDate": "2025-09-01", "endDate": "2026-07-02" }),
    );
    let year_id = str_field(&year, "academicYearId");
    let class = request_ok(
        stdin,
        reader,
        "class",
        "classes.create",
        json!({ "academicYearId": year_id.clone(), "name": "4e Scientifique", "level": "4" }),
    );
    Fixture {
        year_id,
        class_id: str_field(&class, "classId"),
    }
}

pub fn add_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    class_id: &str,
    surname: &str,
    given_name: &str,
) -> String {
    let v = request_ok(
        stdin,
        reader,
        &format!("student-{}", surname),
        "students.create",
        json!({ "classId": class_id, "surname": surname, "givenName": given_name }),
    );
    str_field(&v, "studentId")
}

pub fn add_subject(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    class_id: &str,
    name: &str,
    coefficient: f64,
) -> String {
    let v = request_ok(
        stdin,
        reader,
        &format!("subject-{}", name),
        "subjects.create",
        json!({ "classId": class_id, "name": name, "coefficient": coefficient }),
    );
    str_field(&v, "subjectId")
}

#[allow(clippy::too_many_arguments)]
pub fn add_evaluation(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    subject_id: &str,
    label: &str,
    coefficient: f64,
    max_score: f64,
    period: &str,
    date: &str,
) -> String {
    let v = request_ok(
        stdin,
        reader,
        &format!("eval-{}", label),
        "evaluations.create",
        json!({
            "subjectId": subject_id,
            "label": label,
            "type": "interrogation",
            "coefficient": coefficient,
            "maxScore": max_score,
            "period": period,
            "date": date,
        }),
    );
    str_field(&v, "evaluationId")
}

pub fn record(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    evaluation_id: &str,
    grades: &[(&str, f64)],
) {
    let grades: Vec<Value> = grades
        .iter()
        .map(|(s, raw)| json!({ "studentId": s, "rawScore": raw }))
        .collect();
    let v = request_ok(
        stdin,
        reader,
        &format!("grades-{}", evaluation_id),
        "grades.record",
        json!({ "evaluationId": evaluation_id, "grades": grades }),
    );
    assert_eq!(
        v.get("recorded").and_then(|v| v.as_u64()),
        Some(grades.len() as u64)
    );
}

pub fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}
