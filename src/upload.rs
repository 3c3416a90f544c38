use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use uuid::Uuid;

use crate::grades::{self, RemarkContext};

pub const DEFAULT_CHUNK_SIZE: usize = 50;
const CHUNK_PAUSE_MS: u64 = 25;

pub const OUTCOME_CREATED: &str = "created";
pub const OUTCOME_UPDATED: &str = "updated";
pub const OUTCOME_SKIPPED: &str = "skipped-better-grade-exists";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowOutcome {
    pub row: usize,
    pub identifier: String,
    pub course_code: String,
    pub outcome: String,
    pub severity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl RowOutcome {
    fn rejected(row: usize, identifier: &str, course_code: &str, reason: &str) -> Self {
        Self {
            row,
            identifier: identifier.to_string(),
            course_code: course_code.to_string(),
            outcome: format!("rejected: {}", reason),
            severity: "error".to_string(),
            note: None,
        }
    }
}

pub struct UploadContext<'a> {
    pub conn: &'a Connection,
    pub actor: String,
    pub academic_year: String,
    pub semester: String,
    pub allow_legacy: bool,
    pub cancel: &'a AtomicBool,
    pub chunk_size: usize,
}

/// Strip quoting and punctuation that spreadsheet exports sprinkle into names.
pub fn clean_name(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '"' | '\'' | '.' | ','))
        .collect::<String>()
        .trim()
        .to_string()
}

pub fn clean_student_number(raw: &str) -> String {
    raw.chars().filter(|c| *c != '-').collect::<String>().trim().to_string()
}

/// Sheet-to-JSON cells arrive as strings or bare numbers depending on the
/// column format; coerce either to a trimmed string.
fn cell_str(row: &serde_json::Value, key: &str) -> String {
    match row.get(key) {
        Some(serde_json::Value::String(s)) => s.trim().to_string(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn cell_f64(row: &serde_json::Value, key: &str) -> Option<f64> {
    match row.get(key) {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

struct ParsedRow {
    student_number: String,
    first_name: String,
    last_name: String,
    course_code: String,
    grade_raw: String,
    re_exam_raw: String,
    credit_unit: Option<f64>,
    instructor: String,
    academic_year: String,
    semester: String,
}

impl ParsedRow {
    fn parse(row: &serde_json::Value, ctx: &UploadContext<'_>) -> ParsedRow {
        // Row-level term fields override the request-level term.
        let ay = cell_str(row, "academicYear");
        let sem = cell_str(row, "semester");
        ParsedRow {
            student_number: clean_student_number(&cell_str(row, "studentNumber")),
            first_name: clean_name(&cell_str(row, "firstName")),
            last_name: clean_name(&cell_str(row, "lastName")),
            course_code: cell_str(row, "courseCode").to_uppercase(),
            grade_raw: cell_str(row, "grade"),
            re_exam_raw: cell_str(row, "reExam"),
            credit_unit: cell_f64(row, "creditUnit"),
            instructor: cell_str(row, "instructor"),
            academic_year: if ay.is_empty() { ctx.academic_year.clone() } else { ay },
            semester: if sem.is_empty() { ctx.semester.clone() } else { sem },
        }
    }

    fn identifier(&self) -> String {
        if !self.student_number.is_empty() {
            self.student_number.clone()
        } else {
            format!("{}, {}", self.last_name, self.first_name)
        }
    }
}

struct StudentRef {
    id: String,
    student_number: String,
    course: String,
    major: String,
}

/// Process an entire upload batch. Always returns one outcome per input row,
/// in input order; a bad row never aborts the batch. Rows are handled in
/// chunks with a cooperative cancel check and a short pause between chunks to
/// go easy on a shared database.
pub fn reconcile_batch(ctx: &UploadContext<'_>, rows: &[serde_json::Value]) -> Vec<RowOutcome> {
    let chunk_size = ctx.chunk_size.max(1);
    let mut outcomes = Vec::with_capacity(rows.len());
    let mut cancelled = false;

    for (chunk_idx, chunk) in rows.chunks(chunk_size).enumerate() {
        if ctx.cancel.load(Ordering::Relaxed) {
            cancelled = true;
        }
        for (offset, row) in chunk.iter().enumerate() {
            let row_no = chunk_idx * chunk_size + offset;
            if cancelled {
                let parsed = ParsedRow::parse(row, ctx);
                outcomes.push(RowOutcome::rejected(
                    row_no,
                    &parsed.identifier(),
                    &parsed.course_code,
                    "upload cancelled",
                ));
                continue;
            }
            outcomes.push(process_row(ctx, row_no, row));
        }
        if !cancelled && (chunk_idx + 1) * chunk_size < rows.len() {
            std::thread::sleep(Duration::from_millis(CHUNK_PAUSE_MS));
        }
    }

    outcomes
}

fn process_row(ctx: &UploadContext<'_>, row_no: usize, row: &serde_json::Value) -> RowOutcome {
    let parsed = ParsedRow::parse(row, ctx);
    let ident = parsed.identifier();

    let has_identity =
        !parsed.student_number.is_empty() || (!parsed.first_name.is_empty() && !parsed.last_name.is_empty());
    if !has_identity
        || parsed.course_code.is_empty()
        || parsed.grade_raw.is_empty()
        || parsed.academic_year.is_empty()
        || parsed.semester.is_empty()
    {
        return RowOutcome::rejected(row_no, &ident, &parsed.course_code, "missing required fields");
    }

    let grade = grades::normalize_grade(&parsed.grade_raw);
    if grade.is_empty() {
        return RowOutcome::rejected(row_no, &ident, &parsed.course_code, "invalid grade");
    }
    let re_exam = {
        let r = grades::normalize_grade(&parsed.re_exam_raw);
        if r.is_empty() {
            None
        } else {
            Some(r)
        }
    };

    if !grades::is_valid_academic_year(&parsed.academic_year)
        || !grades::is_valid_semester(&parsed.semester)
    {
        return RowOutcome::rejected(row_no, &ident, &parsed.course_code, "invalid academic term");
    }

    let term_id = match lookup_term(ctx.conn, &parsed.academic_year, &parsed.semester) {
        Ok(Some(id)) => id,
        Ok(None) => {
            return RowOutcome::rejected(
                row_no,
                &ident,
                &parsed.course_code,
                "academic term not found",
            )
        }
        Err(e) => return RowOutcome::rejected(row_no, &ident, &parsed.course_code, &e.to_string()),
    };

    let student = match resolve_student(ctx.conn, &parsed) {
        Ok(s) => s,
        Err(reason) => return RowOutcome::rejected(row_no, &ident, &parsed.course_code, &reason),
    };

    // Curriculum and offering linkage; the legacy override records the grade
    // with no linkage at all.
    let mut curriculum_subject_id: Option<String> = None;
    let mut offering_id: Option<String> = None;
    let mut curriculum_units: Option<f64> = None;
    match lookup_curriculum_subject(ctx.conn, &student.course, &student.major, &parsed.course_code)
    {
        Ok(Some((cs_id, units))) => {
            match lookup_active_offering(ctx.conn, &cs_id, &term_id) {
                Ok(Some(off_id)) => {
                    curriculum_subject_id = Some(cs_id);
                    offering_id = Some(off_id);
                    curriculum_units = Some(units);
                }
                Ok(None) => {
                    if !ctx.allow_legacy {
                        return RowOutcome::rejected(
                            row_no,
                            &ident,
                            &parsed.course_code,
                            "no active offering for term",
                        );
                    }
                }
                Err(e) => {
                    return RowOutcome::rejected(row_no, &ident, &parsed.course_code, &e.to_string())
                }
            }
        }
        Ok(None) => {
            if !ctx.allow_legacy {
                return RowOutcome::rejected(
                    row_no,
                    &ident,
                    &parsed.course_code,
                    "course not in curriculum",
                );
            }
        }
        Err(e) => return RowOutcome::rejected(row_no, &ident, &parsed.course_code, &e.to_string()),
    }

    let existing: Option<(String, String)> = match ctx
        .conn
        .query_row(
            "SELECT id, grade FROM grade_records
             WHERE student_id = ? AND course_code = ? AND term_id = ?",
            (&student.id, &parsed.course_code, &term_id),
            |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return RowOutcome::rejected(row_no, &ident, &parsed.course_code, &e.to_string()),
    };

    if let Some((_, ref existing_grade)) = existing {
        if grades::is_better_grade(existing_grade, &grade) {
            return RowOutcome {
                row: row_no,
                identifier: ident,
                course_code: parsed.course_code,
                outcome: OUTCOME_SKIPPED.to_string(),
                severity: "warning".to_string(),
                note: None,
            };
        }
    }

    let remarks = grades::compute_final_remarks(&grade, re_exam.as_deref(), RemarkContext::Upload);
    let credit_unit = parsed.credit_unit.or(curriculum_units).unwrap_or(0.0);
    let now = Utc::now().to_rfc3339();

    let write = if let Some((record_id, _)) = existing {
        ctx.conn
            .execute(
                "UPDATE grade_records
                 SET grade = ?, re_exam = ?, remarks = ?, credit_unit = ?, instructor = ?,
                     uploaded_by = ?, curriculum_subject_id = ?, offering_id = ?, updated_at = ?
                 WHERE id = ?",
                (
                    &grade,
                    &re_exam,
                    remarks,
                    credit_unit,
                    &parsed.instructor,
                    &ctx.actor,
                    &curriculum_subject_id,
                    &offering_id,
                    &now,
                    &record_id,
                ),
            )
            .map(|_| OUTCOME_UPDATED)
    } else {
        ctx.conn
            .execute(
                "INSERT INTO grade_records(
                    id, student_id, course_code, term_id, curriculum_subject_id, offering_id,
                    grade, re_exam, remarks, credit_unit, instructor, uploaded_by, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    &student.id,
                    &parsed.course_code,
                    &term_id,
                    &curriculum_subject_id,
                    &offering_id,
                    &grade,
                    &re_exam,
                    remarks,
                    credit_unit,
                    &parsed.instructor,
                    &ctx.actor,
                    &now,
                ),
            )
            .map(|_| OUTCOME_CREATED)
    };

    let action = match write {
        Ok(a) => a,
        Err(e) => return RowOutcome::rejected(row_no, &ident, &parsed.course_code, &e.to_string()),
    };

    let audit_action = if action == OUTCOME_CREATED { "CREATED" } else { "UPDATED" };
    let audit = ctx.conn.execute(
        "INSERT INTO grade_audit_log(
            id, actor, action, student_number, course_code, academic_year, semester, detail, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            &ctx.actor,
            audit_action,
            &student.student_number,
            &parsed.course_code,
            &parsed.academic_year,
            &parsed.semester,
            format!("grade={} reExam={}", grade, re_exam.as_deref().unwrap_or("-")),
            &now,
        ),
    );

    // The grade write already committed; a failed audit append must still be
    // visible to the caller.
    let (severity, note) = match audit {
        Ok(_) => ("success".to_string(), None),
        Err(e) => (
            "warning".to_string(),
            Some(format!("audit log append failed: {}", e)),
        ),
    };

    RowOutcome {
        row: row_no,
        identifier: ident,
        course_code: parsed.course_code,
        outcome: action.to_string(),
        severity,
        note,
    }
}

fn lookup_term(
    conn: &Connection,
    academic_year: &str,
    semester: &str,
) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT id FROM academic_terms WHERE academic_year = ? AND semester = ?",
        (academic_year, semester),
        |r| r.get(0),
    )
    .optional()
}

fn resolve_student(conn: &Connection, parsed: &ParsedRow) -> Result<StudentRef, String> {
    if !parsed.student_number.is_empty() {
        return conn
            .query_row(
                "SELECT id, student_number, course, major FROM students WHERE student_number = ?",
                [&parsed.student_number],
                |r| {
                    Ok(StudentRef {
                        id: r.get(0)?,
                        student_number: r.get(1)?,
                        course: r.get(2)?,
                        major: r.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(|e| e.to_string())?
            .ok_or_else(|| "student not found".to_string());
    }

    let mut stmt = conn
        .prepare(
            "SELECT id, student_number, course, major FROM students
             WHERE LOWER(first_name) = LOWER(?) AND LOWER(last_name) = LOWER(?)",
        )
        .map_err(|e| e.to_string())?;
    let matches = stmt
        .query_map([&parsed.first_name, &parsed.last_name], |r| {
            Ok(StudentRef {
                id: r.get(0)?,
                student_number: r.get(1)?,
                course: r.get(2)?,
                major: r.get(3)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| e.to_string())?;

    let mut it = matches.into_iter();
    match (it.next(), it.next()) {
        (Some(only), None) => Ok(only),
        (None, _) => Err("student not found".to_string()),
        _ => Err("multiple students match name".to_string()),
    }
}

fn lookup_curriculum_subject(
    conn: &Connection,
    course: &str,
    major: &str,
    course_code: &str,
) -> rusqlite::Result<Option<(String, f64)>> {
    conn.query_row(
        "SELECT id, lecture_units + lab_units FROM curriculum_subjects
         WHERE course = ? AND major = ? AND course_code = ?",
        (course, major, course_code),
        |r| Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?)),
    )
    .optional()
}

fn lookup_active_offering(
    conn: &Connection,
    curriculum_subject_id: &str,
    term_id: &str,
) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT id FROM subject_offerings
         WHERE curriculum_subject_id = ? AND term_id = ? AND is_active = 1",
        (curriculum_subject_id, term_id),
        |r| r.get(0),
    )
    .optional()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_workspace(prefix: &str) -> PathBuf {
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

    fn seeded_conn(prefix: &str) -> Connection {
        let ws = temp_workspace(prefix);
        let conn = crate::db::open_db(&ws).expect("open db");
        conn.execute(
            "INSERT INTO academic_terms(id, academic_year, semester, created_at)
             VALUES ('term-1', 'AY_2024_2025', 'FIRST', '2024-08-01T00:00:00Z')",
            [],
        )
        .expect("seed term");
        conn.execute(
            "INSERT INTO students(id, student_number, first_name, last_name, course, major,
                                  year_level, status, created_at)
             VALUES ('stud-1', '20240001', 'Juan', 'Dela Cruz', 'BSIT', '', 1, 'approved',
                     '2024-08-01T00:00:00Z')",
            [],
        )
        .expect("seed student");
        conn.execute(
            "INSERT INTO curriculum_subjects(id, course, major, year_level, semester, course_code,
                                             title, lecture_units, lab_units)
             VALUES ('cs-1', 'BSIT', '', 1, 'FIRST', 'MATH101', 'College Algebra', 3, 0)",
            [],
        )
        .expect("seed subject");
        conn.execute(
            "INSERT INTO subject_offerings(id, curriculum_subject_id, term_id, is_active, created_at)
             VALUES ('off-1', 'cs-1', 'term-1', 1, '2024-08-01T00:00:00Z')",
            [],
        )
        .expect("seed offering");
        conn
    }

    fn ctx<'a>(conn: &'a Connection, cancel: &'a AtomicBool) -> UploadContext<'a> {
        UploadContext {
            conn,
            actor: "registrar@test".to_string(),
            academic_year: "AY_2024_2025".to_string(),
            semester: "FIRST".to_string(),
            allow_legacy: false,
            cancel,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    fn row(grade: &str) -> serde_json::Value {
        json!({
            "studentNumber": "2024-0001",
            "courseCode": "MATH101",
            "grade": grade,
            "creditUnit": 3,
        })
    }

    #[test]
    fn mixed_batch_created_rejected_skipped() {
        let conn = seeded_conn("registrard-upload-mixed");
        let cancel = AtomicBool::new(false);
        let ctx = ctx(&conn, &cancel);

        // Row 1 valid, row 2 unknown term, row 3 worse duplicate of row 1.
        let rows = vec![
            row("1.75"),
            json!({
                "studentNumber": "2024-0001",
                "courseCode": "MATH101",
                "grade": "2.00",
                "academicYear": "AY_2030_2031",
                "semester": "FIRST",
            }),
            row("3.00"),
        ];
        let outcomes = reconcile_batch(&ctx, &rows);
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].outcome, OUTCOME_CREATED);
        assert_eq!(outcomes[1].outcome, "rejected: academic term not found");
        assert_eq!(outcomes[2].outcome, OUTCOME_SKIPPED);
        assert_eq!(outcomes[2].severity, "warning");

        let stored: String = conn
            .query_row("SELECT grade FROM grade_records WHERE student_id = 'stud-1'", [], |r| {
                r.get(0)
            })
            .expect("stored grade");
        assert_eq!(stored, "1.75");
    }

    #[test]
    fn rerun_is_idempotent_updated_no_drift() {
        let conn = seeded_conn("registrard-upload-idem");
        let cancel = AtomicBool::new(false);
        let ctx = ctx(&conn, &cancel);

        let rows = vec![row("2.25")];
        let first = reconcile_batch(&ctx, &rows);
        assert_eq!(first[0].outcome, OUTCOME_CREATED);
        let second = reconcile_batch(&ctx, &rows);
        assert_eq!(second[0].outcome, OUTCOME_UPDATED);

        let (count, grade, remarks): (i64, String, String) = conn
            .query_row(
                "SELECT COUNT(*), MAX(grade), MAX(remarks) FROM grade_records", [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .expect("stored");
        assert_eq!(count, 1);
        assert_eq!(grade, "2.25");
        assert_eq!(remarks, crate::grades::REMARK_PASSED);
    }

    #[test]
    fn malformed_rows_never_abort_the_batch() {
        let conn = seeded_conn("registrard-upload-malformed");
        let cancel = AtomicBool::new(false);
        let ctx = ctx(&conn, &cancel);

        let rows = vec![
            json!({}),
            json!({ "firstName": "Juan" }),
            json!({ "studentNumber": "9999", "courseCode": "MATH101", "grade": "1.00" }),
            row("1.00"),
        ];
        let outcomes = reconcile_batch(&ctx, &rows);
        assert_eq!(outcomes.len(), 4);
        assert_eq!(outcomes[0].outcome, "rejected: missing required fields");
        assert_eq!(outcomes[1].outcome, "rejected: missing required fields");
        assert_eq!(outcomes[2].outcome, "rejected: student not found");
        assert_eq!(outcomes[3].outcome, OUTCOME_CREATED);
    }

    #[test]
    fn name_match_is_case_insensitive_and_exact() {
        let conn = seeded_conn("registrard-upload-name");
        let cancel = AtomicBool::new(false);
        let ctx = ctx(&conn, &cancel);

        let rows = vec![json!({
            "firstName": "\"juan\"",
            "lastName": "dela cruz",
            "courseCode": "MATH101",
            "grade": "1.50",
        })];
        let outcomes = reconcile_batch(&ctx, &rows);
        assert_eq!(outcomes[0].outcome, OUTCOME_CREATED);
        assert_eq!(outcomes[0].identifier, "dela cruz, juan");
    }

    #[test]
    fn unknown_course_rejected_unless_legacy_allowed() {
        let conn = seeded_conn("registrard-upload-legacy");
        let cancel = AtomicBool::new(false);
        let mut ctx = ctx(&conn, &cancel);

        let rows = vec![json!({
            "studentNumber": "20240001",
            "courseCode": "OLD999",
            "grade": "2.00",
        })];
        let rejected = reconcile_batch(&ctx, &rows);
        assert_eq!(rejected[0].outcome, "rejected: course not in curriculum");

        ctx.allow_legacy = true;
        let created = reconcile_batch(&ctx, &rows);
        assert_eq!(created[0].outcome, OUTCOME_CREATED);

        let (cs_id, off_id): (Option<String>, Option<String>) = conn
            .query_row(
                "SELECT curriculum_subject_id, offering_id FROM grade_records
                 WHERE course_code = 'OLD999'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .expect("legacy record");
        assert_eq!(cs_id, None);
        assert_eq!(off_id, None);
    }

    #[test]
    fn inactive_offering_rejects_row() {
        let conn = seeded_conn("registrard-upload-inactive");
        conn.execute("UPDATE subject_offerings SET is_active = 0 WHERE id = 'off-1'", [])
            .expect("deactivate");
        let cancel = AtomicBool::new(false);
        let ctx = ctx(&conn, &cancel);

        let outcomes = reconcile_batch(&ctx, &[row("1.00")]);
        assert_eq!(outcomes[0].outcome, "rejected: no active offering for term");
    }

    #[test]
    fn cancellation_reports_remaining_rows_without_touching_them() {
        let conn = seeded_conn("registrard-upload-cancel");
        let cancel = AtomicBool::new(true);
        let mut ctx = ctx(&conn, &cancel);
        ctx.chunk_size = 2;

        let rows = vec![row("1.00"), row("1.25"), row("1.50")];
        let outcomes = reconcile_batch(&ctx, &rows);
        assert_eq!(outcomes.len(), 3);
        for o in &outcomes {
            assert_eq!(o.outcome, "rejected: upload cancelled");
        }
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM grade_records", [], |r| r.get(0))
            .expect("count");
        assert_eq!(count, 0);
    }

    #[test]
    fn re_exam_drives_stored_remarks() {
        let conn = seeded_conn("registrard-upload-reexam");
        let cancel = AtomicBool::new(false);
        let ctx = ctx(&conn, &cancel);

        let rows = vec![json!({
            "studentNumber": "20240001",
            "courseCode": "MATH101",
            "grade": "5.00",
            "reExam": "3.00",
        })];
        let outcomes = reconcile_batch(&ctx, &rows);
        assert_eq!(outcomes[0].outcome, OUTCOME_CREATED);
        let remarks: String = conn
            .query_row("SELECT remarks FROM grade_records", [], |r| r.get(0))
            .expect("remarks");
        assert_eq!(remarks, crate::grades::REMARK_PASSED);
    }

    #[test]
    fn audit_failure_downgrades_severity_but_keeps_the_grade() {
        let conn = seeded_conn("registrard-upload-audit-fail");
        conn.execute("DROP TABLE grade_audit_log", [])
            .expect("drop audit table");
        let cancel = AtomicBool::new(false);
        let ctx = ctx(&conn, &cancel);

        let outcomes = reconcile_batch(&ctx, &[row("1.75")]);
        assert_eq!(outcomes[0].outcome, OUTCOME_CREATED);
        assert_eq!(outcomes[0].severity, "warning");
        assert!(outcomes[0]
            .note
            .as_deref()
            .unwrap_or("")
            .contains("audit log append failed"));

        let stored: String = conn
            .query_row("SELECT grade FROM grade_records", [], |r| r.get(0))
            .expect("stored grade");
        assert_eq!(stored, "1.75");
    }

    #[test]
    fn audit_log_rows_tag_created_then_updated() {
        let conn = seeded_conn("registrard-upload-audit");
        let cancel = AtomicBool::new(false);
        let ctx = ctx(&conn, &cancel);

        let _ = reconcile_batch(&ctx, &[row("2.00")]);
        let _ = reconcile_batch(&ctx, &[row("1.00")]);

        let mut stmt = conn
            .prepare("SELECT action FROM grade_audit_log ORDER BY created_at, action")
            .expect("prepare");
        let actions: Vec<String> = stmt
            .query_map([], |r| r.get(0))
            .expect("query")
            .collect::<Result<Vec<_>, _>>()
            .expect("collect");
        assert_eq!(actions, vec!["CREATED".to_string(), "UPDATED".to_string()]);
    }
}
