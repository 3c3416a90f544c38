use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use crate::grades::{self, RemarkContext, RecordForGpa};
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    get_opt_f64, get_opt_str, get_required_str, require_can, require_db, require_grade_access,
    require_session, HandlerErr, Session,
};
use crate::ipc::types::{AppState, Request};
use crate::policy::Action;
use crate::upload::clean_student_number;

struct StudentRef {
    id: String,
    course: String,
    major: String,
}

fn resolve_term(
    conn: &Connection,
    academic_year: &str,
    semester: &str,
) -> Result<String, HandlerErr> {
    if !grades::is_valid_academic_year(academic_year) || !grades::is_valid_semester(semester) {
        return Err(HandlerErr::bad_params("invalid academic term"));
    }
    conn.query_row(
        "SELECT id FROM academic_terms WHERE academic_year = ? AND semester = ?",
        (academic_year, semester),
        |r| r.get(0),
    )
    .optional()
    .map_err(HandlerErr::db)?
    .ok_or_else(|| HandlerErr::not_found("academic term not found"))
}

fn resolve_student(conn: &Connection, student_number: &str) -> Result<StudentRef, HandlerErr> {
    conn.query_row(
        "SELECT id, course, major FROM students WHERE student_number = ?",
        [student_number],
        |r| {
            Ok(StudentRef {
                id: r.get(0)?,
                course: r.get(1)?,
                major: r.get(2)?,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::db)?
    .ok_or_else(|| HandlerErr::not_found("student not found"))
}

/// Manual grade entry. Same resolution chain as the bulk upload, but any
/// failure is an immediate request error, and an existing record is
/// overwritten without a better-grade comparison: a manual correction is
/// deliberate.
fn handle_enter(
    conn: &Connection,
    session: &Session,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_number = clean_student_number(&get_required_str(params, "studentNumber")?);
    let course_code = get_required_str(params, "courseCode")?.to_uppercase();
    let academic_year = get_required_str(params, "academicYear")?.to_uppercase();
    let semester = get_required_str(params, "semester")?.to_uppercase();

    let grade = grades::normalize_grade(&get_required_str(params, "grade")?);
    if grade.is_empty() {
        return Err(HandlerErr::bad_params("invalid grade"));
    }
    let re_exam = get_opt_str(params, "reExam")
        .map(|r| grades::normalize_grade(&r))
        .filter(|r| !r.is_empty());

    let term_id = resolve_term(conn, &academic_year, &semester)?;
    let student = resolve_student(conn, &student_number)?;

    let subject: Option<(String, f64)> = conn
        .query_row(
            "SELECT id, lecture_units + lab_units FROM curriculum_subjects
             WHERE course = ? AND major = ? AND course_code = ?",
            (&student.course, &student.major, &course_code),
            |r| Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?)),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    let Some((subject_id, subject_units)) = subject else {
        return Err(HandlerErr::not_found("course not in student's curriculum"));
    };

    let offering_id: Option<String> = conn
        .query_row(
            "SELECT id FROM subject_offerings
             WHERE curriculum_subject_id = ? AND term_id = ? AND is_active = 1",
            (&subject_id, &term_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    let Some(offering_id) = offering_id else {
        return Err(HandlerErr::not_found("no active offering for term"));
    };

    let remarks = grades::compute_final_remarks(&grade, re_exam.as_deref(), RemarkContext::Entry);
    let credit_unit = get_opt_f64(params, "creditUnit").unwrap_or(subject_units);
    let instructor = get_opt_str(params, "instructor");
    let now = Utc::now().to_rfc3339();

    let existing_id: Option<String> = conn
        .query_row(
            "SELECT id FROM grade_records
             WHERE student_id = ? AND course_code = ? AND term_id = ?",
            (&student.id, &course_code, &term_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;

    let (record_id, action) = match existing_id {
        Some(id) => {
            conn.execute(
                "UPDATE grade_records
                 SET grade = ?, re_exam = ?, remarks = ?, credit_unit = ?, instructor = ?,
                     uploaded_by = ?, curriculum_subject_id = ?, offering_id = ?, updated_at = ?
                 WHERE id = ?",
                (
                    &grade,
                    &re_exam,
                    remarks,
                    credit_unit,
                    &instructor,
                    &session.user_id,
                    &subject_id,
                    &offering_id,
                    &now,
                    &id,
                ),
            )
            .map_err(HandlerErr::db)?;
            (id, "UPDATED")
        }
        None => {
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO grade_records(
                    id, student_id, course_code, term_id, curriculum_subject_id, offering_id,
                    grade, re_exam, remarks, credit_unit, instructor, uploaded_by, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    &id,
                    &student.id,
                    &course_code,
                    &term_id,
                    &subject_id,
                    &offering_id,
                    &grade,
                    &re_exam,
                    remarks,
                    credit_unit,
                    &instructor,
                    &session.user_id,
                    &now,
                ),
            )
            .map_err(HandlerErr::db)?;
            (id, "CREATED")
        }
    };

    conn.execute(
        "INSERT INTO grade_audit_log(
            id, actor, action, student_number, course_code, academic_year, semester, detail, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            &session.user_id,
            action,
            &student_number,
            &course_code,
            &academic_year,
            &semester,
            format!("grade={} reExam={}", grade, re_exam.as_deref().unwrap_or("-")),
            &now,
        ),
    )
    .map_err(HandlerErr::db)?;

    Ok(json!({
        "recordId": record_id,
        "action": action,
        "grade": grade,
        "remarks": remarks,
    }))
}

struct StoredRecord {
    course_code: String,
    academic_year: String,
    semester: String,
    grade: String,
    re_exam: Option<String>,
    remarks: String,
    credit_unit: f64,
    instructor: Option<String>,
    uploaded_by: Option<String>,
}

fn load_records(
    conn: &Connection,
    student_id: &str,
    academic_year: Option<&str>,
    semester: Option<&str>,
) -> Result<Vec<StoredRecord>, HandlerErr> {
    let mut sql = String::from(
        "SELECT g.course_code, t.academic_year, t.semester, g.grade, g.re_exam, g.remarks,
                g.credit_unit, g.instructor, g.uploaded_by
         FROM grade_records g
         JOIN academic_terms t ON t.id = g.term_id
         WHERE g.student_id = ?",
    );
    let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(student_id.to_string())];
    if let Some(ay) = academic_year {
        sql.push_str(" AND t.academic_year = ?");
        values.push(Box::new(ay.to_string()));
    }
    if let Some(sem) = semester {
        sql.push_str(" AND t.semester = ?");
        values.push(Box::new(sem.to_string()));
    }
    sql.push_str(" ORDER BY t.academic_year, t.semester, g.course_code");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    stmt.query_map(
        rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())),
        |r| {
            Ok(StoredRecord {
                course_code: r.get(0)?,
                academic_year: r.get(1)?,
                semester: r.get(2)?,
                grade: r.get(3)?,
                re_exam: r.get(4)?,
                remarks: r.get(5)?,
                credit_unit: r.get(6)?,
                instructor: r.get(7)?,
                uploaded_by: r.get(8)?,
            })
        },
    )
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db)
}

fn handle_list(
    conn: &Connection,
    session: &Session,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_number = clean_student_number(&get_required_str(params, "studentNumber")?);
    require_grade_access(session, &student_number)?;
    let academic_year = get_opt_str(params, "academicYear").map(|s| s.to_uppercase());
    let semester = get_opt_str(params, "semester").map(|s| s.to_uppercase());

    let student = resolve_student(conn, &student_number)?;
    let records = load_records(
        conn,
        &student.id,
        academic_year.as_deref(),
        semester.as_deref(),
    )?;

    let rows: Vec<serde_json::Value> = records
        .iter()
        .map(|rec| {
            json!({
                "courseCode": rec.course_code,
                "academicYear": rec.academic_year,
                "semester": rec.semester,
                "grade": rec.grade,
                "reExam": rec.re_exam,
                "remarks": rec.remarks,
                "creditUnit": rec.credit_unit,
                "instructor": rec.instructor,
                "uploadedBy": rec.uploaded_by,
                "effectiveGrade": grades::effective_grade(&rec.grade, rec.re_exam.as_deref()),
            })
        })
        .collect();

    Ok(json!({ "studentNumber": student_number, "records": rows }))
}

fn handle_summary(
    conn: &Connection,
    session: &Session,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_number = clean_student_number(&get_required_str(params, "studentNumber")?);
    require_grade_access(session, &student_number)?;
    let academic_year = get_required_str(params, "academicYear")?.to_uppercase();
    let semester = get_required_str(params, "semester")?.to_uppercase();

    let student = resolve_student(conn, &student_number)?;
    let records = load_records(conn, &student.id, Some(&academic_year), Some(&semester))?;

    let for_gpa: Vec<RecordForGpa<'_>> = records
        .iter()
        .map(|rec| RecordForGpa {
            course_code: &rec.course_code,
            grade: &rec.grade,
            re_exam: rec.re_exam.as_deref(),
            credit_unit: rec.credit_unit,
        })
        .collect();
    let summary = grades::summarize_for_gpa(&for_gpa);

    Ok(json!({
        "studentNumber": student_number,
        "academicYear": academic_year,
        "semester": semester,
        "recordCount": records.len(),
        "summary": summary,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handled = match req.method.as_str() {
        "grades.enter" => require_db(state).and_then(|conn| {
            let session = require_session(&req.params)?;
            require_can(&session, Action::EnterGrades)?;
            handle_enter(conn, &session, &req.params)
        }),
        "grades.list" => require_db(state).and_then(|conn| {
            let session = require_session(&req.params)?;
            handle_list(conn, &session, &req.params)
        }),
        "grades.summary" => require_db(state).and_then(|conn| {
            let session = require_session(&req.params)?;
            handle_summary(conn, &session, &req.params)
        }),
        _ => return None,
    };

    Some(match handled {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    })
}
