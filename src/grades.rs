use serde::Serialize;

/// Non-numeric grade codes accepted by the registrar.
pub const NON_NUMERIC_CODES: [&str; 4] = ["DRP", "INC", "S", "US"];

/// Grade hierarchy, best first. Tokens outside this list never win a
/// better-grade comparison.
pub const GRADE_HIERARCHY: [&str; 13] = [
    "1.00", "1.25", "1.50", "1.75", "2.00", "2.25", "2.50", "2.75", "3.00", "4.00", "5.00", "INC",
    "DRP",
];

/// Course code graded S/US only; excluded from standard GPA accumulation.
pub const SATISFACTORY_ONLY_COURSE: &str = "NSTP";

pub const REMARK_PASSED: &str = "PASSED";
pub const REMARK_CONDITIONAL: &str = "CONDITIONAL FAILURE";
pub const REMARK_FAILED: &str = "FAILED";
pub const REMARK_DROPPED: &str = "DROPPED";
pub const REMARK_LACK_OF_REQ: &str = "LACK OF REQ.";
pub const REMARK_SATISFACTORY: &str = "SATISFACTORY";
pub const REMARK_UNSATISFACTORY: &str = "UNSATISFACTORY";

/// Where a remark is being derived. The legacy system labelled an `S` grade
/// "PASSED" on the upload path and "SATISFACTORY" on the manual-entry path;
/// both behaviors are kept behind this switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemarkContext {
    Upload,
    Entry,
}

/// Canonicalize a raw grade token.
///
/// Known letter codes pass through as themselves; numeric tokens are
/// reformatted to two decimals. Anything else is returned uppercase-trimmed
/// unchanged: the legacy importer accepted such strings, and they stay inert
/// downstream (empty remark, never "better" than a real grade).
pub fn normalize_grade(raw: &str) -> String {
    let token = raw.trim().to_uppercase();
    if token.is_empty() {
        return String::new();
    }
    if NON_NUMERIC_CODES.contains(&token.as_str()) {
        return token;
    }
    match token.parse::<f64>() {
        Ok(v) => format!("{:.2}", v),
        Err(_) => token,
    }
}

/// Derive the remark for a single canonical token.
pub fn compute_remarks(basis: &str, ctx: RemarkContext) -> &'static str {
    match basis {
        "INC" => REMARK_LACK_OF_REQ,
        "DRP" => REMARK_DROPPED,
        "US" => REMARK_UNSATISFACTORY,
        "S" => match ctx {
            RemarkContext::Upload => REMARK_PASSED,
            RemarkContext::Entry => REMARK_SATISFACTORY,
        },
        _ => match basis.parse::<f64>() {
            Ok(v) if (1.0..=3.0).contains(&v) => REMARK_PASSED,
            Ok(v) if v == 4.0 => REMARK_CONDITIONAL,
            Ok(v) if v == 5.0 => REMARK_FAILED,
            _ => "",
        },
    }
}

/// Derive the final remark for a record. The basis is the re-exam whenever one
/// is present and non-empty, regardless of the original grade.
pub fn compute_final_remarks(grade: &str, re_exam: Option<&str>, ctx: RemarkContext) -> &'static str {
    match re_exam {
        Some(r) if !r.trim().is_empty() => compute_remarks(r, ctx),
        _ => compute_remarks(grade, ctx),
    }
}

fn numeric(token: &str) -> Option<f64> {
    token.parse::<f64>().ok()
}

fn is_excluded_code(token: &str) -> bool {
    token == "INC" || token == "DRP"
}

/// The nullable numeric grade used for GPA math. `None` excludes the record.
///
/// An INC/DRP with no (or an equally non-numeric) re-exam carries no value.
/// When both grade and re-exam are numeric the lower of the two wins; lower
/// is academically better here.
pub fn effective_grade(grade: &str, re_exam: Option<&str>) -> Option<f64> {
    let re = re_exam.map(str::trim).filter(|r| !r.is_empty());
    if is_excluded_code(grade) && re.map(is_excluded_code).unwrap_or(true) {
        return None;
    }
    match (numeric(grade), re.and_then(numeric)) {
        (Some(g), Some(r)) => Some(g.min(r)),
        (Some(g), None) => Some(g),
        (None, Some(r)) => Some(r),
        (None, None) => None,
    }
}

/// Whether a record's units count toward earned-credit totals. 4.00, 5.00,
/// DRP and INC grades never do, re-exam or not.
pub fn counts_toward_earned(grade: &str) -> bool {
    !matches!(grade, "4.00" | "5.00" | "DRP" | "INC")
}

/// Rank in the grade hierarchy; lower rank is better. Unknown tokens have no
/// rank and never compare as better.
pub fn grade_rank(token: &str) -> Option<usize> {
    GRADE_HIERARCHY.iter().position(|g| *g == token)
}

/// "Better grade wins" comparison for upload reconciliation: true when `a`
/// is strictly better than `b`.
pub fn is_better_grade(a: &str, b: &str) -> bool {
    match (grade_rank(a), grade_rank(b)) {
        (Some(ra), Some(rb)) => ra < rb,
        (Some(_), None) => true,
        _ => false,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RecordForGpa<'a> {
    pub course_code: &'a str,
    pub grade: &'a str,
    pub re_exam: Option<&'a str>,
    pub credit_unit: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GpaSummary {
    pub gpa: Option<f64>,
    pub graded_units: f64,
    pub enrolled_units: f64,
    pub earned_units: f64,
}

/// Term GPA and unit totals.
///
/// GPA = sum(effective * units) / sum(units) over records with an effective
/// grade. The satisfactory-only course is special-cased: it never enters the
/// weighted sum, but an exact `S` on it adds its units to the denominator
/// (and to earned units). That matches the registrar's long-standing manual
/// computation.
pub fn summarize_for_gpa(records: &[RecordForGpa<'_>]) -> GpaSummary {
    let mut weighted_sum = 0.0_f64;
    let mut graded_units = 0.0_f64;
    let mut enrolled_units = 0.0_f64;
    let mut earned_units = 0.0_f64;

    for rec in records {
        enrolled_units += rec.credit_unit;

        if rec.course_code == SATISFACTORY_ONLY_COURSE {
            if rec.grade == "S" {
                graded_units += rec.credit_unit;
                earned_units += rec.credit_unit;
            }
            continue;
        }

        if let Some(eff) = effective_grade(rec.grade, rec.re_exam) {
            weighted_sum += eff * rec.credit_unit;
            graded_units += rec.credit_unit;
            if counts_toward_earned(rec.grade) {
                earned_units += rec.credit_unit;
            }
        }
    }

    let gpa = if graded_units > 0.0 {
        Some(weighted_sum / graded_units)
    } else {
        None
    };
    GpaSummary {
        gpa,
        graded_units,
        enrolled_units,
        earned_units,
    }
}

/// Academic-year tokens look like `AY_2024_2025` with consecutive years.
pub fn is_valid_academic_year(token: &str) -> bool {
    let mut parts = token.split('_');
    if parts.next() != Some("AY") {
        return false;
    }
    let (Some(start), Some(end), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    if start.len() != 4 || end.len() != 4 {
        return false;
    }
    match (start.parse::<i32>(), end.parse::<i32>()) {
        (Ok(s), Ok(e)) => e == s + 1,
        _ => false,
    }
}

pub const SEMESTERS: [&str; 3] = ["FIRST", "SECOND", "MIDYEAR"];

pub fn is_valid_semester(token: &str) -> bool {
    SEMESTERS.contains(&token)
}
