use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "registrar.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            student_number TEXT NOT NULL UNIQUE,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            course TEXT NOT NULL,
            major TEXT NOT NULL DEFAULT '',
            year_level INTEGER NOT NULL DEFAULT 1,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_status ON students(status)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_name ON students(last_name, first_name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS academic_terms(
            id TEXT PRIMARY KEY,
            academic_year TEXT NOT NULL,
            semester TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(academic_year, semester)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS curriculum_subjects(
            id TEXT PRIMARY KEY,
            course TEXT NOT NULL,
            major TEXT NOT NULL DEFAULT '',
            year_level INTEGER NOT NULL,
            semester TEXT NOT NULL,
            course_code TEXT NOT NULL,
            title TEXT NOT NULL,
            lecture_units REAL NOT NULL DEFAULT 0,
            lab_units REAL NOT NULL DEFAULT 0,
            prerequisite TEXT,
            UNIQUE(course, major, course_code)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_curriculum_course_major ON curriculum_subjects(course, major)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_curriculum_code ON curriculum_subjects(course_code)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subject_offerings(
            id TEXT PRIMARY KEY,
            curriculum_subject_id TEXT NOT NULL,
            term_id TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            UNIQUE(curriculum_subject_id, term_id),
            FOREIGN KEY(curriculum_subject_id) REFERENCES curriculum_subjects(id),
            FOREIGN KEY(term_id) REFERENCES academic_terms(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_offerings_term ON subject_offerings(term_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_records(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            course_code TEXT NOT NULL,
            term_id TEXT NOT NULL,
            curriculum_subject_id TEXT,
            offering_id TEXT,
            grade TEXT NOT NULL,
            re_exam TEXT,
            remarks TEXT NOT NULL,
            credit_unit REAL NOT NULL DEFAULT 0,
            instructor TEXT,
            uploaded_by TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            UNIQUE(student_id, course_code, term_id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(term_id) REFERENCES academic_terms(id),
            FOREIGN KEY(curriculum_subject_id) REFERENCES curriculum_subjects(id),
            FOREIGN KEY(offering_id) REFERENCES subject_offerings(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_records_student ON grade_records(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_records_term ON grade_records(term_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_audit_log(
            id TEXT PRIMARY KEY,
            actor TEXT NOT NULL,
            action TEXT NOT NULL,
            student_number TEXT NOT NULL,
            course_code TEXT NOT NULL DEFAULT '',
            academic_year TEXT NOT NULL DEFAULT '',
            semester TEXT NOT NULL DEFAULT '',
            detail TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_audit_student ON grade_audit_log(student_number)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS access_schedules(
            id TEXT PRIMARY KEY,
            course TEXT NOT NULL,
            date TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            UNIQUE(course, date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_access_schedules_course ON access_schedules(course)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS announcements(
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL DEFAULT 'announcement',
            title TEXT NOT NULL,
            body TEXT NOT NULL,
            event_date TEXT,
            posted_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_announcements_kind ON announcements(kind)",
        [],
    )?;

    // Workspaces created before re-exam support lack the column. Add if needed.
    ensure_grade_records_re_exam(&conn)?;
    ensure_students_major(&conn)?;

    Ok(conn)
}

fn ensure_grade_records_re_exam(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "grade_records", "re_exam")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE grade_records ADD COLUMN re_exam TEXT", [])?;
    Ok(())
}

fn ensure_students_major(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "major")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE students ADD COLUMN major TEXT NOT NULL DEFAULT ''",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
