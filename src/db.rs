use rusqlite::{Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const DB_FILE_NAME: &str = "gradebook.sqlite3";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub fn db_path(workspace: &Path) -> PathBuf {
    workspace.join(DB_FILE_NAME)
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let conn = Connection::open(db_path(workspace))?;
    // Several sidecars may share one workspace file.
    conn.busy_timeout(BUSY_TIMEOUT)?;
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |r| r.get(0))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classrooms(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            year TEXT,
            section TEXT,
            shift TEXT,
            term TEXT,
            pending INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    ensure_classrooms_pending(conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            classroom_id TEXT NOT NULL,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_classroom ON students(classroom_id, sort_order)",
        [],
    )?;

    // Absence of rows for a student means every subject is allowed.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_subject_allow(
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            PRIMARY KEY(student_id, subject_id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subject_assignments(
            id TEXT PRIMARY KEY,
            classroom_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            teacher TEXT,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            UNIQUE(classroom_id, subject_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS activities(
            id TEXT PRIMARY KEY,
            assignment_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            date TEXT,
            weight REAL NOT NULL,
            moment INTEGER NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(assignment_id) REFERENCES subject_assignments(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_activities_assignment_moment
         ON activities(assignment_id, moment)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_entries(
            id TEXT PRIMARY KEY,
            activity_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            mode TEXT NOT NULL,
            numeric_value REAL,
            letter_value TEXT,
            observation TEXT,
            evidence TEXT,
            recorded_seq INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL DEFAULT '',
            FOREIGN KEY(activity_id) REFERENCES activities(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    ensure_grade_entries_unique(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_entries_student ON grade_entries(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS bonus_entries(
            assignment_id TEXT NOT NULL,
            slot TEXT NOT NULL,
            student_id TEXT NOT NULL,
            points REAL NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY(assignment_id, slot, student_id),
            FOREIGN KEY(assignment_id) REFERENCES subject_assignments(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS moment_locks(
            assignment_id TEXT NOT NULL,
            moment INTEGER NOT NULL,
            locked INTEGER NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY(assignment_id, moment),
            FOREIGN KEY(assignment_id) REFERENCES subject_assignments(id)
        )",
        [],
    )?;

    Ok(())
}

fn ensure_classrooms_pending(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "classrooms", "pending")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE classrooms ADD COLUMN pending INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    Ok(())
}

fn ensure_grade_entries_unique(conn: &Connection) -> anyhow::Result<()> {
    if index_exists(conn, "uq_grade_entries_activity_student")? {
        return Ok(());
    }
    // Workspaces written before the unique index may hold racing duplicates.
    let removed = crate::grades::reconcile_duplicate_grades(conn)?;
    if removed > 0 {
        info!(removed, "reconciled duplicate grade entries during migration");
    }
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS uq_grade_entries_activity_student
         ON grade_entries(activity_id, student_id)",
        [],
    )?;
    Ok(())
}

fn index_exists(conn: &Connection, name: &str) -> anyhow::Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = ?",
            [name],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
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

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

#[cfg(test)]
pub fn open_memory() -> Connection {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    init_schema(&conn).expect("init schema");
    conn
}
