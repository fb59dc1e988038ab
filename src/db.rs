use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "surveys.sqlite3";

/// Bounded wait on a locked database before SQLITE_BUSY is surfaced;
/// keeps contended writers failing fast instead of queueing forever.
const BUSY_TIMEOUT_MS: u64 = 5_000;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS))?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS surveys(
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            owner_role TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            visibility TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_surveys_owner ON surveys(owner_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS questions(
            id TEXT PRIMARY KEY,
            survey_id TEXT NOT NULL,
            text TEXT NOT NULL,
            qtype TEXT NOT NULL,
            required INTEGER NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(survey_id) REFERENCES surveys(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_questions_survey ON questions(survey_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS choices(
            id TEXT PRIMARY KEY,
            question_id TEXT NOT NULL,
            text TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(question_id) REFERENCES questions(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_choices_question ON choices(question_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS responses(
            id TEXT PRIMARY KEY,
            survey_id TEXT NOT NULL,
            respondent_id TEXT NOT NULL,
            submitted_at TEXT NOT NULL,
            source_address TEXT,
            FOREIGN KEY(survey_id) REFERENCES surveys(id),
            UNIQUE(survey_id, respondent_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_responses_survey ON responses(survey_id)",
        [],
    )?;

    // Early workspaces predate the source_address column. Add it if needed.
    ensure_responses_source_address(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS answers(
            id TEXT PRIMARY KEY,
            response_id TEXT NOT NULL,
            question_id TEXT NOT NULL,
            value TEXT NOT NULL,
            FOREIGN KEY(response_id) REFERENCES responses(id),
            FOREIGN KEY(question_id) REFERENCES questions(id),
            UNIQUE(response_id, question_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_answers_response ON answers(response_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_answers_question ON answers(question_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_student_links(
            teacher_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY(teacher_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_links_student ON teacher_student_links(student_id)",
        [],
    )?;

    Ok(conn)
}

fn ensure_responses_source_address(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "responses", "source_address")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE responses ADD COLUMN source_address TEXT", [])?;
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
