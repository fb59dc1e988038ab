use crate::ipc::error::{db_err, err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::{QuestionType, Visibility};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct QuestionInput {
    text: String,
    qtype: QuestionType,
    required: bool,
    choices: Vec<String>,
}

/// Parse and validate the question tree of a create/update payload. Errors are
/// full wire responses carrying the offending question/choice index.
fn parse_question_tree(req: &Request) -> Result<Vec<QuestionInput>, serde_json::Value> {
    let Some(raw) = req.params.get("questions").and_then(|v| v.as_array()) else {
        return Err(err(&req.id, "bad_params", "missing questions", None));
    };
    if raw.is_empty() {
        return Err(err(
            &req.id,
            "validation_failed",
            "survey must have at least one question",
            None,
        ));
    }

    let mut out = Vec::with_capacity(raw.len());
    for (qi, q) in raw.iter().enumerate() {
        let text = q
            .get("text")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(err(
                &req.id,
                "validation_failed",
                "question text must not be empty",
                Some(json!({ "questionIndex": qi })),
            ));
        }
        let qtype = match q.get("type").and_then(|v| v.as_str()).and_then(QuestionType::parse) {
            Some(t) => t,
            None => {
                return Err(err(
                    &req.id,
                    "validation_failed",
                    "question type must be TEXT, SINGLE_CHOICE, MULTIPLE_CHOICE or RATING_SCALE",
                    Some(json!({ "questionIndex": qi })),
                ))
            }
        };
        let required = q.get("required").and_then(|v| v.as_bool()).unwrap_or(false);

        // Choices only belong to selectable types; anything supplied for the
        // other types is dropped rather than rejected.
        let mut choices = Vec::new();
        if qtype.is_selectable() {
            let raw_choices = q
                .get("choices")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            if raw_choices.is_empty() {
                return Err(err(
                    &req.id,
                    "validation_failed",
                    "selectable question must have at least one choice",
                    Some(json!({ "questionIndex": qi })),
                ));
            }
            for (ci, c) in raw_choices.iter().enumerate() {
                let choice_text = c
                    .get("text")
                    .and_then(|v| v.as_str())
                    .map(|s| s.trim().to_string())
                    .unwrap_or_default();
                if choice_text.is_empty() {
                    return Err(err(
                        &req.id,
                        "validation_failed",
                        "choice text must not be empty",
                        Some(json!({ "questionIndex": qi, "choiceIndex": ci })),
                    ));
                }
                choices.push(choice_text);
            }
        }

        out.push(QuestionInput {
            text,
            qtype,
            required,
            choices,
        });
    }
    Ok(out)
}

fn parse_scalars(req: &Request) -> Result<(String, String, Visibility), serde_json::Value> {
    let title = req
        .params
        .get("title")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    if title.is_empty() {
        return Err(err(
            &req.id,
            "validation_failed",
            "title must not be empty",
            None,
        ));
    }
    let description = req
        .params
        .get("description")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    if description.is_empty() {
        return Err(err(
            &req.id,
            "validation_failed",
            "description must not be empty",
            None,
        ));
    }
    let visibility = match req
        .params
        .get("visibility")
        .and_then(|v| v.as_str())
        .and_then(Visibility::parse)
    {
        Some(v) => v,
        None => {
            return Err(err(
                &req.id,
                "bad_params",
                "visibility must be public, students_only or private",
                None,
            ))
        }
    };
    Ok((title, description, visibility))
}

/// Insert the question/choice tree under an already-inserted survey row.
/// Parent-first ordering keeps foreign keys satisfied; the first failing step
/// is reported with its index and the caller rolls back.
fn insert_question_tree(
    tx: &rusqlite::Transaction,
    req_id: &str,
    survey_id: &str,
    questions: &[QuestionInput],
) -> Result<(), serde_json::Value> {
    for (qi, q) in questions.iter().enumerate() {
        let question_id = Uuid::new_v4().to_string();
        if let Err(e) = tx.execute(
            "INSERT INTO questions(id, survey_id, text, qtype, required, sort_order)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                &question_id,
                survey_id,
                &q.text,
                q.qtype.as_str(),
                q.required as i64,
                qi as i64,
            ),
        ) {
            return Err(db_err(
                req_id,
                "db_insert_failed",
                &e,
                Some(json!({ "table": "questions", "questionIndex": qi })),
            ));
        }
        for (ci, choice_text) in q.choices.iter().enumerate() {
            if let Err(e) = tx.execute(
                "INSERT INTO choices(id, question_id, text, sort_order) VALUES(?, ?, ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    &question_id,
                    choice_text,
                    ci as i64,
                ),
            ) {
                return Err(db_err(
                    req_id,
                    "db_insert_failed",
                    &e,
                    Some(json!({ "table": "choices", "questionIndex": qi, "choiceIndex": ci })),
                ));
            }
        }
    }
    Ok(())
}

/// Read a survey aggregate back as the wire tree, questions and choices in
/// stored order. `Ok(None)` means no such survey.
pub fn survey_tree(
    conn: &Connection,
    survey_id: &str,
) -> rusqlite::Result<Option<serde_json::Value>> {
    let header = conn
        .query_row(
            "SELECT owner_id, owner_role, title, description, visibility, created_at
             FROM surveys WHERE id = ?",
            [survey_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, String>(5)?,
                ))
            },
        )
        .optional()?;
    let Some((owner_id, owner_role, title, description, visibility, created_at)) = header else {
        return Ok(None);
    };

    let mut q_stmt = conn.prepare(
        "SELECT id, text, qtype, required FROM questions WHERE survey_id = ? ORDER BY sort_order",
    )?;
    let mut c_stmt = conn
        .prepare("SELECT id, text FROM choices WHERE question_id = ? ORDER BY sort_order")?;

    let question_rows = q_stmt
        .query_map([survey_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut questions = Vec::with_capacity(question_rows.len());
    for (qid, text, qtype, required) in question_rows {
        let choices = c_stmt
            .query_map([&qid], |row| {
                let id: String = row.get(0)?;
                let text: String = row.get(1)?;
                Ok(json!({ "id": id, "text": text }))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        questions.push(json!({
            "id": qid,
            "text": text,
            "type": qtype,
            "required": required != 0,
            "choices": choices
        }));
    }

    Ok(Some(json!({
        "id": survey_id,
        "ownerId": owner_id,
        "ownerRole": owner_role,
        "title": title,
        "description": description,
        "visibility": visibility,
        "createdAt": created_at,
        "questions": questions
    })))
}

fn survey_owner(conn: &Connection, survey_id: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT owner_id FROM surveys WHERE id = ?",
        [survey_id],
        |r| r.get(0),
    )
    .optional()
}

fn handle_surveys_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(owner) = req.params.get("owner") else {
        return err(&req.id, "bad_params", "missing owner", None);
    };
    let owner_id = match owner.get("id").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing owner.id", None),
    };
    let owner_role = match owner.get("role").and_then(|v| v.as_str()) {
        Some("teacher") => "teacher",
        Some("student") => "student",
        _ => return err(&req.id, "bad_params", "owner.role must be teacher or student", None),
    };

    let (title, description, visibility) = match parse_scalars(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let questions = match parse_question_tree(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let survey_id = Uuid::new_v4().to_string();
    let created_at = chrono::Utc::now().to_rfc3339();

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return db_err(&req.id, "db_tx_failed", &e, None),
    };

    if let Err(e) = tx.execute(
        "INSERT INTO surveys(id, owner_id, owner_role, title, description, visibility, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &survey_id,
            &owner_id,
            owner_role,
            &title,
            &description,
            visibility.as_str(),
            &created_at,
        ),
    ) {
        let _ = tx.rollback();
        return db_err(
            &req.id,
            "db_insert_failed",
            &e,
            Some(json!({ "table": "surveys" })),
        );
    }

    if let Err(resp) = insert_question_tree(&tx, &req.id, &survey_id, &questions) {
        let _ = tx.rollback();
        return resp;
    }

    if let Err(e) = tx.commit() {
        return db_err(&req.id, "db_commit_failed", &e, None);
    }

    match survey_tree(conn, &survey_id) {
        Ok(Some(tree)) => ok(&req.id, json!({ "survey": tree })),
        Ok(None) => err(&req.id, "not_found", "survey vanished after create", None),
        Err(e) => db_err(&req.id, "db_query_failed", &e, None),
    }
}

fn handle_surveys_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let survey_id = match req.params.get("surveyId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing surveyId", None),
    };
    let owner_id = match req.params.get("ownerId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing ownerId", None),
    };

    let (title, description, visibility) = match parse_scalars(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let questions = match parse_question_tree(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    // Edits arrive as a full replacement payload, and the update only applies
    // to a survey this owner actually has.
    match survey_owner(conn, &survey_id) {
        Ok(Some(actual)) if actual == owner_id => {}
        Ok(_) => return err(&req.id, "not_found", "survey not found", None),
        Err(e) => return db_err(&req.id, "db_query_failed", &e, None),
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return db_err(&req.id, "db_tx_failed", &e, None),
    };

    if let Err(e) = tx.execute(
        "UPDATE surveys SET title = ?, description = ?, visibility = ? WHERE id = ?",
        (&title, &description, visibility.as_str(), &survey_id),
    ) {
        let _ = tx.rollback();
        return db_err(
            &req.id,
            "db_update_failed",
            &e,
            Some(json!({ "table": "surveys" })),
        );
    }

    // Replace semantics: drop the old tree child-first, then rewrite. Answers
    // reference the old questions and cannot outlive them.
    if let Err(e) = tx.execute(
        "DELETE FROM answers
         WHERE question_id IN (SELECT id FROM questions WHERE survey_id = ?)",
        [&survey_id],
    ) {
        let _ = tx.rollback();
        return db_err(
            &req.id,
            "db_delete_failed",
            &e,
            Some(json!({ "table": "answers" })),
        );
    }
    if let Err(e) = tx.execute(
        "DELETE FROM choices
         WHERE question_id IN (SELECT id FROM questions WHERE survey_id = ?)",
        [&survey_id],
    ) {
        let _ = tx.rollback();
        return db_err(
            &req.id,
            "db_delete_failed",
            &e,
            Some(json!({ "table": "choices" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM questions WHERE survey_id = ?", [&survey_id]) {
        let _ = tx.rollback();
        return db_err(
            &req.id,
            "db_delete_failed",
            &e,
            Some(json!({ "table": "questions" })),
        );
    }

    if let Err(resp) = insert_question_tree(&tx, &req.id, &survey_id, &questions) {
        let _ = tx.rollback();
        return resp;
    }

    if let Err(e) = tx.commit() {
        return db_err(&req.id, "db_commit_failed", &e, None);
    }

    match survey_tree(conn, &survey_id) {
        Ok(Some(tree)) => ok(&req.id, json!({ "survey": tree })),
        Ok(None) => err(&req.id, "not_found", "survey not found", None),
        Err(e) => db_err(&req.id, "db_query_failed", &e, None),
    }
}

fn handle_surveys_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let survey_id = match req.params.get("surveyId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing surveyId", None),
    };
    let owner_id = match req.params.get("ownerId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing ownerId", None),
    };

    match survey_owner(conn, &survey_id) {
        Ok(Some(actual)) if actual == owner_id => {}
        Ok(Some(_)) => return err(&req.id, "forbidden", "survey is owned by someone else", None),
        Ok(None) => return err(&req.id, "not_found", "survey not found", None),
        Err(e) => return db_err(&req.id, "db_query_failed", &e, None),
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return db_err(&req.id, "db_tx_failed", &e, None),
    };

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    if let Err(e) = tx.execute(
        "DELETE FROM answers
         WHERE response_id IN (SELECT id FROM responses WHERE survey_id = ?)",
        [&survey_id],
    ) {
        let _ = tx.rollback();
        return db_err(
            &req.id,
            "db_delete_failed",
            &e,
            Some(json!({ "table": "answers" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM responses WHERE survey_id = ?", [&survey_id]) {
        let _ = tx.rollback();
        return db_err(
            &req.id,
            "db_delete_failed",
            &e,
            Some(json!({ "table": "responses" })),
        );
    }
    if let Err(e) = tx.execute(
        "DELETE FROM choices
         WHERE question_id IN (SELECT id FROM questions WHERE survey_id = ?)",
        [&survey_id],
    ) {
        let _ = tx.rollback();
        return db_err(
            &req.id,
            "db_delete_failed",
            &e,
            Some(json!({ "table": "choices" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM questions WHERE survey_id = ?", [&survey_id]) {
        let _ = tx.rollback();
        return db_err(
            &req.id,
            "db_delete_failed",
            &e,
            Some(json!({ "table": "questions" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM surveys WHERE id = ?", [&survey_id]) {
        let _ = tx.rollback();
        return db_err(
            &req.id,
            "db_delete_failed",
            &e,
            Some(json!({ "table": "surveys" })),
        );
    }

    if let Err(e) = tx.commit() {
        return db_err(&req.id, "db_commit_failed", &e, None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_surveys_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let survey_id = match req.params.get("surveyId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing surveyId", None),
    };

    match survey_tree(conn, &survey_id) {
        Ok(Some(tree)) => ok(&req.id, json!({ "survey": tree })),
        Ok(None) => err(&req.id, "not_found", "survey not found", None),
        Err(e) => db_err(&req.id, "db_query_failed", &e, None),
    }
}

fn handle_surveys_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "surveys": [] }));
    };

    let owner_filter = req
        .params
        .get("ownerId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    // Correlated subqueries avoid double-counting from joins.
    let sql = "SELECT
                 s.id, s.owner_id, s.title, s.description, s.visibility, s.created_at,
                 (SELECT COUNT(*) FROM questions q WHERE q.survey_id = s.id) AS question_count,
                 (SELECT COUNT(*) FROM responses r WHERE r.survey_id = s.id) AS response_count
               FROM surveys s
               WHERE (?1 IS NULL OR s.owner_id = ?1)
               ORDER BY s.created_at DESC, s.id";
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return db_err(&req.id, "db_query_failed", &e, None),
    };
    let rows = stmt
        .query_map([&owner_filter], |row| {
            let id: String = row.get(0)?;
            let owner_id: String = row.get(1)?;
            let title: String = row.get(2)?;
            let description: String = row.get(3)?;
            let visibility: String = row.get(4)?;
            let created_at: String = row.get(5)?;
            let question_count: i64 = row.get(6)?;
            let response_count: i64 = row.get(7)?;
            Ok(json!({
                "id": id,
                "ownerId": owner_id,
                "title": title,
                "description": description,
                "visibility": visibility,
                "createdAt": created_at,
                "questionCount": question_count,
                "responseCount": response_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(surveys) => ok(&req.id, json!({ "surveys": surveys })),
        Err(e) => db_err(&req.id, "db_query_failed", &e, None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "surveys.create" => Some(handle_surveys_create(state, req)),
        "surveys.update" => Some(handle_surveys_update(state, req)),
        "surveys.delete" => Some(handle_surveys_delete(state, req)),
        "surveys.get" => Some(handle_surveys_get(state, req)),
        "surveys.list" => Some(handle_surveys_list(state, req)),
        _ => None,
    }
}
