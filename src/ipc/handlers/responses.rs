use crate::ipc::error::{db_err, err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::{AnswerValue, QuestionType};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

struct SurveyMeta {
    owner_id: String,
    owner_role: String,
}

fn survey_meta(conn: &Connection, survey_id: &str) -> rusqlite::Result<Option<SurveyMeta>> {
    conn.query_row(
        "SELECT owner_id, owner_role FROM surveys WHERE id = ?",
        [survey_id],
        |r| {
            Ok(SurveyMeta {
                owner_id: r.get(0)?,
                owner_role: r.get(1)?,
            })
        },
    )
    .optional()
}

fn existing_submission(
    conn: &Connection,
    survey_id: &str,
    respondent_id: &str,
) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT submitted_at FROM responses WHERE survey_id = ? AND respondent_id = ?",
        (survey_id, respondent_id),
        |r| r.get(0),
    )
    .optional()
}

/// Best-effort: record the teacher-student relationship implied by a student
/// answering a teacher's survey. Failures are logged and swallowed; they never
/// fail the submission that triggered them.
fn link_teacher_student(conn: &Connection, teacher_id: &str, student_id: &str) {
    let now = chrono::Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT OR IGNORE INTO teacher_student_links(teacher_id, student_id, created_at)
         VALUES(?, ?, ?)",
        (teacher_id, student_id, &now),
    ) {
        eprintln!(
            "surveyd: teacher-student link for ({}, {}) failed: {}",
            teacher_id, student_id, e
        );
    }
}

fn handle_responses_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let survey_id = match req.params.get("surveyId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing surveyId", None),
    };
    let Some(respondent) = req.params.get("respondent") else {
        return err(&req.id, "bad_params", "missing respondent", None);
    };
    let respondent_id = match respondent.get("id").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing respondent.id", None),
    };
    let respondent_role = respondent
        .get("role")
        .and_then(|v| v.as_str())
        .unwrap_or("anonymous")
        .to_string();
    let source_address = req
        .params
        .get("sourceAddress")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let Some(raw_answers) = req.params.get("answers").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing answers", None);
    };
    if raw_answers.is_empty() {
        return err(
            &req.id,
            "validation_failed",
            "a submission must answer at least one question",
            None,
        );
    }

    let meta = match survey_meta(conn, &survey_id) {
        Ok(Some(m)) => m,
        Ok(None) => return err(&req.id, "not_found", "survey not found", None),
        Err(e) => return db_err(&req.id, "db_query_failed", &e, None),
    };

    // One response per (survey, respondent); the original submission time is
    // part of the conflict payload so clients can show when it happened.
    match existing_submission(conn, &survey_id, &respondent_id) {
        Ok(Some(submitted_at)) => {
            return err(
                &req.id,
                "conflict",
                "respondent already submitted a response for this survey",
                Some(json!({ "submittedAt": submitted_at })),
            )
        }
        Ok(None) => {}
        Err(e) => return db_err(&req.id, "db_query_failed", &e, None),
    }

    // Load the survey's questions so every answer can be checked against the
    // question it claims to answer.
    let mut q_stmt = match conn
        .prepare("SELECT id, qtype, required FROM questions WHERE survey_id = ?")
    {
        Ok(s) => s,
        Err(e) => return db_err(&req.id, "db_query_failed", &e, None),
    };
    let question_rows = q_stmt
        .query_map([&survey_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let question_rows = match question_rows {
        Ok(v) => v,
        Err(e) => return db_err(&req.id, "db_query_failed", &e, None),
    };
    let mut questions: HashMap<String, (QuestionType, bool)> = HashMap::new();
    for (qid, qtype, required) in question_rows {
        let Some(qtype) = QuestionType::parse(&qtype) else {
            return err(
                &req.id,
                "db_query_failed",
                format!("stored question {} has unknown type {}", qid, qtype),
                None,
            );
        };
        questions.insert(qid, (qtype, required != 0));
    }

    let mut validated: Vec<(String, AnswerValue)> = Vec::with_capacity(raw_answers.len());
    let mut answered: HashSet<String> = HashSet::new();
    for (ai, a) in raw_answers.iter().enumerate() {
        let question_id = match a.get("questionId").and_then(|v| v.as_str()) {
            Some(v) => v.to_string(),
            None => {
                return err(
                    &req.id,
                    "validation_failed",
                    "answer is missing questionId",
                    Some(json!({ "answerIndex": ai })),
                )
            }
        };
        let Some(&(qtype, _)) = questions.get(&question_id) else {
            return err(
                &req.id,
                "validation_failed",
                "answer references a question outside this survey",
                Some(json!({ "answerIndex": ai, "questionId": question_id })),
            );
        };
        if !answered.insert(question_id.clone()) {
            return err(
                &req.id,
                "validation_failed",
                "duplicate answer for the same question",
                Some(json!({ "answerIndex": ai, "questionId": question_id })),
            );
        }
        let raw_value = a.get("value").unwrap_or(&serde_json::Value::Null);
        let value = match AnswerValue::from_raw(qtype, raw_value) {
            Ok(v) => v,
            Err(reason) => {
                return err(
                    &req.id,
                    "validation_failed",
                    reason,
                    Some(json!({ "answerIndex": ai, "questionId": question_id })),
                )
            }
        };
        validated.push((question_id, value));
    }

    for (qid, &(_, required)) in &questions {
        if required && !answered.contains(qid) {
            return err(
                &req.id,
                "validation_failed",
                "required question is not answered",
                Some(json!({ "questionId": qid })),
            );
        }
    }

    let response_id = Uuid::new_v4().to_string();
    let submitted_at = chrono::Utc::now().to_rfc3339();

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return db_err(&req.id, "db_tx_failed", &e, None),
    };

    if let Err(e) = tx.execute(
        "INSERT INTO responses(id, survey_id, respondent_id, submitted_at, source_address)
         VALUES(?, ?, ?, ?, ?)",
        (
            &response_id,
            &survey_id,
            &respondent_id,
            &submitted_at,
            &source_address,
        ),
    ) {
        let _ = tx.rollback();
        // The UNIQUE(survey_id, respondent_id) backstop catches a submission
        // that raced past the probe above.
        if let rusqlite::Error::SqliteFailure(f, _) = &e {
            if f.code == rusqlite::ErrorCode::ConstraintViolation {
                let original = existing_submission(conn, &survey_id, &respondent_id)
                    .ok()
                    .flatten();
                return err(
                    &req.id,
                    "conflict",
                    "respondent already submitted a response for this survey",
                    original.map(|s| json!({ "submittedAt": s })),
                );
            }
        }
        return db_err(
            &req.id,
            "db_insert_failed",
            &e,
            Some(json!({ "table": "responses" })),
        );
    }

    for (ai, (question_id, value)) in validated.iter().enumerate() {
        let stored = match serde_json::to_string(value) {
            Ok(s) => s,
            Err(e) => {
                let _ = tx.rollback();
                return err(
                    &req.id,
                    "db_insert_failed",
                    format!("failed to serialize answer value: {}", e),
                    Some(json!({ "answerIndex": ai })),
                );
            }
        };
        if let Err(e) = tx.execute(
            "INSERT INTO answers(id, response_id, question_id, value) VALUES(?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                &response_id,
                question_id,
                &stored,
            ),
        ) {
            let _ = tx.rollback();
            return db_err(
                &req.id,
                "db_insert_failed",
                &e,
                Some(json!({ "table": "answers", "answerIndex": ai })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return db_err(&req.id, "db_commit_failed", &e, None);
    }

    if respondent_role == "student" && meta.owner_role == "teacher" {
        link_teacher_student(conn, &meta.owner_id, &respondent_id);
    }

    let answers_json: Vec<serde_json::Value> = validated
        .iter()
        .map(|(qid, value)| json!({ "questionId": qid, "value": value.to_wire() }))
        .collect();
    ok(
        &req.id,
        json!({
            "response": {
                "id": response_id,
                "surveyId": survey_id,
                "respondentId": respondent_id,
                "submittedAt": submitted_at,
                "answers": answers_json
            }
        }),
    )
}

fn handle_responses_check(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let survey_id = match req.params.get("surveyId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing surveyId", None),
    };
    let respondent_id = match req.params.get("respondentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing respondentId", None),
    };

    match existing_submission(conn, &survey_id, &respondent_id) {
        Ok(found) => ok(&req.id, json!({ "hasTaken": found.is_some() })),
        Err(e) => db_err(&req.id, "db_query_failed", &e, None),
    }
}

fn handle_responses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    match survey_meta(conn, &survey_id) {
        Ok(Some(m)) if m.owner_id == owner_id => {}
        Ok(Some(_)) => return err(&req.id, "forbidden", "survey is owned by someone else", None),
        Ok(None) => return err(&req.id, "not_found", "survey not found", None),
        Err(e) => return db_err(&req.id, "db_query_failed", &e, None),
    }

    let mut r_stmt = match conn.prepare(
        "SELECT id, respondent_id, submitted_at, source_address
         FROM responses WHERE survey_id = ? ORDER BY submitted_at, id",
    ) {
        Ok(s) => s,
        Err(e) => return db_err(&req.id, "db_query_failed", &e, None),
    };
    let response_rows = r_stmt
        .query_map([&survey_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let response_rows = match response_rows {
        Ok(v) => v,
        Err(e) => return db_err(&req.id, "db_query_failed", &e, None),
    };

    // Resolve question text/type alongside each answer for display.
    let mut a_stmt = match conn.prepare(
        "SELECT a.question_id, q.text, q.qtype, a.value
         FROM answers a
         JOIN questions q ON q.id = a.question_id
         WHERE a.response_id = ?
         ORDER BY q.sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return db_err(&req.id, "db_query_failed", &e, None),
    };

    let mut out = Vec::with_capacity(response_rows.len());
    for (response_id, respondent_id, submitted_at, source_address) in response_rows {
        let answer_rows = a_stmt
            .query_map([&response_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        let answer_rows = match answer_rows {
            Ok(v) => v,
            Err(e) => return db_err(&req.id, "db_query_failed", &e, None),
        };

        let mut answers = Vec::with_capacity(answer_rows.len());
        for (question_id, question_text, qtype, stored) in answer_rows {
            let value = serde_json::from_str::<AnswerValue>(&stored)
                .map(|v| v.to_wire())
                .unwrap_or(serde_json::Value::Null);
            answers.push(json!({
                "questionId": question_id,
                "questionText": question_text,
                "questionType": qtype,
                "value": value
            }));
        }

        out.push(json!({
            "id": response_id,
            "surveyId": survey_id,
            "respondentId": respondent_id,
            "submittedAt": submitted_at,
            "sourceAddress": source_address,
            "answers": answers
        }));
    }

    ok(&req.id, json!({ "responses": out }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "responses.submit" => Some(handle_responses_submit(state, req)),
        "responses.check" => Some(handle_responses_check(state, req)),
        "responses.list" => Some(handle_responses_list(state, req)),
        _ => None,
    }
}
