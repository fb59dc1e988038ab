use crate::ipc::error::{db_err, err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::{AnswerValue, QuestionType, Visibility, RATING_MAX, RATING_MIN};
use crate::rank::{self, Candidate, Viewer};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;

const DEFAULT_RECOMMEND_LIMIT: usize = 10;

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn parse_viewer(req: &Request) -> Result<Viewer, serde_json::Value> {
    let Some(viewer) = req.params.get("viewer") else {
        return Err(err(&req.id, "bad_params", "missing viewer", None));
    };
    let role = viewer.get("role").and_then(|v| v.as_str()).unwrap_or("");
    let id = viewer
        .get("id")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string());
    match role {
        "anonymous" => Ok(Viewer::Anonymous),
        "student" => match id {
            Some(id) if !id.is_empty() => Ok(Viewer::Student { id }),
            _ => Err(err(&req.id, "bad_params", "missing viewer.id", None)),
        },
        "teacher" => match id {
            Some(id) if !id.is_empty() => Ok(Viewer::Teacher { id }),
            _ => Err(err(&req.id, "bad_params", "missing viewer.id", None)),
        },
        _ => Err(err(
            &req.id,
            "bad_params",
            "viewer.role must be anonymous, student or teacher",
            None,
        )),
    }
}

fn handle_distribution(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let survey_id = match required_str(req, "surveyId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let question_id = match required_str(req, "questionId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let question = conn
        .query_row(
            "SELECT text, qtype FROM questions WHERE id = ? AND survey_id = ?",
            (&question_id, &survey_id),
            |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
        )
        .optional();
    let (question_text, qtype_raw) = match question {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "question not found in survey", None),
        Err(e) => return db_err(&req.id, "db_query_failed", &e, None),
    };
    let Some(qtype) = QuestionType::parse(&qtype_raw) else {
        return err(
            &req.id,
            "db_query_failed",
            format!("stored question has unknown type {}", qtype_raw),
            None,
        );
    };

    // Stored answers in submission order.
    let mut stmt = match conn.prepare(
        "SELECT a.value
         FROM answers a
         JOIN responses r ON r.id = a.response_id
         WHERE a.question_id = ?
         ORDER BY r.submitted_at, r.id",
    ) {
        Ok(s) => s,
        Err(e) => return db_err(&req.id, "db_query_failed", &e, None),
    };
    let stored = stmt
        .query_map([&question_id], |row| row.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let stored = match stored {
        Ok(v) => v,
        Err(e) => return db_err(&req.id, "db_query_failed", &e, None),
    };

    let values: Vec<AnswerValue> = stored
        .iter()
        .filter_map(|s| serde_json::from_str::<AnswerValue>(s).ok())
        .collect();

    let question_json = json!({
        "id": question_id,
        "text": question_text,
        "type": qtype.as_str()
    });

    if qtype == QuestionType::Text {
        let texts: Vec<String> = values
            .into_iter()
            .filter_map(|v| match v {
                AnswerValue::Text(s) if !s.trim().is_empty() => Some(s),
                _ => None,
            })
            .collect();
        return ok(
            &req.id,
            json!({
                "question": question_json,
                "texts": texts,
                "total": texts.len()
            }),
        );
    }

    // Predefined buckets first (all at 0 so sparse data still charts), then
    // unknown/legacy values by raw string in first-seen order.
    let mut order: Vec<String> = Vec::new();
    if qtype.is_selectable() {
        let mut c_stmt = match conn
            .prepare("SELECT text FROM choices WHERE question_id = ? ORDER BY sort_order")
        {
            Ok(s) => s,
            Err(e) => return db_err(&req.id, "db_query_failed", &e, None),
        };
        let choice_texts = c_stmt
            .query_map([&question_id], |row| row.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        match choice_texts {
            Ok(texts) => order.extend(texts),
            Err(e) => return db_err(&req.id, "db_query_failed", &e, None),
        }
    } else {
        for n in RATING_MIN..=RATING_MAX {
            order.push(n.to_string());
        }
    }
    let mut counts: HashMap<String, i64> = order.iter().map(|k| (k.clone(), 0)).collect();

    fn bump(order: &mut Vec<String>, counts: &mut HashMap<String, i64>, key: String) {
        if !counts.contains_key(&key) {
            order.push(key.clone());
        }
        *counts.entry(key).or_insert(0) += 1;
    }

    for v in values {
        match v {
            AnswerValue::Choice(s) => bump(&mut order, &mut counts, s),
            // Each selected option counts on its own; one answer may feed
            // several buckets.
            AnswerValue::MultiChoice(vs) => {
                for s in vs {
                    bump(&mut order, &mut counts, s);
                }
            }
            AnswerValue::Rating(n) => bump(&mut order, &mut counts, n.to_string()),
            AnswerValue::Text(_) => {}
        }
    }

    let mut total: i64 = 0;
    let buckets: Vec<serde_json::Value> = order
        .iter()
        .map(|key| {
            let count = counts.get(key).copied().unwrap_or(0);
            total += count;
            json!({ "value": key, "count": count })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "question": question_json,
            "buckets": buckets,
            "total": total
        }),
    )
}

fn handle_recommended(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let viewer = match parse_viewer(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let limit = req
        .params
        .get("limit")
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .unwrap_or(DEFAULT_RECOMMEND_LIMIT);

    // The link probe only matters for student viewers; everyone else gets a
    // never-matching id.
    let student_id = match &viewer {
        Viewer::Student { id } => id.clone(),
        _ => String::new(),
    };

    let mut stmt = match conn.prepare(
        "SELECT
           s.id, s.owner_id, s.title, s.description, s.visibility, s.created_at,
           (SELECT COUNT(*) FROM responses r WHERE r.survey_id = s.id) AS response_count,
           EXISTS(
             SELECT 1 FROM teacher_student_links l
             WHERE l.teacher_id = s.owner_id AND l.student_id = ?1
           ) AS owner_linked
         FROM surveys s",
    ) {
        Ok(s) => s,
        Err(e) => return db_err(&req.id, "db_query_failed", &e, None),
    };

    let rows = stmt
        .query_map([&student_id], |row| {
            let id: String = row.get(0)?;
            let owner_id: String = row.get(1)?;
            let title: String = row.get(2)?;
            let description: String = row.get(3)?;
            let visibility: String = row.get(4)?;
            let created_at: String = row.get(5)?;
            let response_count: i64 = row.get(6)?;
            let owner_linked: i64 = row.get(7)?;
            Ok((
                id,
                owner_id,
                title,
                description,
                visibility,
                created_at,
                response_count,
                owner_linked,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return db_err(&req.id, "db_query_failed", &e, None),
    };

    let mut meta: HashMap<String, (String, String)> = HashMap::new();
    let mut candidates = Vec::with_capacity(rows.len());
    for (id, owner_id, title, description, visibility, created_at, response_count, owner_linked) in
        rows
    {
        let Some(visibility) = Visibility::parse(&visibility) else {
            continue;
        };
        meta.insert(id.clone(), (title, description));
        candidates.push(Candidate {
            id,
            owner_id,
            visibility,
            created_at,
            response_count,
            owner_linked: owner_linked != 0,
        });
    }
    let ranked = rank::rank(&viewer, candidates, limit);
    let surveys: Vec<serde_json::Value> = ranked
        .into_iter()
        .map(|(tier, c)| {
            let (title, description) = meta
                .get(&c.id)
                .cloned()
                .unwrap_or_else(|| (String::new(), String::new()));
            json!({
                "id": c.id,
                "ownerId": c.owner_id,
                "title": title,
                "description": description,
                "visibility": c.visibility.as_str(),
                "createdAt": c.created_at,
                "responseCount": c.response_count,
                "tier": tier
            })
        })
        .collect();

    ok(&req.id, json!({ "surveys": surveys }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "analytics.distribution" => Some(handle_distribution(state, req)),
        "surveys.recommended" => Some(handle_recommended(state, req)),
        _ => None,
    }
}
