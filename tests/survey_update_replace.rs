
use serde_json::json;
use test_support::{request_err, request_ok, spawn_with_workspace, survey_id_of};

fn replacement_params(survey_id: &str, owner_id: &str) -> serde_json::Value {
    json!({
        "surveyId": survey_id,
        "ownerId": owner_id,
        "title": "Renamed",
        "description": "Replaced",
        "visibility": "private",
        "questions": [
            {
                "text": "New question",
                "type": "MULTIPLE_CHOICE",
                "required": true,
                "choices": [{ "text": "X" }, { "text": "Y" }, { "text": "Z" }]
            },
            { "text": "Score it", "type": "RATING_SCALE", "required": false }
        ]
    })
}

fn tree_shape(survey: &serde_json::Value) -> (String, String, Vec<(String, String, usize)>) {
    let title = survey
        .get("title")
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();
    let visibility = survey
        .get("visibility")
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();
    let questions = survey
        .get("questions")
        .and_then(|v| v.as_array())
        .unwrap()
        .iter()
        .map(|q| {
            (
                q.get("text").and_then(|v| v.as_str()).unwrap().to_string(),
                q.get("type").and_then(|v| v.as_str()).unwrap().to_string(),
                q.get("choices")
                    .and_then(|v| v.as_array())
                    .map(Vec::len)
                    .unwrap_or(0),
            )
        })
        .collect();
    (title, visibility, questions)
}

#[test]
fn update_replaces_the_whole_question_tree() {
    let (_child, mut stdin, mut reader, _ws) = spawn_with_workspace("surveyd-update-replace");

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "surveys.create",
        test_support::simple_survey_params("t1", "teacher", "Original"),
    );
    let survey_id = survey_id_of(&created);

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "surveys.update",
        replacement_params(&survey_id, "t1"),
    );
    let survey = updated.get("survey").expect("survey");
    assert_eq!(survey.get("id").and_then(|v| v.as_str()), Some(survey_id.as_str()));
    let (title, visibility, questions) = tree_shape(survey);
    assert_eq!(title, "Renamed");
    assert_eq!(visibility, "private");
    assert_eq!(
        questions,
        vec![
            ("New question".to_string(), "MULTIPLE_CHOICE".to_string(), 3),
            ("Score it".to_string(), "RATING_SCALE".to_string(), 0)
        ]
    );

    // The old question is gone, not merged.
    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "surveys.get",
        json!({ "surveyId": survey_id }),
    );
    let (_, _, fetched_questions) = tree_shape(fetched.get("survey").unwrap());
    assert_eq!(fetched_questions.len(), 2);
}

#[test]
fn update_is_idempotent_over_tree_contents() {
    let (_child, mut stdin, mut reader, _ws) = spawn_with_workspace("surveyd-update-idempotent");

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "surveys.create",
        test_support::simple_survey_params("t1", "teacher", "Original"),
    );
    let survey_id = survey_id_of(&created);

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "surveys.update",
        replacement_params(&survey_id, "t1"),
    );
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "surveys.update",
        replacement_params(&survey_id, "t1"),
    );

    // Ids regenerate under replace semantics; the tree contents must match.
    assert_eq!(
        tree_shape(first.get("survey").unwrap()),
        tree_shape(second.get("survey").unwrap())
    );
}

#[test]
fn update_requires_the_owning_caller() {
    let (_child, mut stdin, mut reader, _ws) = spawn_with_workspace("surveyd-update-owner");

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "surveys.create",
        test_support::simple_survey_params("t1", "teacher", "Original"),
    );
    let survey_id = survey_id_of(&created);

    request_err(
        &mut stdin,
        &mut reader,
        "2",
        "surveys.update",
        replacement_params(&survey_id, "someone-else"),
        "not_found",
    );
    request_err(
        &mut stdin,
        &mut reader,
        "3",
        "surveys.update",
        replacement_params("no-such-survey", "t1"),
        "not_found",
    );

    // A rejected update leaves the original intact.
    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "surveys.get",
        json!({ "surveyId": survey_id }),
    );
    assert_eq!(
        fetched
            .get("survey")
            .and_then(|s| s.get("title"))
            .and_then(|v| v.as_str()),
        Some("Original")
    );
}

#[test]
fn invalid_replacement_payload_leaves_survey_untouched() {
    let (_child, mut stdin, mut reader, _ws) = spawn_with_workspace("surveyd-update-atomic");

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "surveys.create",
        test_support::simple_survey_params("t1", "teacher", "Original"),
    );
    let survey_id = survey_id_of(&created);

    request_err(
        &mut stdin,
        &mut reader,
        "2",
        "surveys.update",
        json!({
            "surveyId": survey_id,
            "ownerId": "t1",
            "title": "Renamed",
            "description": "Replaced",
            "visibility": "public",
            "questions": [{ "text": "Q", "type": "SINGLE_CHOICE", "choices": [] }]
        }),
        "validation_failed",
    );

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "surveys.get",
        json!({ "surveyId": survey_id }),
    );
    let survey = fetched.get("survey").unwrap();
    assert_eq!(survey.get("title").and_then(|v| v.as_str()), Some("Original"));
    let (_, _, questions) = tree_shape(survey);
    assert_eq!(questions.len(), 1);
    assert_eq!(questions[0].2, 2);
}
