
use serde_json::json;
use test_support::{request_err, request_ok, spawn_with_workspace, survey_id_of};

fn bucket_counts(result: &serde_json::Value) -> Vec<(String, i64)> {
    result
        .get("buckets")
        .and_then(|v| v.as_array())
        .expect("buckets")
        .iter()
        .map(|b| {
            (
                b.get("value").and_then(|v| v.as_str()).unwrap().to_string(),
                b.get("count").and_then(|v| v.as_i64()).unwrap(),
            )
        })
        .collect()
}

#[test]
fn distributions_cover_every_question_type() {
    let (_child, mut stdin, mut reader, _ws) = spawn_with_workspace("surveyd-distribution");

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "surveys.create",
        json!({
            "owner": { "id": "t1", "role": "teacher" },
            "title": "Charting",
            "description": "Distribution fixtures",
            "visibility": "public",
            "questions": [
                {
                    "text": "Pick one",
                    "type": "SINGLE_CHOICE",
                    "choices": [{ "text": "Choice 1" }, { "text": "Choice 2" }, { "text": "Choice 3" }]
                },
                {
                    "text": "Pick many",
                    "type": "MULTIPLE_CHOICE",
                    "choices": [{ "text": "A" }, { "text": "B" }, { "text": "C" }]
                },
                { "text": "Rate it", "type": "RATING_SCALE" },
                { "text": "Comments", "type": "TEXT" }
            ]
        }),
    );
    let survey_id = survey_id_of(&created);
    let qids: Vec<String> = created
        .get("survey")
        .and_then(|s| s.get("questions"))
        .and_then(|v| v.as_array())
        .expect("questions")
        .iter()
        .map(|q| q.get("id").and_then(|v| v.as_str()).unwrap().to_string())
        .collect();

    let submissions = [
        ("r1", "Choice 1", json!(["A", "B"]), 4, Some("great")),
        ("r2", "Choice 1", json!(["A"]), 4, None),
        ("r3", "Choice 2", json!(["B", "C"]), 2, Some("meh")),
    ];
    for (i, (who, single, multi, rating, text)) in submissions.iter().enumerate() {
        let mut answers = vec![
            json!({ "questionId": qids[0], "value": single }),
            json!({ "questionId": qids[1], "value": multi }),
            json!({ "questionId": qids[2], "value": rating }),
        ];
        if let Some(t) = text {
            answers.push(json!({ "questionId": qids[3], "value": t }));
        }
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("sub-{}", i),
            "responses.submit",
            json!({
                "surveyId": survey_id,
                "respondent": { "id": who, "role": "student" },
                "answers": answers
            }),
        );
    }

    // Single choice: per-choice counts with the never-chosen option at 0.
    let single = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "analytics.distribution",
        json!({ "surveyId": survey_id, "questionId": qids[0] }),
    );
    assert_eq!(
        bucket_counts(&single),
        vec![
            ("Choice 1".to_string(), 2),
            ("Choice 2".to_string(), 1),
            ("Choice 3".to_string(), 0)
        ]
    );
    assert_eq!(single.get("total").and_then(|v| v.as_i64()), Some(3));

    // Multiple choice: every selection counts its own bucket.
    let multi = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "analytics.distribution",
        json!({ "surveyId": survey_id, "questionId": qids[1] }),
    );
    assert_eq!(
        bucket_counts(&multi),
        vec![
            ("A".to_string(), 2),
            ("B".to_string(), 2),
            ("C".to_string(), 1)
        ]
    );
    assert_eq!(multi.get("total").and_then(|v| v.as_i64()), Some(5));

    // Rating: the full scale is present even where nobody voted.
    let rating = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "analytics.distribution",
        json!({ "surveyId": survey_id, "questionId": qids[2] }),
    );
    assert_eq!(
        bucket_counts(&rating),
        vec![
            ("1".to_string(), 0),
            ("2".to_string(), 1),
            ("3".to_string(), 0),
            ("4".to_string(), 2),
            ("5".to_string(), 0)
        ]
    );

    // Text: the literal non-empty answers, no aggregation.
    let text = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "analytics.distribution",
        json!({ "surveyId": survey_id, "questionId": qids[3] }),
    );
    let texts: Vec<&str> = text
        .get("texts")
        .and_then(|v| v.as_array())
        .expect("texts")
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert_eq!(texts, vec!["great", "meh"]);
    assert_eq!(text.get("total").and_then(|v| v.as_i64()), Some(2));
}

#[test]
fn unknown_values_get_their_own_bucket_after_known_choices() {
    let (_child, mut stdin, mut reader, _ws) = spawn_with_workspace("surveyd-distribution-legacy");

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "surveys.create",
        test_support::simple_survey_params("t1", "teacher", "Legacy values"),
    );
    let survey_id = survey_id_of(&created);
    let question_id = test_support::first_question_id(&created);

    // Answer values are shape-checked, not membership-checked, so a value
    // outside the predefined set lands as its own bucket.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "responses.submit",
        json!({
            "surveyId": survey_id,
            "respondent": { "id": "r1", "role": "student" },
            "answers": [{ "questionId": question_id, "value": "Chartreuse" }]
        }),
    );

    let dist = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "analytics.distribution",
        json!({ "surveyId": survey_id, "questionId": question_id }),
    );
    assert_eq!(
        bucket_counts(&dist),
        vec![
            ("Red".to_string(), 0),
            ("Blue".to_string(), 0),
            ("Chartreuse".to_string(), 1)
        ]
    );
}

#[test]
fn distribution_requires_a_question_inside_the_survey() {
    let (_child, mut stdin, mut reader, _ws) = spawn_with_workspace("surveyd-distribution-missing");

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "surveys.create",
        test_support::simple_survey_params("t1", "teacher", "One"),
    );
    let survey_id = survey_id_of(&created);

    request_err(
        &mut stdin,
        &mut reader,
        "2",
        "analytics.distribution",
        json!({ "surveyId": survey_id, "questionId": "not-here" }),
        "not_found",
    );
}
