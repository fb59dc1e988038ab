use serde::{Deserialize, Serialize};
use serde_json::json;

pub const RATING_MIN: i64 = 1;
pub const RATING_MAX: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionType {
    Text,
    SingleChoice,
    MultipleChoice,
    RatingScale,
}

impl QuestionType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TEXT" => Some(QuestionType::Text),
            "SINGLE_CHOICE" => Some(QuestionType::SingleChoice),
            "MULTIPLE_CHOICE" => Some(QuestionType::MultipleChoice),
            "RATING_SCALE" => Some(QuestionType::RatingScale),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QuestionType::Text => "TEXT",
            QuestionType::SingleChoice => "SINGLE_CHOICE",
            QuestionType::MultipleChoice => "MULTIPLE_CHOICE",
            QuestionType::RatingScale => "RATING_SCALE",
        }
    }

    /// Only selectable types own a choice list.
    pub fn is_selectable(self) -> bool {
        matches!(self, QuestionType::SingleChoice | QuestionType::MultipleChoice)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    StudentsOnly,
    Private,
}

impl Visibility {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Visibility::Public),
            "students_only" => Some(Visibility::StudentsOnly),
            "private" => Some(Visibility::Private),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::StudentsOnly => "students_only",
            Visibility::Private => "private",
        }
    }
}

/// Answer payload in its validated, type-checked form. Selected against the
/// question's declared type at write time and stored as tagged JSON, so reads
/// never have to guess what shape a raw value is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AnswerValue {
    Text(String),
    Choice(String),
    MultiChoice(Vec<String>),
    Rating(i64),
}

impl AnswerValue {
    /// Validate a raw wire value against the question type. Returns a
    /// human-readable reason on mismatch; the caller attaches the index.
    pub fn from_raw(qtype: QuestionType, raw: &serde_json::Value) -> Result<Self, String> {
        match qtype {
            QuestionType::Text => {
                let s = raw
                    .as_str()
                    .ok_or_else(|| "text answer must be a string".to_string())?;
                let s = s.trim();
                if s.is_empty() {
                    return Err("text answer must not be empty".to_string());
                }
                Ok(AnswerValue::Text(s.to_string()))
            }
            QuestionType::SingleChoice => {
                let s = raw
                    .as_str()
                    .ok_or_else(|| "single-choice answer must be a string".to_string())?;
                let s = s.trim();
                if s.is_empty() {
                    return Err("single-choice answer must not be empty".to_string());
                }
                Ok(AnswerValue::Choice(s.to_string()))
            }
            QuestionType::MultipleChoice => {
                let arr = raw
                    .as_array()
                    .ok_or_else(|| "multiple-choice answer must be a list".to_string())?;
                if arr.is_empty() {
                    return Err("multiple-choice answer must not be empty".to_string());
                }
                let mut out = Vec::with_capacity(arr.len());
                for v in arr {
                    let s = v
                        .as_str()
                        .ok_or_else(|| "multiple-choice selections must be strings".to_string())?;
                    let s = s.trim();
                    if s.is_empty() {
                        return Err("multiple-choice selections must not be empty".to_string());
                    }
                    out.push(s.to_string());
                }
                Ok(AnswerValue::MultiChoice(out))
            }
            QuestionType::RatingScale => {
                let n = raw
                    .as_i64()
                    .ok_or_else(|| "rating answer must be an integer".to_string())?;
                if !(RATING_MIN..=RATING_MAX).contains(&n) {
                    return Err(format!(
                        "rating must be between {} and {}",
                        RATING_MIN, RATING_MAX
                    ));
                }
                Ok(AnswerValue::Rating(n))
            }
        }
    }

    /// The raw shape clients see: string, list, or number.
    pub fn to_wire(&self) -> serde_json::Value {
        match self {
            AnswerValue::Text(s) | AnswerValue::Choice(s) => json!(s),
            AnswerValue::MultiChoice(vs) => json!(vs),
            AnswerValue::Rating(n) => json!(n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn answer_shapes_follow_question_type() {
        assert_eq!(
            AnswerValue::from_raw(QuestionType::Text, &json!("fine")),
            Ok(AnswerValue::Text("fine".to_string()))
        );
        assert_eq!(
            AnswerValue::from_raw(QuestionType::SingleChoice, &json!("Red")),
            Ok(AnswerValue::Choice("Red".to_string()))
        );
        assert_eq!(
            AnswerValue::from_raw(QuestionType::MultipleChoice, &json!(["A", "B"])),
            Ok(AnswerValue::MultiChoice(vec![
                "A".to_string(),
                "B".to_string()
            ]))
        );
        assert_eq!(
            AnswerValue::from_raw(QuestionType::RatingScale, &json!(4)),
            Ok(AnswerValue::Rating(4))
        );
    }

    #[test]
    fn shape_mismatches_are_rejected() {
        assert!(AnswerValue::from_raw(QuestionType::Text, &json!(3)).is_err());
        assert!(AnswerValue::from_raw(QuestionType::Text, &json!("   ")).is_err());
        assert!(AnswerValue::from_raw(QuestionType::SingleChoice, &json!(["A"])).is_err());
        assert!(AnswerValue::from_raw(QuestionType::MultipleChoice, &json!("A")).is_err());
        assert!(AnswerValue::from_raw(QuestionType::MultipleChoice, &json!([])).is_err());
        assert!(AnswerValue::from_raw(QuestionType::RatingScale, &json!("4")).is_err());
        assert!(AnswerValue::from_raw(QuestionType::RatingScale, &json!(0)).is_err());
        assert!(AnswerValue::from_raw(QuestionType::RatingScale, &json!(6)).is_err());
    }

    #[test]
    fn stored_form_round_trips() {
        let v = AnswerValue::MultiChoice(vec!["A".to_string(), "C".to_string()]);
        let text = serde_json::to_string(&v).expect("serialize");
        let back: AnswerValue = serde_json::from_str(&text).expect("deserialize");
        assert_eq!(back, v);
        assert_eq!(back.to_wire(), json!(["A", "C"]));
    }
}
