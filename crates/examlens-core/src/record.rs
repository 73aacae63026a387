use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{CoreError, HierarchyPath, Misconception, QuestionFact, QuestionKey, TestKey};

pub const UNKNOWN_SUBJECT: &str = "Unknown Subject";
pub const UNKNOWN_CHAPTER: &str = "Unknown Chapter";
pub const UNKNOWN_TOPIC: &str = "Unknown Topic";
pub const UNKNOWN_SUBTOPIC: &str = "Unknown Subtopic";
pub const DEFAULT_QUESTION_TYPE: &str = "Unknown Type";
pub const DEFAULT_FEEDBACK: &str = "No Feedback Available";

/// One per-question result row as produced by the upstream parsing step.
///
/// Every field is optional and loosely typed; [`RawQuestionRecord::validate`]
/// applies the defaulting table and rejects rows that cannot be placed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawQuestionRecord {
    #[serde(rename = "Subject", default, deserialize_with = "lenient_text")]
    pub subject: Option<String>,
    #[serde(rename = "Chapter", default, deserialize_with = "lenient_text")]
    pub chapter: Option<String>,
    #[serde(rename = "Topic", default, deserialize_with = "lenient_text")]
    pub topic: Option<String>,
    #[serde(rename = "Subtopic", default, deserialize_with = "lenient_text")]
    pub subtopic: Option<String>,
    #[serde(rename = "QuestionText", default, deserialize_with = "lenient_text")]
    pub question_text: Option<String>,
    #[serde(rename = "CorrectAnswer", default, deserialize_with = "lenient_text")]
    pub correct_answer: Option<String>,
    #[serde(rename = "OptedAnswer", default, deserialize_with = "lenient_text")]
    pub opted_answer: Option<String>,
    #[serde(rename = "IsCorrect", default, deserialize_with = "lenient_bool")]
    pub is_correct: Option<bool>,
    #[serde(rename = "TypeOfQuestion", default, deserialize_with = "lenient_text")]
    pub question_type: Option<String>,
    #[serde(rename = "Feedback", default, deserialize_with = "lenient_text")]
    pub feedback: Option<String>,
    #[serde(rename = "Error_Type", default, deserialize_with = "lenient_text")]
    pub error_type: Option<String>,
    #[serde(rename = "Error_Desp", default, deserialize_with = "lenient_text")]
    pub error_description: Option<String>,
    #[serde(rename = "QuestionNumber", default)]
    pub question_number: Option<Value>,
    #[serde(rename = "im_desp", default, deserialize_with = "lenient_text")]
    pub importance: Option<String>,
    #[serde(rename = "TestDate", default, deserialize_with = "lenient_text")]
    pub test_date: Option<String>,
}

/// A validated record with every default applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionRecord {
    pub question_number: u32,
    pub path: HierarchyPath,
    pub text: String,
    pub correct_answer: Option<String>,
    pub opted_answer: Option<String>,
    pub is_correct: Option<bool>,
    pub question_type: String,
    pub feedback: String,
    pub misconception: Option<Misconception>,
    pub importance: Option<String>,
    pub test_date: Option<String>,
}

impl RawQuestionRecord {
    pub fn validate(self) -> Result<QuestionRecord, CoreError> {
        let question_number = parse_question_number(self.question_number.as_ref())?;

        let misconception = match (
            non_blank(self.error_type),
            non_blank(self.error_description),
        ) {
            (Some(error_type), Some(description)) => Some(Misconception {
                error_type,
                description,
            }),
            _ => None,
        };

        Ok(QuestionRecord {
            question_number,
            path: HierarchyPath {
                subject: non_blank(self.subject).unwrap_or_else(|| UNKNOWN_SUBJECT.to_owned()),
                chapter: non_blank(self.chapter).unwrap_or_else(|| UNKNOWN_CHAPTER.to_owned()),
                topic: non_blank(self.topic).unwrap_or_else(|| UNKNOWN_TOPIC.to_owned()),
                subtopic: non_blank(self.subtopic)
                    .unwrap_or_else(|| UNKNOWN_SUBTOPIC.to_owned()),
            },
            text: self.question_text.unwrap_or_default(),
            correct_answer: non_blank(self.correct_answer),
            opted_answer: self.opted_answer,
            is_correct: self.is_correct,
            question_type: non_blank(self.question_type)
                .unwrap_or_else(|| DEFAULT_QUESTION_TYPE.to_owned()),
            feedback: self
                .feedback
                .map(|text| text.trim().to_owned())
                .unwrap_or_else(|| DEFAULT_FEEDBACK.to_owned()),
            misconception,
            importance: non_blank(self.importance),
            test_date: non_blank(self.test_date),
        })
    }
}

impl QuestionRecord {
    pub fn question_key(&self, test: &TestKey) -> QuestionKey {
        QuestionKey {
            test: test.clone(),
            question_number: self.question_number,
        }
    }

    pub fn to_fact(&self, test: &TestKey) -> QuestionFact {
        QuestionFact {
            key: self.question_key(test),
            path: self.path.clone(),
            text: self.text.clone(),
            correct_answer: self.correct_answer.clone(),
            opted_answer: self.opted_answer.clone(),
            is_correct: self.is_correct,
            question_type: self.question_type.clone(),
            importance: self.importance.clone(),
        }
    }

    pub fn is_attempted(&self) -> bool {
        crate::is_attempted_answer(self.opted_answer.as_deref())
    }
}

pub fn parse_batch_json(raw: &str) -> Result<Vec<RawQuestionRecord>, CoreError> {
    serde_json::from_str(raw)
        .map_err(|err| CoreError::Validation(format!("invalid record batch: {err}")))
}

fn parse_question_number(value: Option<&Value>) -> Result<u32, CoreError> {
    let parsed = match value {
        None | Some(Value::Null) => {
            return Err(CoreError::Validation("missing QuestionNumber".to_owned()));
        }
        Some(Value::Number(number)) => number.as_u64(),
        Some(Value::String(text)) => text.trim().parse::<u64>().ok(),
        Some(_) => None,
    };

    parsed
        .and_then(|number| u32::try_from(number).ok())
        .ok_or_else(|| {
            CoreError::Validation(format!(
                "non-numeric QuestionNumber: {}",
                value.map(Value::to_string).unwrap_or_default()
            ))
        })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text),
        Some(other) => Some(other.to_string()),
    })
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Bool(flag)) => Some(flag),
        Some(Value::Number(number)) => number.as_i64().map(|number| number != 0),
        Some(Value::String(text)) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    })
}
