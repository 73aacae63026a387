use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod record;

pub use record::{
    DEFAULT_FEEDBACK, DEFAULT_QUESTION_TYPE, QuestionRecord, RawQuestionRecord,
    UNKNOWN_CHAPTER, UNKNOWN_SUBJECT, UNKNOWN_SUBTOPIC, UNKNOWN_TOPIC, parse_batch_json,
};

pub const CORRECT_SCORE: i64 = 4;
pub const INCORRECT_SCORE: i64 = -1;
pub const UNATTEMPTED_SCORE: i64 = 0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid scope: {0}")]
    InvalidScope(String),
    #[error("validation failed: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TestKey {
    pub class_id: String,
    pub test_number: u32,
}

impl TestKey {
    pub fn new(class_id: impl Into<String>, test_number: u32) -> Result<Self, CoreError> {
        let class_id = normalize_class_id(&class_id.into())?;
        Ok(Self {
            class_id,
            test_number,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QuestionKey {
    pub test: TestKey,
    pub question_number: u32,
}

impl QuestionKey {
    /// Material hashed into the ids of facts attached to this question.
    pub fn id_material(&self) -> String {
        format!(
            "{}\n{}\n{}",
            self.test.class_id, self.test.test_number, self.question_number
        )
    }
}

/// The subset of facts a query runs over: one class, optionally narrowed to a
/// single test.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub class_id: String,
    pub test_number: Option<u32>,
}

impl Scope {
    pub fn class(class_id: impl Into<String>) -> Result<Self, CoreError> {
        Ok(Self {
            class_id: normalize_class_id(&class_id.into())?,
            test_number: None,
        })
    }

    pub fn test(class_id: impl Into<String>, test_number: u32) -> Result<Self, CoreError> {
        Ok(Self {
            class_id: normalize_class_id(&class_id.into())?,
            test_number: Some(test_number),
        })
    }

    pub fn contains(&self, test: &TestKey) -> bool {
        self.class_id == test.class_id
            && self
                .test_number
                .is_none_or(|test_number| test_number == test.test_number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HierarchyPath {
    pub subject: String,
    pub chapter: String,
    pub topic: String,
    pub subtopic: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionFact {
    pub key: QuestionKey,
    pub path: HierarchyPath,
    pub text: String,
    pub correct_answer: Option<String>,
    pub opted_answer: Option<String>,
    pub is_correct: Option<bool>,
    pub question_type: String,
    pub importance: Option<String>,
}

impl QuestionFact {
    pub fn is_attempted(&self) -> bool {
        is_attempted_answer(self.opted_answer.as_deref())
    }

    pub fn is_correct_attempt(&self) -> bool {
        self.is_attempted() && self.is_correct == Some(true)
    }

    pub fn is_incorrect_attempt(&self) -> bool {
        self.is_attempted() && self.is_correct == Some(false)
    }

    pub fn score(&self) -> i64 {
        if !self.is_attempted() {
            UNATTEMPTED_SCORE
        } else if self.is_correct_attempt() {
            CORRECT_SCORE
        } else {
            INCORRECT_SCORE
        }
    }
}

pub fn is_attempted_answer(opted_answer: Option<&str>) -> bool {
    opted_answer.is_some_and(|answer| !answer.trim().is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Misconception {
    pub error_type: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MisconceptionFact {
    pub question: QuestionKey,
    pub path: HierarchyPath,
    pub misconception: Misconception,
}

pub fn misconception_id(question: &QuestionKey, misconception: &Misconception) -> String {
    content_hash(&format!(
        "{}\nmisconception\n{}\n{}",
        question.id_material(),
        misconception.error_type,
        misconception.description
    ))
}

pub fn feedback_id(question: &QuestionKey, text: &str) -> String {
    content_hash(&format!("{}\nfeedback\n{}", question.id_material(), text))
}

pub fn content_hash(content: &str) -> String {
    blake3::hash(content.as_bytes()).to_hex().to_string()
}

/// Level at which attempted questions are grouped into tallies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupLevel {
    Test,
    SubjectTopic,
    Chapter,
    Topic,
}

impl GroupLevel {
    pub fn key_for(self, test_number: u32, path: &HierarchyPath) -> TallyKey {
        let mut key = TallyKey::for_test(test_number);
        match self {
            Self::Test => {}
            Self::SubjectTopic => {
                key.subject = Some(path.subject.clone());
                key.topic = Some(path.topic.clone());
            }
            Self::Chapter => {
                key.subject = Some(path.subject.clone());
                key.chapter = Some(path.chapter.clone());
            }
            Self::Topic => {
                key.subject = Some(path.subject.clone());
                key.chapter = Some(path.chapter.clone());
                key.topic = Some(path.topic.clone());
            }
        }
        key
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TallyKey {
    pub subject: Option<String>,
    pub chapter: Option<String>,
    pub topic: Option<String>,
    pub test_number: u32,
}

impl TallyKey {
    pub fn for_test(test_number: u32) -> Self {
        Self {
            subject: None,
            chapter: None,
            topic: None,
            test_number,
        }
    }
}

/// Correct/attempted counts for one group. Only attempted questions are counted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupTally {
    pub key: TallyKey,
    pub correct: u64,
    pub attempted: u64,
}

impl GroupTally {
    pub fn incorrect(&self) -> u64 {
        self.attempted.saturating_sub(self.correct)
    }

    pub fn score(&self) -> i64 {
        self.correct as i64 * CORRECT_SCORE + self.incorrect() as i64 * INCORRECT_SCORE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FactCounts {
    pub tests: u64,
    pub subjects: u64,
    pub chapters: u64,
    pub topics: u64,
    pub subtopics: u64,
    pub questions: u64,
    pub misconceptions: u64,
    pub feedback: u64,
}

/// `test number -> accuracy %`
pub type TestAccuracy = BTreeMap<u32, f64>;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChapterAccuracy {
    pub chapter_accuracy: TestAccuracy,
    pub topics: BTreeMap<String, TestAccuracy>,
}

/// `subject -> chapter -> accuracies`
pub type AccuracyHierarchy = BTreeMap<String, BTreeMap<String, ChapterAccuracy>>;

/// `subject -> chapter -> topic -> feedback texts`
pub type FeedbackMap = BTreeMap<String, BTreeMap<String, BTreeMap<String, Vec<String>>>>;

/// `subject -> chapter -> topic -> misconceptions`
pub type MisconceptionMap = BTreeMap<String, BTreeMap<String, BTreeMap<String, Vec<Misconception>>>>;

pub fn push_unique<T: PartialEq>(values: &mut Vec<T>, value: T) {
    if !values.contains(&value) {
        values.push(value);
    }
}

/// Trims a class id, rejecting blank ones.
pub fn normalize_class_id(class_id: &str) -> Result<String, CoreError> {
    let trimmed = class_id.trim();
    if trimmed.is_empty() {
        return Err(CoreError::InvalidScope("class_id must not be blank".to_owned()));
    }
    Ok(trimmed.to_owned())
}
