use std::path::Path;

use examlens_config::{StoreBackendKind, StoreConfig, sqlite_path};
use examlens_core::{
    CoreError, FactCounts, FeedbackMap, GroupLevel, GroupTally, Misconception, MisconceptionFact,
    QuestionFact, QuestionKey, Scope, TestKey,
};
use thiserror::Error;

mod graph;
mod sqlite;

pub use graph::GraphFactStore;
pub use sqlite::{OptionFeedbackRecord, SqliteFactStore, option_index_for_answer};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to lock shared resource: {0}")]
    LockPoisoned(String),
    #[error("question not found: {0}")]
    QuestionNotFound(String),
    #[error(transparent)]
    Core(#[from] CoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertedQuestion {
    pub key: QuestionKey,
    pub created: bool,
}

/// Storage capability shared by the graph and relational backends.
///
/// Writers go through `upsert_path` and the attach methods; readers see the
/// hierarchy through scope-bounded queries. Both implementations must return
/// the same tallies for the same facts.
pub trait FactStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Creates any missing ancestor of `fact` and inserts the question, or
    /// overwrites the answer fields of the existing question with the same key.
    fn upsert_path(
        &self,
        fact: &QuestionFact,
        test_date: Option<&str>,
    ) -> Result<UpsertedQuestion, StoreError>;

    /// Returns `false` when an identical misconception is already attached.
    fn attach_misconception(
        &self,
        question: &QuestionKey,
        misconception: &Misconception,
    ) -> Result<bool, StoreError>;

    /// Returns `false` when identical feedback text is already attached.
    fn attach_feedback(&self, question: &QuestionKey, text: &str) -> Result<bool, StoreError>;

    fn delete_test(&self, test: &TestKey) -> Result<bool, StoreError>;

    /// Returns the number of tests removed. A blank class id is rejected.
    fn delete_class(&self, class_id: &str) -> Result<u64, StoreError>;

    fn test_date(&self, test: &TestKey) -> Result<Option<String>, StoreError>;

    fn questions(&self, scope: &Scope) -> Result<Vec<QuestionFact>, StoreError>;

    fn tests_taken(&self, scope: &Scope) -> Result<u64, StoreError>;

    /// Correct/attempted counts over attempted questions, grouped at `level`
    /// and sorted by key. Groups without attempted questions are absent.
    fn tallies(&self, scope: &Scope, level: GroupLevel) -> Result<Vec<GroupTally>, StoreError>;

    fn feedback_map(&self, scope: &Scope) -> Result<FeedbackMap, StoreError>;

    fn misconceptions(&self, scope: &Scope) -> Result<Vec<MisconceptionFact>, StoreError>;

    fn fact_counts(&self, scope: &Scope) -> Result<FactCounts, StoreError>;
}

pub fn open_fact_store(
    workspace_root: impl AsRef<Path>,
    config: &StoreConfig,
) -> Result<Box<dyn FactStore>, StoreError> {
    match config.backend {
        StoreBackendKind::Graph => Ok(Box::new(GraphFactStore::new())),
        StoreBackendKind::Sqlite => {
            let path = sqlite_path(workspace_root, config);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Ok(Box::new(SqliteFactStore::open(path)?))
        }
    }
}
