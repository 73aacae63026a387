use std::path::Path;

use examlens_config::{load_workspace_config, validate_config};
use examlens_core::{
    AccuracyHierarchy, FeedbackMap, GroupLevel, MisconceptionMap, QuestionFact, Scope, push_unique,
};
use examlens_store::{FactStore, open_fact_store};

use crate::AnalysisError;
use crate::metrics::{
    PerformanceSummary, accuracy_hierarchy, consistency_score, improvement_rate,
    overall_performance,
};

/// Opens the fact store configured for `workspace`, logging config warnings.
pub fn open_workspace_store(
    workspace: impl AsRef<Path>,
) -> Result<Box<dyn FactStore>, AnalysisError> {
    let workspace = workspace.as_ref();
    let config = load_workspace_config(workspace)?;
    for warning in validate_config(&config) {
        tracing::warn!(code = warning.code, "{}", warning.message);
    }

    let store = open_fact_store(workspace, &config.store)?;
    tracing::debug!(backend = store.backend_name(), "opened fact store");
    Ok(store)
}

/// Scope-bounded performance queries over either store backend.
pub struct PerformanceAnalyzer<'a> {
    store: &'a dyn FactStore,
}

impl<'a> PerformanceAnalyzer<'a> {
    pub fn new(store: &'a dyn FactStore) -> Self {
        Self { store }
    }

    pub fn summary(&self, scope: &Scope) -> Result<PerformanceSummary, AnalysisError> {
        let by_test = self.store.tallies(scope, GroupLevel::Test)?;
        let by_topic = self.store.tallies(scope, GroupLevel::SubjectTopic)?;

        Ok(PerformanceSummary::from_parts(
            overall_performance(&by_test),
            self.store.tests_taken(scope)?,
            improvement_rate(&by_test),
            consistency_score(&by_topic),
        ))
    }

    pub fn accuracy_hierarchy(&self, scope: &Scope) -> Result<AccuracyHierarchy, AnalysisError> {
        let chapters = self.store.tallies(scope, GroupLevel::Chapter)?;
        let topics = self.store.tallies(scope, GroupLevel::Topic)?;
        Ok(accuracy_hierarchy(&chapters, &topics))
    }

    pub fn feedback_map(&self, scope: &Scope) -> Result<FeedbackMap, AnalysisError> {
        Ok(self.store.feedback_map(scope)?)
    }

    pub fn misconception_map(&self, scope: &Scope) -> Result<MisconceptionMap, AnalysisError> {
        let mut map = MisconceptionMap::new();
        for fact in self.store.misconceptions(scope)? {
            let entries = map
                .entry(fact.path.subject)
                .or_default()
                .entry(fact.path.chapter)
                .or_default()
                .entry(fact.path.topic)
                .or_default();
            push_unique(entries, fact.misconception);
        }
        Ok(map)
    }

    pub fn fact_set(&self, scope: &Scope) -> Result<Vec<QuestionFact>, AnalysisError> {
        Ok(self.store.questions(scope)?)
    }
}
