use examlens_store::StoreError;
use thiserror::Error;

mod ingest;
mod metrics;
mod performance;

pub use ingest::{IngestReport, IngestionMerger, SkippedRecord};
pub use metrics::{
    PerformanceSummary, accuracy_hierarchy, accuracy_hierarchy_for_fact_set, accuracy_percent,
    consistency_score, improvement_rate, overall_performance, round_to, summarize_fact_set,
    tally_facts, tests_taken,
};
pub use performance::{PerformanceAnalyzer, open_workspace_store};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("config error: {0}")]
    Config(#[from] examlens_config::ConfigError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("answer key is empty for class {class_id} test {test_number}")]
    EmptyAnswerKey { class_id: String, test_number: u32 },
}
