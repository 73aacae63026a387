use examlens_core::{QuestionRecord, RawQuestionRecord, TestKey};
use examlens_store::FactStore;
use serde::Serialize;

use crate::AnalysisError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRecord {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub records: usize,
    pub created: usize,
    pub updated: usize,
    pub misconceptions_attached: usize,
    pub feedback_attached: usize,
    pub skipped: Vec<SkippedRecord>,
}

/// Merges per-question result batches into a [`FactStore`].
///
/// Batches for different tests may be merged concurrently; batches for the
/// same test must be serialized by the caller.
pub struct IngestionMerger<'a> {
    store: &'a dyn FactStore,
}

impl<'a> IngestionMerger<'a> {
    pub fn new(store: &'a dyn FactStore) -> Self {
        Self { store }
    }

    pub fn ingest_batch(
        &self,
        test: &TestKey,
        records: Vec<RawQuestionRecord>,
    ) -> Result<IngestReport, AnalysisError> {
        let mut report = IngestReport {
            records: records.len(),
            ..IngestReport::default()
        };
        if records.is_empty() {
            return Ok(report);
        }

        if records.iter().all(|record| !has_answer_key(record)) {
            return Err(AnalysisError::EmptyAnswerKey {
                class_id: test.class_id.clone(),
                test_number: test.test_number,
            });
        }

        let mut valid = Vec::with_capacity(records.len());
        for (index, record) in records.into_iter().enumerate() {
            match record.validate() {
                Ok(record) => valid.push(record),
                Err(err) => {
                    tracing::warn!(
                        class_id = %test.class_id,
                        test_number = test.test_number,
                        index,
                        error = %err,
                        "skipping invalid question record"
                    );
                    report.skipped.push(SkippedRecord {
                        index,
                        reason: err.to_string(),
                    });
                }
            }
        }

        for record in &valid {
            self.merge_record(test, record, &mut report)?;
        }

        tracing::debug!(
            class_id = %test.class_id,
            test_number = test.test_number,
            created = report.created,
            updated = report.updated,
            skipped = report.skipped.len(),
            backend = self.store.backend_name(),
            "merged question batch"
        );

        Ok(report)
    }

    fn merge_record(
        &self,
        test: &TestKey,
        record: &QuestionRecord,
        report: &mut IngestReport,
    ) -> Result<(), AnalysisError> {
        let upserted = self
            .store
            .upsert_path(&record.to_fact(test), record.test_date.as_deref())?;
        if upserted.created {
            report.created += 1;
        } else {
            report.updated += 1;
        }

        if !record.is_attempted() {
            return Ok(());
        }

        if record.is_correct == Some(false)
            && let Some(misconception) = &record.misconception
            && self.store.attach_misconception(&upserted.key, misconception)?
        {
            report.misconceptions_attached += 1;
        }

        if !record.feedback.is_empty()
            && self
                .store
                .attach_feedback(&upserted.key, &record.feedback)?
        {
            report.feedback_attached += 1;
        }

        Ok(())
    }
}

fn has_answer_key(record: &RawQuestionRecord) -> bool {
    record
        .correct_answer
        .as_deref()
        .is_some_and(|answer| !answer.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use examlens_core::{Scope, parse_batch_json};
    use examlens_store::GraphFactStore;
    use serde_json::json;

    use super::*;

    fn batch(value: serde_json::Value) -> Vec<RawQuestionRecord> {
        serde_json::from_value(value).expect("deserialize batch")
    }

    fn test_key() -> TestKey {
        TestKey::new("class-1", 1).expect("test key")
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        let store = GraphFactStore::new();
        let report = IngestionMerger::new(&store)
            .ingest_batch(&test_key(), Vec::new())
            .expect("ingest empty batch");

        assert_eq!(report, IngestReport::default());
        let counts = store
            .fact_counts(&Scope::class("class-1").expect("scope"))
            .expect("counts");
        assert_eq!(counts.tests, 0);
    }

    #[test]
    fn empty_answer_key_rejects_the_whole_batch() {
        let store = GraphFactStore::new();
        let records = batch(json!([
            { "QuestionNumber": 1, "OptedAnswer": "A" },
            { "QuestionNumber": 2, "OptedAnswer": "B", "CorrectAnswer": "  " }
        ]));

        let err = IngestionMerger::new(&store)
            .ingest_batch(&test_key(), records)
            .expect_err("empty answer key must fail");
        assert!(matches!(err, AnalysisError::EmptyAnswerKey { test_number: 1, .. }));

        let counts = store
            .fact_counts(&Scope::class("class-1").expect("scope"))
            .expect("counts");
        assert_eq!(counts.questions, 0);
    }

    #[test]
    fn invalid_records_are_skipped_and_reported() {
        let store = GraphFactStore::new();
        let records = batch(json!([
            { "QuestionNumber": 1, "CorrectAnswer": "A", "OptedAnswer": "A", "IsCorrect": true },
            { "QuestionNumber": "Q2", "CorrectAnswer": "B" },
            { "CorrectAnswer": "C" }
        ]));

        let report = IngestionMerger::new(&store)
            .ingest_batch(&test_key(), records)
            .expect("ingest");

        assert_eq!(report.records, 3);
        assert_eq!(report.created, 1);
        assert_eq!(
            report.skipped.iter().map(|skip| skip.index).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert!(report.skipped[0].reason.contains("non-numeric"));
    }

    #[test]
    fn attaches_misconceptions_and_feedback_only_for_attempts() {
        let store = GraphFactStore::new();
        let records = parse_batch_json(
            &json!([
                {
                    "Subject": "Math", "Chapter": "Algebra", "Topic": "Linear", "Subtopic": "Basics",
                    "QuestionNumber": 1, "CorrectAnswer": "A", "OptedAnswer": "B", "IsCorrect": false,
                    "Feedback": "Check the sign", "Error_Type": "Conceptual", "Error_Desp": "Sign flip"
                },
                {
                    "Subject": "Math", "Chapter": "Algebra", "Topic": "Linear", "Subtopic": "Basics",
                    "QuestionNumber": 2, "CorrectAnswer": "A", "OptedAnswer": null,
                    "Feedback": "Never shown", "Error_Type": "Conceptual", "Error_Desp": "Unused"
                },
                {
                    "Subject": "Math", "Chapter": "Algebra", "Topic": "Linear", "Subtopic": "Basics",
                    "QuestionNumber": 3, "CorrectAnswer": "C", "OptedAnswer": "C", "IsCorrect": true,
                    "Error_Type": "Conceptual", "Error_Desp": "Ignored for correct answers"
                },
                {
                    "Subject": "Math", "Chapter": "Algebra", "Topic": "Linear", "Subtopic": "Basics",
                    "QuestionNumber": 4, "CorrectAnswer": "D", "OptedAnswer": "A", "IsCorrect": false,
                    "Feedback": "   "
                }
            ])
            .to_string(),
        )
        .expect("parse batch");

        let report = IngestionMerger::new(&store)
            .ingest_batch(&test_key(), records)
            .expect("ingest");

        assert_eq!(report.created, 4);
        assert_eq!(report.misconceptions_attached, 1);
        // question 1 with its text, question 3 with the default
        assert_eq!(report.feedback_attached, 2);

        let scope = Scope::class("class-1").expect("scope");
        let feedback = store.feedback_map(&scope).expect("feedback map");
        assert_eq!(
            feedback["Math"]["Algebra"]["Linear"],
            vec!["Check the sign".to_owned(), "No Feedback Available".to_owned()]
        );
    }

    #[test]
    fn reingesting_updates_instead_of_duplicating() {
        let store = GraphFactStore::new();
        let merger = IngestionMerger::new(&store);
        let records = batch(json!([
            {
                "Subject": "Math", "QuestionNumber": 1, "CorrectAnswer": "A",
                "OptedAnswer": "B", "IsCorrect": false,
                "Feedback": "Recheck", "Error_Type": "Slip", "Error_Desp": "Misread"
            }
        ]));

        let first = merger
            .ingest_batch(&test_key(), records.clone())
            .expect("first ingest");
        let second = merger.ingest_batch(&test_key(), records).expect("second ingest");

        assert_eq!((first.created, first.updated), (1, 0));
        assert_eq!((second.created, second.updated), (0, 1));
        assert_eq!(second.misconceptions_attached, 0);
        assert_eq!(second.feedback_attached, 0);
    }
}
