//! Pure performance metrics.
//!
//! Every metric is computed from [`GroupTally`] rows so the same code serves a
//! materialized fact set (via [`tally_facts`]) and either store backend.

use std::collections::{BTreeMap, BTreeSet};

use examlens_core::{
    AccuracyHierarchy, CORRECT_SCORE, GroupLevel, GroupTally, QuestionFact, TallyKey, TestKey,
};
use serde::{Deserialize, Serialize};

const PERCENT_DECIMALS: i32 = 2;
const CONSISTENCY_DECIMALS: i32 = 4;
const MIN_CONSISTENCY_SAMPLES: usize = 2;

/// The four-number summary reported per scope.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PerformanceSummary {
    /// Overall performance divided once more by `tests_taken`.
    pub overall_performance: f64,
    pub tests_taken: u64,
    pub improvement_rate: f64,
    pub consistency_score: f64,
}

impl PerformanceSummary {
    pub fn from_parts(
        overall_performance: f64,
        tests_taken: u64,
        improvement_rate: f64,
        consistency_score: f64,
    ) -> Self {
        let per_test = if tests_taken == 0 {
            0.0
        } else {
            round_to(overall_performance / tests_taken as f64, PERCENT_DECIMALS)
        };

        Self {
            overall_performance: per_test,
            tests_taken,
            improvement_rate,
            consistency_score,
        }
    }

    pub fn as_tuple(&self) -> (f64, u64, f64, f64) {
        (
            self.overall_performance,
            self.tests_taken,
            self.improvement_rate,
            self.consistency_score,
        )
    }
}

/// Groups the attempted questions of a fact set at `level`, sorted by key.
pub fn tally_facts(facts: &[QuestionFact], level: GroupLevel) -> Vec<GroupTally> {
    let mut grouped: BTreeMap<TallyKey, (u64, u64)> = BTreeMap::new();
    for fact in facts.iter().filter(|fact| fact.is_attempted()) {
        let entry = grouped
            .entry(level.key_for(fact.key.test.test_number, &fact.path))
            .or_insert((0, 0));
        if fact.is_correct_attempt() {
            entry.0 += 1;
        }
        entry.1 += 1;
    }

    grouped
        .into_iter()
        .map(|(key, (correct, attempted))| GroupTally {
            key,
            correct,
            attempted,
        })
        .collect()
}

pub fn tests_taken(facts: &[QuestionFact]) -> u64 {
    facts
        .iter()
        .map(|fact| &fact.key.test)
        .collect::<BTreeSet<&TestKey>>()
        .len() as u64
}

/// Score over attempted questions as a percentage of the maximum score.
pub fn overall_performance(tallies: &[GroupTally]) -> f64 {
    let attempted: u64 = tallies.iter().map(|tally| tally.attempted).sum();
    let score: i64 = tallies.iter().map(GroupTally::score).sum();
    let max_score = (CORRECT_SCORE as f64) * attempted as f64;

    round_to(ratio(score as f64, max_score) * 100.0, PERCENT_DECIMALS)
}

/// Mean percent change of the per-test score between consecutive tests.
pub fn improvement_rate(tallies: &[GroupTally]) -> f64 {
    let mut scores: BTreeMap<u32, i64> = BTreeMap::new();
    for tally in tallies {
        *scores.entry(tally.key.test_number).or_insert(0) += tally.score();
    }
    if scores.len() < 2 {
        return 0.0;
    }

    let ordered = scores.into_values().collect::<Vec<_>>();
    let deltas = ordered
        .windows(2)
        .filter(|pair| pair[0] != 0)
        .map(|pair| (pair[1] - pair[0]) as f64 / (pair[0] as f64).abs() * 100.0)
        .collect::<Vec<_>>();

    round_to(mean(&deltas), PERCENT_DECIMALS)
}

/// Mean of `mean / (1 + stddev)` over per-test topic accuracies, for topics
/// seen in at least two tests.
pub fn consistency_score(tallies: &[GroupTally]) -> f64 {
    let mut samples: BTreeMap<(&str, &str), Vec<f64>> = BTreeMap::new();
    for tally in tallies.iter().filter(|tally| tally.attempted > 0) {
        let subject = tally.key.subject.as_deref().unwrap_or_default();
        let topic = tally.key.topic.as_deref().unwrap_or_default();
        samples
            .entry((subject, topic))
            .or_default()
            .push(ratio(tally.correct as f64, tally.attempted as f64));
    }

    let per_topic = samples
        .values()
        .filter(|accuracies| accuracies.len() >= MIN_CONSISTENCY_SAMPLES)
        .map(|accuracies| {
            let average = mean(accuracies);
            average / (1.0 + population_stddev(accuracies, average))
        })
        .collect::<Vec<_>>();

    round_to(mean(&per_topic), CONSISTENCY_DECIMALS)
}

pub fn accuracy_percent(tally: &GroupTally) -> f64 {
    round_to(
        ratio(tally.correct as f64, tally.attempted as f64) * 100.0,
        PERCENT_DECIMALS,
    )
}

/// Builds `subject -> chapter -> {chapter_accuracy, topics}`.
///
/// A topic accuracy is kept only when its chapter already has an entry for the
/// same test.
pub fn accuracy_hierarchy(
    chapter_tallies: &[GroupTally],
    topic_tallies: &[GroupTally],
) -> AccuracyHierarchy {
    let mut hierarchy = AccuracyHierarchy::new();

    for tally in chapter_tallies.iter().filter(|tally| tally.attempted > 0) {
        let (Some(subject), Some(chapter)) = (&tally.key.subject, &tally.key.chapter) else {
            continue;
        };
        hierarchy
            .entry(subject.clone())
            .or_default()
            .entry(chapter.clone())
            .or_default()
            .chapter_accuracy
            .insert(tally.key.test_number, accuracy_percent(tally));
    }

    for tally in topic_tallies.iter().filter(|tally| tally.attempted > 0) {
        let (Some(subject), Some(chapter), Some(topic)) =
            (&tally.key.subject, &tally.key.chapter, &tally.key.topic)
        else {
            continue;
        };

        let Some(entry) = hierarchy
            .get_mut(subject)
            .and_then(|chapters| chapters.get_mut(chapter))
            .filter(|entry| entry.chapter_accuracy.contains_key(&tally.key.test_number))
        else {
            tracing::debug!(
                subject = %subject,
                chapter = %chapter,
                topic = %topic,
                test_number = tally.key.test_number,
                "dropping topic accuracy without a chapter entry"
            );
            continue;
        };

        entry
            .topics
            .entry(topic.clone())
            .or_default()
            .insert(tally.key.test_number, accuracy_percent(tally));
    }

    hierarchy
}

pub fn summarize_fact_set(facts: &[QuestionFact]) -> PerformanceSummary {
    let by_test = tally_facts(facts, GroupLevel::Test);
    PerformanceSummary::from_parts(
        overall_performance(&by_test),
        tests_taken(facts),
        improvement_rate(&by_test),
        consistency_score(&tally_facts(facts, GroupLevel::SubjectTopic)),
    )
}

pub fn accuracy_hierarchy_for_fact_set(facts: &[QuestionFact]) -> AccuracyHierarchy {
    accuracy_hierarchy(
        &tally_facts(facts, GroupLevel::Chapter),
        &tally_facts(facts, GroupLevel::Topic),
    )
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

fn mean(values: &[f64]) -> f64 {
    ratio(values.iter().sum(), values.len() as f64)
}

fn population_stddev(values: &[f64], average: f64) -> f64 {
    let variance = mean(
        &values
            .iter()
            .map(|value| (value - average).powi(2))
            .collect::<Vec<_>>(),
    );
    variance.sqrt()
}
