use std::collections::BTreeMap;
use std::sync::Arc;

use examlens_core::FeedbackMap;
use serde_json::{Map, Value};
use tokio::task::JoinSet;

use crate::{InferError, InsightClient};

/// `subject -> parsed insight object`; failed subjects map to `{}`.
pub type InsightFeed = BTreeMap<String, Value>;

#[derive(Debug)]
pub enum SubjectInsightOutcome {
    Success {
        subject: String,
        insight: Map<String, Value>,
    },
    Failure {
        subject: String,
        error: InferError,
    },
}

impl SubjectInsightOutcome {
    pub fn subject(&self) -> &str {
        match self {
            Self::Success { subject, .. } | Self::Failure { subject, .. } => subject,
        }
    }
}

pub fn build_insight_prompt(
    subject: &str,
    chapters: &BTreeMap<String, BTreeMap<String, Vec<String>>>,
) -> Result<String, InferError> {
    let feedback = serde_json::to_string_pretty(chapters)?;
    Ok(format!(
        "You are an experienced teacher reviewing one student's test feedback for a single subject. \
Respond with ONE JSON object only (no markdown, no prose) with exactly these fields: \
strengths (array of string), weaknesses (array of string), recommendations (array of string), summary (string). \
Base every statement on the feedback below.\n\nSubject: {subject}\n\nFeedback by chapter and topic:\n{feedback}"
    ))
}

/// Runs one insight task per subject and waits for all of them.
///
/// Every subject of `feedback` appears in the result. A subject whose task
/// failed, exhausted its attempts or panicked maps to an empty object.
pub async fn generate_insights(client: Arc<InsightClient>, feedback: &FeedbackMap) -> InsightFeed {
    let mut insights: InsightFeed = feedback
        .keys()
        .map(|subject| (subject.clone(), Value::Object(Map::new())))
        .collect();

    for outcome in run_subject_tasks(client, feedback).await {
        match outcome {
            SubjectInsightOutcome::Success { subject, insight } => {
                insights.insert(subject, Value::Object(insight));
            }
            SubjectInsightOutcome::Failure { subject, error } => {
                tracing::warn!(
                    subject = %subject,
                    error = %error,
                    "recording empty insight for subject"
                );
            }
        }
    }

    insights
}

/// Typed per-subject results, in completion order. Panicked tasks are logged
/// and omitted.
pub async fn run_subject_tasks(
    client: Arc<InsightClient>,
    feedback: &FeedbackMap,
) -> Vec<SubjectInsightOutcome> {
    let mut join_set = JoinSet::new();
    let mut outcomes = Vec::with_capacity(feedback.len());

    for (subject, chapters) in feedback {
        let prompt = match build_insight_prompt(subject, chapters) {
            Ok(prompt) => prompt,
            Err(error) => {
                outcomes.push(SubjectInsightOutcome::Failure {
                    subject: subject.clone(),
                    error,
                });
                continue;
            }
        };

        let client = client.clone();
        let subject = subject.clone();
        join_set.spawn(async move {
            match client.request_json_object(&prompt).await {
                Ok(insight) => SubjectInsightOutcome::Success { subject, insight },
                Err(error) => SubjectInsightOutcome::Failure { subject, error },
            }
        });
    }

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(err) => tracing::error!(error = %err, "insight task join error"),
        }
    }

    outcomes
}
