use std::env;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use examlens_config::{InsightProviderKind, ensure_workspace_config};
use serde_json::{Value, json};
use thiserror::Error;

mod client;
mod feed;

pub use client::{InsightClient, KeyPool, RetryPolicy, parse_single_json_object};
pub use feed::{
    InsightFeed, SubjectInsightOutcome, build_insight_prompt, generate_insights,
    run_subject_tasks,
};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const GEMINI_DEFAULT_MODEL: &str = "gemini-2.0-flash";
const MOCK_MODEL_NAME: &str = "mock";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InsightOverrides {
    pub provider: Option<InsightProviderKind>,
    pub model: Option<String>,
    pub endpoint: Option<String>,
    pub api_key_envs: Option<Vec<String>>,
    pub max_attempts: Option<u32>,
}

pub struct LoadedInsightClient {
    pub client: Arc<InsightClient>,
    pub provider_name: String,
    pub model_name: String,
}

#[derive(Debug, Error)]
pub enum InferError {
    #[error("missing API key in {0}")]
    MissingApiKey(String),
    #[error("config load failed: {0}")]
    Config(#[from] examlens_config::ConfigError),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("response decoding failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid model response: {0}")]
    InvalidResponse(String),
    #[error("attempt timed out after {0}s")]
    Timeout(u64),
    #[error("no usable response after {attempts} attempts: {last_error}")]
    AttemptsExhausted { attempts: u32, last_error: String },
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, api_key: Option<&str>) -> Result<String, InferError>;
}

/// Offline generator returning a fixed, well-formed insight.
#[derive(Debug, Default, Clone, Copy)]
pub struct MockGenerator;

#[async_trait]
impl TextGenerator for MockGenerator {
    async fn generate(&self, prompt: &str, _api_key: Option<&str>) -> Result<String, InferError> {
        let subject = prompt
            .lines()
            .find_map(|line| line.strip_prefix("Subject: "))
            .unwrap_or("this subject");

        Ok(json!({
            "strengths": [],
            "weaknesses": [],
            "recommendations": [format!("Review the feedback collected for {subject}.")],
            "summary": format!("Mock insight for {subject}."),
        })
        .to_string())
    }
}

#[derive(Debug, Clone)]
pub struct GeminiGenerator {
    client: reqwest::Client,
    model: String,
    api_base: String,
}

impl GeminiGenerator {
    pub fn new(model: Option<String>, endpoint: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            model: normalize_optional(model).unwrap_or_else(|| GEMINI_DEFAULT_MODEL.to_owned()),
            api_base: normalize_optional(endpoint)
                .map(|endpoint| endpoint.trim_end_matches('/').to_owned())
                .unwrap_or_else(|| GEMINI_API_BASE.to_owned()),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint_url(&self, api_key: &str) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.api_base, self.model, api_key
        )
    }
}

#[async_trait]
impl TextGenerator for GeminiGenerator {
    async fn generate(&self, prompt: &str, api_key: Option<&str>) -> Result<String, InferError> {
        let api_key = api_key.ok_or_else(|| InferError::MissingApiKey("key pool".to_owned()))?;
        let body = json!({
            "contents": [
                {
                    "parts": [
                        {
                            "text": prompt
                        }
                    ]
                }
            ],
            "generationConfig": {
                "responseMimeType": "application/json",
                "temperature": 0.2
            }
        });

        let response_value: Value = self
            .client
            .post(self.endpoint_url(api_key))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        extract_gemini_text_part(&response_value).map(|text| text.to_owned())
    }
}

/// Builds the insight client from workspace config plus overrides.
///
/// `auto` selects Gemini when any configured key variable is set and falls back
/// to the mock generator otherwise.
pub fn load_insight_client(
    workspace_root: impl AsRef<Path>,
    overrides: InsightOverrides,
) -> Result<LoadedInsightClient, InferError> {
    let mut config = ensure_workspace_config(workspace_root)?.insights;
    if let Some(max_attempts) = overrides.max_attempts {
        config.max_attempts = max_attempts;
    }

    let selected_provider = overrides.provider.unwrap_or(config.provider);
    let selected_model = first_non_empty(overrides.model, config.model.clone());
    let selected_endpoint = first_non_empty(overrides.endpoint, config.endpoint.clone());
    let key_envs = overrides
        .api_key_envs
        .filter(|envs| envs.iter().any(|name| !name.trim().is_empty()))
        .unwrap_or_else(|| config.api_key_envs.clone());

    let policy = RetryPolicy::from_config(&config);
    let keys = KeyPool::from_env(&key_envs);

    let use_gemini = match selected_provider {
        InsightProviderKind::Auto => !keys.is_empty(),
        InsightProviderKind::Mock => false,
        InsightProviderKind::Gemini => {
            if keys.is_empty() {
                return Err(InferError::MissingApiKey(key_envs.join(", ")));
            }
            true
        }
    };

    let loaded = if use_gemini {
        let generator = GeminiGenerator::new(selected_model, selected_endpoint);
        let model_name = generator.model().to_owned();
        LoadedInsightClient {
            client: Arc::new(InsightClient::new(Box::new(generator), keys, policy)),
            provider_name: InsightProviderKind::Gemini.as_str().to_owned(),
            model_name,
        }
    } else {
        LoadedInsightClient {
            client: Arc::new(InsightClient::new(Box::new(MockGenerator), keys, policy)),
            provider_name: InsightProviderKind::Mock.as_str().to_owned(),
            model_name: MOCK_MODEL_NAME.to_owned(),
        }
    };

    tracing::debug!(
        provider = %loaded.provider_name,
        model = %loaded.model_name,
        keys = loaded.client.key_count(),
        max_attempts = policy.max_attempts,
        "loaded insight client"
    );
    Ok(loaded)
}

fn extract_gemini_text_part(response: &Value) -> Result<&str, InferError> {
    response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .and_then(|parts| parts.first())
        .and_then(|part| part.get("text"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            InferError::InvalidResponse("missing candidates[0].content.parts[0].text".to_owned())
        })
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn first_non_empty(left: Option<String>, right: Option<String>) -> Option<String> {
    normalize_optional(left).or_else(|| normalize_optional(right))
}

pub(crate) fn read_env_non_empty(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use examlens_core::FeedbackMap;
    use tempfile::tempdir;

    use super::*;

    fn unique_env_name(label: &str) -> String {
        format!(
            "EXAMLENS_TEST_{label}_{}_{}",
            std::process::id(),
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("time")
                .as_nanos()
        )
    }

    #[tokio::test]
    async fn mock_generator_returns_a_parsable_object() {
        let text = MockGenerator
            .generate("intro\n\nSubject: Math\n\nFeedback", None)
            .await
            .expect("mock response");
        let object = parse_single_json_object(&text).expect("object");
        assert_eq!(object["summary"], "Mock insight for Math.");
    }

    #[test]
    fn extract_gemini_text_part_reads_first_candidate() {
        let response = json!({
            "candidates": [
                { "content": { "parts": [ { "text": "{\"summary\": \"ok\"}" } ] } }
            ]
        });
        assert_eq!(
            extract_gemini_text_part(&response).expect("text"),
            "{\"summary\": \"ok\"}"
        );
        assert!(matches!(
            extract_gemini_text_part(&json!({ "candidates": [] })),
            Err(InferError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn gemini_generator_requires_a_key() {
        let generator = GeminiGenerator::new(None, Some("http://127.0.0.1:9/".to_owned()));
        assert_eq!(generator.model(), GEMINI_DEFAULT_MODEL);
        assert_eq!(
            generator.endpoint_url("abc"),
            "http://127.0.0.1:9/models/gemini-2.0-flash:generateContent?key=abc"
        );
        assert!(matches!(
            generator.generate("prompt", None).await,
            Err(InferError::MissingApiKey(_))
        ));
    }

    #[test]
    fn load_insight_client_auto_chooses_mock_when_keys_missing() {
        let temp = tempdir().expect("tempdir");

        let loaded = load_insight_client(
            temp.path(),
            InsightOverrides {
                api_key_envs: Some(vec![unique_env_name("MISSING")]),
                ..InsightOverrides::default()
            },
        )
        .expect("load client");

        assert_eq!(loaded.provider_name, InsightProviderKind::Mock.as_str());
        assert_eq!(loaded.model_name, "mock");
        assert_eq!(loaded.client.policy().max_attempts, 10);
        assert!(temp.path().join(".examlens/config.toml").exists());
    }

    #[test]
    fn load_insight_client_auto_chooses_gemini_when_key_present() {
        let temp = tempdir().expect("tempdir");
        let first = unique_env_name("KEY_A");
        let second = unique_env_name("KEY_B");

        // SAFETY: test-scoped environment variables with unique names.
        unsafe {
            env::set_var(&first, "key-a");
            env::set_var(&second, "key-b");
        }

        let loaded = load_insight_client(
            temp.path(),
            InsightOverrides {
                api_key_envs: Some(vec![first.clone(), second.clone()]),
                max_attempts: Some(4),
                ..InsightOverrides::default()
            },
        )
        .expect("load client");

        assert_eq!(loaded.provider_name, InsightProviderKind::Gemini.as_str());
        assert_eq!(loaded.model_name, GEMINI_DEFAULT_MODEL);
        assert_eq!(loaded.client.key_count(), 2);
        assert_eq!(loaded.client.policy().max_attempts, 4);

        // SAFETY: cleanup of test-scoped environment variables.
        unsafe {
            env::remove_var(first);
            env::remove_var(second);
        }
    }

    #[test]
    fn load_insight_client_gemini_requires_a_key() {
        let temp = tempdir().expect("tempdir");
        let result = load_insight_client(
            temp.path(),
            InsightOverrides {
                provider: Some(InsightProviderKind::Gemini),
                api_key_envs: Some(vec![unique_env_name("ABSENT")]),
                ..InsightOverrides::default()
            },
        );
        assert!(matches!(result, Err(InferError::MissingApiKey(_))));
    }

    #[tokio::test]
    async fn mock_client_produces_an_insight_per_subject() {
        let temp = tempdir().expect("tempdir");
        let loaded = load_insight_client(
            temp.path(),
            InsightOverrides {
                provider: Some(InsightProviderKind::Mock),
                ..InsightOverrides::default()
            },
        )
        .expect("load client");

        let mut feedback = FeedbackMap::new();
        for subject in ["Math", "Physics"] {
            feedback
                .entry(subject.to_owned())
                .or_default()
                .entry("Chapter".to_owned())
                .or_default()
                .insert("Topic".to_owned(), vec!["Revise".to_owned()]);
        }

        let insights = generate_insights(loaded.client.clone(), &feedback).await;
        assert_eq!(insights.len(), 2);
        assert_eq!(insights["Physics"]["summary"], "Mock insight for Physics.");
        assert_eq!(loaded.client.attempts_made(), 2);
    }
}
