use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use examlens_config::InsightConfig;
use serde_json::{Map, Value};
use tokio::time::{sleep, timeout};

use crate::{InferError, TextGenerator, read_env_non_empty};

/// API keys handed out round-robin, one per attempt.
#[derive(Debug, Default)]
pub struct KeyPool {
    keys: Vec<String>,
    cursor: AtomicUsize,
}

impl KeyPool {
    pub fn new(keys: impl IntoIterator<Item = String>) -> Self {
        let mut normalized: Vec<String> = Vec::new();
        for key in keys {
            let key = key.trim();
            if !key.is_empty() && !normalized.iter().any(|existing| existing == key) {
                normalized.push(key.to_owned());
            }
        }

        Self {
            keys: normalized,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Reads every named variable that holds a non-blank value.
    pub fn from_env(names: &[String]) -> Self {
        Self::new(names.iter().filter_map(|name| read_env_non_empty(name)))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn next_key(&self) -> Option<&str> {
        if self.keys.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.keys.len();
        Some(self.keys[index].as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &InsightConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            attempt_timeout: Duration::from_secs(config.attempt_timeout_secs),
            backoff_base_ms: config.backoff_base_ms,
            backoff_max_ms: config.backoff_max_ms,
        }
    }

    /// Delay after the zero-based `attempt` failed.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(32);
        Duration::from_millis(
            self.backoff_base_ms
                .saturating_mul(factor)
                .min(self.backoff_max_ms),
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&InsightConfig::default())
    }
}

/// Text-generation client shared by every subject task.
///
/// Owns the generator, the key pool and a counter of attempts made across all
/// requests. Hand it out behind an `Arc`.
pub struct InsightClient {
    generator: Box<dyn TextGenerator>,
    keys: KeyPool,
    policy: RetryPolicy,
    attempts: AtomicU64,
}

impl InsightClient {
    pub fn new(generator: Box<dyn TextGenerator>, keys: KeyPool, policy: RetryPolicy) -> Self {
        Self {
            generator,
            keys,
            policy,
            attempts: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    pub fn attempts_made(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Submits `prompt` until the response holds a JSON object or the attempt
    /// budget runs out. Generator errors, timeouts and unparsable responses all
    /// consume one attempt.
    pub async fn request_json_object(&self, prompt: &str) -> Result<Map<String, Value>, InferError> {
        let max_attempts = self.policy.max_attempts;
        let mut last_error = String::from("no attempts were made");

        for attempt in 0..max_attempts {
            self.attempts.fetch_add(1, Ordering::Relaxed);
            let key = self.keys.next_key();

            let outcome = timeout(
                self.policy.attempt_timeout,
                self.generator.generate(prompt, key),
            )
            .await;

            let error = match outcome {
                Ok(Ok(text)) => match parse_single_json_object(&text) {
                    Ok(object) => return Ok(object),
                    Err(message) => InferError::InvalidResponse(message),
                },
                Ok(Err(err)) => err,
                Err(_) => InferError::Timeout(self.policy.attempt_timeout.as_secs()),
            };

            tracing::debug!(
                attempt = attempt + 1,
                max_attempts,
                error = %error,
                "insight attempt failed"
            );
            last_error = error.to_string();

            if attempt + 1 < max_attempts {
                sleep(self.policy.backoff(attempt)).await;
            }
        }

        Err(InferError::AttemptsExhausted {
            attempts: max_attempts,
            last_error,
        })
    }
}

/// Extracts the single JSON object in a model response, tolerating code fences
/// and prose around the outermost braces.
pub fn parse_single_json_object(text: &str) -> Result<Map<String, Value>, String> {
    let candidate = strip_code_fence(text);
    let (Some(start), Some(end)) = (candidate.find('{'), candidate.rfind('}')) else {
        return Err("response contains no JSON object".to_owned());
    };
    if end < start {
        return Err("response contains no JSON object".to_owned());
    }

    match serde_json::from_str::<Value>(&candidate[start..=end]) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(_) => Err("response JSON is not an object".to_owned()),
        Err(err) => Err(format!("response JSON is invalid: {err}")),
    }
}

fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_owned();
    }

    let mut lines = trimmed.lines();
    let _fence_line = lines.next();

    let mut body: Vec<&str> = lines.collect();
    if body.last().is_some_and(|line| line.trim() == "```") {
        body.pop();
    }

    body.join("\n").trim().to_owned()
}
