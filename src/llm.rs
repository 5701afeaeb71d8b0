//! Answer Generation - boundary trait plus an OpenAI-compatible client
//!
//! The pipeline treats the generator as an opaque text-completion service:
//! `(question, context) -> text`. Failures surface as structured errors,
//! never as fabricated answers.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// External answer-generation boundary.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// Answer `question`; `context` is present for grounded data questions
    /// and absent for small talk.
    async fn generate(&self, question: &str, context: Option<&str>) -> Result<String>;
}

const GENERAL_GREETINGS: [&str; 8] = [
    "hello",
    "hi",
    "hey",
    "how are you",
    "thanks",
    "thank you",
    "good morning",
    "good evening",
];

/// Greetings and small talk are answered without file context. Matching is
/// anchored at the start of the message so data questions that merely
/// contain a greeting substring ("which", "highest") are not misrouted.
pub fn is_general_message(question: &str) -> bool {
    let normalized: String = question
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    let normalized = normalized.trim();
    GENERAL_GREETINGS.iter().any(|greeting| {
        normalized == *greeting
            || normalized
                .strip_prefix(greeting)
                .is_some_and(|rest| rest.starts_with(' '))
    })
}

const GROUNDED_SYSTEM_PROMPT: &str = "You are a data analysis assistant. \
Use only the provided context to answer. \
Provide a brief reasoning first, then a concise final answer, preferably in one line.";

const GENERAL_SYSTEM_PROMPT: &str =
    "You are a friendly AI assistant. Respond naturally and politely.";

#[derive(Clone)]
pub struct LlmClient {
    api_key: String,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl LlmClient {
    pub fn new(api_key: String, config: &PipelineConfig) -> Self {
        Self {
            api_key,
            base_url: std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            model: std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            timeout: Duration::from_secs(config.external_timeout_secs),
        }
    }

    pub fn from_env(config: &PipelineConfig) -> Self {
        let api_key =
            std::env::var("OPENAI_API_KEY").unwrap_or_else(|_| "dummy-api-key".to_string());
        Self::new(api_key, config)
    }

    async fn call_llm(&self, system_prompt: &str, user_content: &str) -> Result<String> {
        // An unset key means the boundary is misconfigured; surface that as
        // an error rather than inventing an answer.
        if self.api_key == "dummy-api-key" {
            return Err(PipelineError::AnswerGenerationUnavailable(
                "no API key configured; set OPENAI_API_KEY".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| {
                PipelineError::AnswerGenerationUnavailable(format!("client setup failed: {}", e))
            })?;

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_content}
            ],
            "temperature": 0.2
        });

        let response = client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PipelineError::Timeout("answer generation timed out".to_string())
                } else {
                    PipelineError::AnswerGenerationUnavailable(format!("LLM call failed: {}", e))
                }
            })?;

        let response_json: serde_json::Value = response.json().await.map_err(|e| {
            PipelineError::AnswerGenerationUnavailable(format!(
                "failed to parse LLM response: {}",
                e
            ))
        })?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                PipelineError::AnswerGenerationUnavailable(
                    "no content in LLM response".to_string(),
                )
            })?;

        Ok(content.to_string())
    }
}

#[async_trait]
impl AnswerGenerator for LlmClient {
    async fn generate(&self, question: &str, context: Option<&str>) -> Result<String> {
        match context {
            Some(context) => {
                debug!(context_chars = context.len(), "grounded answer request");
                let user_content = format!(
                    "Here is the processed file content:\n{}\n\nQuestion: {}\n",
                    context, question
                );
                self.call_llm(GROUNDED_SYSTEM_PROMPT, &user_content).await
            }
            None => self.call_llm(GENERAL_SYSTEM_PROMPT, question).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting_detection() {
        assert!(is_general_message("Hello there"));
        assert!(is_general_message("thanks!"));
        assert!(is_general_message("How are you?"));
        assert!(!is_general_message("What is the average amount?"));
        // greeting substrings inside data questions do not count
        assert!(!is_general_message("Which category has the highest total?"));
    }

    #[tokio::test]
    async fn test_missing_api_key_errors_instead_of_answering() {
        let client = LlmClient::new("dummy-api-key".to_string(), &PipelineConfig::default());
        let error = client
            .generate("What is the average amount?", Some("table context"))
            .await
            .unwrap_err();
        assert!(matches!(error, PipelineError::AnswerGenerationUnavailable(_)));

        // small talk goes through the same misconfigured boundary
        let error = client.generate("hello", None).await.unwrap_err();
        assert!(matches!(error, PipelineError::AnswerGenerationUnavailable(_)));
    }
}
