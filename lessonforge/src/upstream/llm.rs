//! OpenAI-compatible chat completions client for summaries and quiz questions.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::http::{request_error, status_error};
use super::{QuestionGenerator, RetryPolicy, SummaryGenerator, call_upstream};
use crate::domain::Question;
use crate::{Error, Result};

const SUMMARY_CALL: &str = "summary_generation";
const QUESTION_CALL: &str = "question_generation";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionsConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Number of questions requested per quiz.
    #[serde(default = "default_questions_per_quiz")]
    pub questions_per_quiz: usize,
    /// Target length of a derived summary, in words.
    #[serde(default = "default_summary_words")]
    pub summary_words: usize,
    /// Quota service name reported in errors.
    #[serde(default = "default_service")]
    pub service: String,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_questions_per_quiz() -> usize {
    10
}

fn default_summary_words() -> usize {
    250
}

fn default_service() -> String {
    "text_generation".to_string()
}

impl Default for ChatCompletionsConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            model: default_model(),
            temperature: default_temperature(),
            questions_per_quiz: default_questions_per_quiz(),
            summary_words: default_summary_words(),
            service: default_service(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
}

/// Question as models tend to emit it.
#[derive(Debug, Deserialize)]
struct RawQuestion {
    #[serde(default)]
    question: String,
    #[serde(default, alias = "correct_answer", alias = "correctAnswer")]
    answer: String,
    #[serde(default, alias = "choices")]
    options: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum QuestionPayload {
    Wrapped { questions: Vec<RawQuestion> },
    Bare(Vec<RawQuestion>),
}

/// Implements both text generation collaborators over one endpoint.
pub struct ChatCompletionsClient {
    client: reqwest::Client,
    config: ChatCompletionsConfig,
    timeout: Duration,
    retry: RetryPolicy,
}

impl ChatCompletionsClient {
    pub fn new(
        client: reqwest::Client,
        config: ChatCompletionsConfig,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            config,
            timeout,
            retry,
        }
    }

    async fn complete_once(
        &self,
        call: &'static str,
        system: &str,
        user: &str,
        json_output: bool,
    ) -> Result<String> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let mut body = json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });
        if json_output {
            body["response_format"] = json!({"type": "json_object"});
        }

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error(call, e))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| request_error(call, e))?;
        if !status.is_success() {
            return Err(status_error(&self.config.service, call, status, &text));
        }
        extract_content(call, &text)
    }

    async fn complete(
        &self,
        call: &'static str,
        system: &str,
        user: &str,
        json_output: bool,
    ) -> Result<String> {
        call_upstream(call, self.timeout, &self.retry, || {
            self.complete_once(call, system, user, json_output)
        })
        .await
    }
}

#[async_trait]
impl SummaryGenerator for ChatCompletionsClient {
    async fn summarize(&self, text: &str, topic: &str) -> Result<String> {
        debug!(call = SUMMARY_CALL, topic, "Requesting summary");
        let system = format!(
            "You summarize lecture transcripts for study. Write a factual summary of at most {} words. \
             Keep definitions, key terms and worked examples. Output plain text only.",
            self.config.summary_words
        );
        let user = format!("Topic: {topic}\n\nTranscript:\n{text}");
        let summary = self.complete(SUMMARY_CALL, &system, &user, false).await?;
        let summary = summary.trim();
        if summary.is_empty() {
            return Err(Error::upstream(SUMMARY_CALL, "empty summary"));
        }
        Ok(summary.to_string())
    }
}

#[async_trait]
impl QuestionGenerator for ChatCompletionsClient {
    async fn generate(&self, text: &str, topic: &str) -> Result<Vec<Question>> {
        debug!(call = QUESTION_CALL, topic, "Requesting quiz questions");
        let system = format!(
            "You write multiple-choice quiz questions. Return a JSON object \
             {{\"questions\": [{{\"question\": string, \"answer\": string, \"options\": [string]}}]}} \
             with exactly {} questions. Each question has four options and the answer is one of them.",
            self.config.questions_per_quiz
        );
        let user = format!("Topic: {topic}\n\nMaterial:\n{text}");
        let content = self.complete(QUESTION_CALL, &system, &user, true).await?;
        parse_questions(&content)
    }
}

fn extract_content(call: &str, body: &str) -> Result<String> {
    let response: CompletionResponse = serde_json::from_str(body)?;
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| Error::upstream(call, "completion returned no content"))
}

/// Parse generator output, tolerating a fenced code block around the JSON.
fn parse_questions(content: &str) -> Result<Vec<Question>> {
    let payload: QuestionPayload = serde_json::from_str(strip_code_fence(content))
        .map_err(|e| Error::upstream(QUESTION_CALL, format!("malformed questions: {e}")))?;
    let raw = match payload {
        QuestionPayload::Wrapped { questions } => questions,
        QuestionPayload::Bare(questions) => questions,
    };
    Ok(raw
        .into_iter()
        .map(|q| Question::new(q.question, q.answer, q.options))
        .collect())
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
