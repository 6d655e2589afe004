//! Language-model collaborators
//!
//! Three narrow capabilities the pipeline depends on, each its own trait so
//! they can be mocked independently, plus [`OpenAiClient`] implementing all of
//! them against an OpenAI-compatible chat completions endpoint.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use snafu::{OptionExt as _, ResultExt as _, Snafu, ensure};
use tracing::{debug, info};

use crate::USER_AGENT;
use crate::config::{OpenAiConfig, render_prompt};

const LOG_TARGET: &str = "newsrelay::ai";

/// Characters of article text handed to the relevance classifier
pub const CLASSIFIER_TEXT_LIMIT: usize = 3000;

#[allow(clippy::literal_string_with_formatting_args)]
const SAME_STORY_PROMPT: &str = "\
Check whether the following two news titles describe the same story.

New title:
\"{new_title}\"

Existing title:
\"{existing_title}\"

Answer \"Yes\" if they report the same event or announcement, even if they \
are worded differently. Otherwise, answer \"No\".

ONLY reply with \"Yes\" or \"No\".";

#[derive(Debug, Snafu)]
pub enum AiError {
    #[snafu(display("Failed to build HTTP client: {source}"))]
    Client { source: reqwest::Error },
    #[snafu(display("Completion request failed: {source}"))]
    Request { source: reqwest::Error },
    #[snafu(display("Completion request rejected with {status}: {body}"))]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[snafu(display("Completion response had no content"))]
    EmptyCompletion,
}

pub type AiResult<T> = std::result::Result<T, AiError>;

#[async_trait::async_trait]
pub trait ContentClassifier: Send + Sync {
    /// Whether the article is relevant (i.e. not an ad or off-topic)
    async fn is_relevant(&self, text: &str, link: &str) -> AiResult<bool>;
}

#[async_trait::async_trait]
pub trait Summarizer: Send + Sync {
    /// Produce the post text for an article
    async fn summarize(&self, text: &str, link: &str) -> AiResult<String>;
}

#[async_trait::async_trait]
pub trait SimilarityOracle: Send + Sync {
    /// Whether two titles are about the same story
    async fn same_story(&self, new_title: &str, existing_title: &str) -> AiResult<bool>;
}

/// Interpret a yes/no answer
///
/// Case and surrounding punctuation or quotes are ignored; anything that isn't
/// a "yes" counts as "no".
pub fn parse_yes_no(answer: &str) -> bool {
    answer
        .split_whitespace()
        .next()
        .map(|word| word.trim_matches(|c: char| !c.is_alphanumeric()))
        .is_some_and(|word| word.eq_ignore_ascii_case("yes"))
}

/// First `limit` characters of `text`
pub fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

pub struct OpenAiClient {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> AiResult<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()
            .context(ClientSnafu)?;
        Ok(Self { client, config })
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.as_str().trim_end_matches('/')
        )
    }

    /// Send a single user message, returning the trimmed answer
    async fn complete(&self, prompt: String) -> AiResult<String> {
        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user".to_owned(),
                content: Some(prompt),
            }],
        };

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(self.config.api_key.expose())
            .json(&request)
            .send()
            .await
            .context(RequestSnafu)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return StatusSnafu { status, body }.fail();
        }

        let response: ChatCompletionResponse = response.json().await.context(RequestSnafu)?;
        let answer = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .context(EmptyCompletionSnafu)?;

        let answer = answer.trim().to_owned();
        ensure!(!answer.is_empty(), EmptyCompletionSnafu);
        Ok(answer)
    }
}

#[async_trait::async_trait]
impl ContentClassifier for OpenAiClient {
    async fn is_relevant(&self, text: &str, link: &str) -> AiResult<bool> {
        let prompt = render_prompt(
            &self.config.prompts.filter,
            truncate_chars(text, CLASSIFIER_TEXT_LIMIT),
            link,
        );
        let answer = self.complete(prompt).await?;
        info!(target: LOG_TARGET, %link, %answer, "Relevance decision");
        Ok(parse_yes_no(&answer))
    }
}

#[async_trait::async_trait]
impl Summarizer for OpenAiClient {
    async fn summarize(&self, text: &str, link: &str) -> AiResult<String> {
        let prompt = render_prompt(&self.config.prompts.summary, text, link);
        let summary = self.complete(prompt).await?;
        debug!(target: LOG_TARGET, %link, len = summary.len(), "Summary generated");
        Ok(summary)
    }
}

#[async_trait::async_trait]
impl SimilarityOracle for OpenAiClient {
    #[allow(clippy::literal_string_with_formatting_args)]
    async fn same_story(&self, new_title: &str, existing_title: &str) -> AiResult<bool> {
        let prompt = SAME_STORY_PROMPT
            .replace("{new_title}", new_title)
            .replace("{existing_title}", existing_title);
        let answer = self.complete(prompt).await?;
        debug!(target: LOG_TARGET, %new_title, %existing_title, %answer, "Similarity decision");
        Ok(parse_yes_no(&answer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yes_no_answers() {
        for yes in ["yes", "Yes", "YES.", "\"Yes\"", " yes, it is", "**Yes**"] {
            assert!(parse_yes_no(yes), "{yes:?}");
        }
        for no in ["no", "No.", "", "Maybe", "yesterday", "I think yes"] {
            assert!(!parse_yes_no(no), "{no:?}");
        }
    }

    #[test]
    fn truncation_counts_characters() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("short", 3000), "short");
        assert_eq!(truncate_chars("", 3), "");

        let long = "ж".repeat(CLASSIFIER_TEXT_LIMIT + 10);
        assert_eq!(
            truncate_chars(&long, CLASSIFIER_TEXT_LIMIT).chars().count(),
            CLASSIFIER_TEXT_LIMIT
        );
    }

    #[test]
    fn completion_response_parsing() {
        let response: ChatCompletionResponse = serde_json::from_str(
            r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":" Yes "}}]}"#,
        )
        .unwrap();
        assert_eq!(
            response.choices[0].message.content.as_deref().map(str::trim),
            Some("Yes")
        );

        let empty: ChatCompletionResponse = serde_json::from_str(r#"{"id":"x"}"#).unwrap();
        assert!(empty.choices.is_empty());
    }

    #[test]
    fn completion_request_shape() {
        let request = ChatCompletionRequest {
            model: "gpt-4o-mini",
            messages: vec![ChatMessage {
                role: "user".into(),
                content: Some("hi".into()),
            }],
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({
                "model": "gpt-4o-mini",
                "messages": [{"role": "user", "content": "hi"}]
            })
        );
    }
}
