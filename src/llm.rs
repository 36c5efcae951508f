//! SQL generator adapter
//!
//! Wraps the external text-generation service behind a narrow capability
//! interface so the validator/executor core can be tested against a
//! deterministic fake. One outbound call per `generate`, no retries; retry
//! policy belongs to the caller.

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::GeneratorConfig;
use crate::error::{GenerationFailure, GuardError, Result};
use crate::schema::SchemaSnapshot;

/// How many prior turns are replayed into the prompt.
const HISTORY_WINDOW: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One prior turn of the conversation, most-recent-last.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub content: String,
    /// SQL attached to an assistant turn, replayed for follow-up context.
    pub sql: Option<String>,
}

/// Everything the generator needs for one candidate SQL string. Transient.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub question: &'a str,
    pub history: &'a [ChatTurn],
    pub schema: &'a SchemaSnapshot,
}

/// Outcome of one generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationResult {
    Success {
        /// Candidate SQL, whitespace-normalized, trailing semicolons stripped.
        sql: String,
        tokens_used: u32,
    },
    Failure(GenerationFailure),
}

/// Narrow seam over the text-generation service.
#[async_trait]
pub trait SqlGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest<'_>) -> GenerationResult;
}

/// Chat-completions client for the OpenAI-compatible API.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    config: GeneratorConfig,
}

impl OpenAiGenerator {
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| GuardError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl SqlGenerator for OpenAiGenerator {
    async fn generate(&self, request: &GenerationRequest<'_>) -> GenerationResult {
        let prompt = build_prompt(request);
        debug!(prompt_len = prompt.len(), "calling generation service");

        let body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": system_prompt()},
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.1,
            "max_tokens": 1000
        });

        let response = match self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return GenerationResult::Failure(GenerationFailure::Timeout),
            Err(e) => {
                return GenerationResult::Failure(GenerationFailure::ServiceError(e.to_string()))
            }
        };

        if !response.status().is_success() {
            return GenerationResult::Failure(GenerationFailure::ServiceError(format!(
                "generation service returned HTTP {}",
                response.status()
            )));
        }

        let payload: serde_json::Value = match response.json().await {
            Ok(payload) => payload,
            Err(e) => {
                return GenerationResult::Failure(GenerationFailure::ServiceError(format!(
                    "malformed service response: {e}"
                )))
            }
        };

        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default();
        let tokens_used = payload["usage"]["total_tokens"].as_u64().unwrap_or(0) as u32;

        match extract_sql(content) {
            Some(sql) => {
                info!(tokens_used, "candidate SQL generated");
                GenerationResult::Success { sql, tokens_used }
            }
            None => GenerationResult::Failure(GenerationFailure::EmptyResponse),
        }
    }
}

fn system_prompt() -> String {
    let current_year = Utc::now().year();
    format!(
        "You are an expert SQL developer. Convert natural language questions into safe, \
read-only SQL queries.\n\
\n\
RULES:\n\
1. ONLY generate SELECT statements - no INSERT, UPDATE, DELETE, DROP, etc.\n\
2. Use proper PostgreSQL syntax.\n\
3. Include appropriate WHERE clauses for filtering.\n\
4. Use meaningful column aliases when needed.\n\
5. Add LIMIT clauses for large result sets.\n\
6. Prefix table names with the schema shown in DATABASE SCHEMA.\n\
7. Pay attention to data types.\n\
8. For follow-up questions, use context from previous queries.\n\
9. The current year is {current_year}; interpret 'this year', 'now', etc. accordingly.\n\
10. Return ONLY the SQL query, no explanations or markdown formatting."
    )
}

/// Assemble the user prompt: schema description, recent history, current
/// year, then the question.
fn build_prompt(request: &GenerationRequest<'_>) -> String {
    let mut parts: Vec<String> = Vec::new();

    if !request.schema.is_empty() {
        parts.push("DATABASE SCHEMA:".to_string());
        parts.push(request.schema.describe_for_prompt());
    }

    if !request.history.is_empty() {
        parts.push("CHAT HISTORY:".to_string());
        let start = request.history.len().saturating_sub(HISTORY_WINDOW);
        for turn in &request.history[start..] {
            let role = match turn.role {
                TurnRole::User => "User",
                TurnRole::Assistant => "Assistant",
            };
            let mut line = format!("{role}: {}", turn.content);
            if let Some(sql) = &turn.sql {
                line.push_str(&format!(" [SQL: {sql}]"));
            }
            parts.push(line);
        }
        parts.push(String::new());
    }

    parts.push(format!("CURRENT YEAR: {}", Utc::now().year()));
    parts.push(format!("USER QUERY: {}", request.question));
    parts.push("\nGenerate a SQL query to answer this question:".to_string());

    parts.join("\n")
}

lazy_static! {
    static ref FENCE_RE: Regex =
        Regex::new(r"(?s)```(?:sql)?\s*(.*?)```").expect("fence regex");
    static ref SQL_START_RE: Regex = Regex::new(r"(?i)\b(select|with)\b").expect("start regex");
    static ref WHITESPACE_RE: Regex = Regex::new(r"\s+").expect("whitespace regex");
}

/// Pull a single SQL statement out of free-form model output.
///
/// Prefers a fenced code block, otherwise the text from the first
/// SELECT/WITH keyword onward, otherwise the whole reply (leaving anything
/// non-SELECT for the validator to reject). Whitespace is collapsed and
/// trailing semicolons are stripped for downstream comparison.
fn extract_sql(content: &str) -> Option<String> {
    let body = match FENCE_RE.captures(content) {
        Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or_default(),
        None => content,
    };

    let candidate = match SQL_START_RE.find(body) {
        Some(m) => &body[m.start()..],
        None => body,
    };

    let normalized = WHITESPACE_RE
        .replace_all(candidate.trim(), " ")
        .trim_end_matches(|c: char| c == ';' || c.is_whitespace())
        .to_string();

    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}
