//! Health chat: history analysis, reply generation and cleanup.

use crate::error::ContentError;
use crate::prompt::{ChatPrompt, Nonce};
use crate::service::{GenerationConfig, GenerationRequest, GenerativeService, CHAT_TIMEOUT};
use ager_core::FeatureDescriptor;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Number of trailing history entries inspected for recent topics.
const RECENT_WINDOW: usize = 3;
const TITLE_MAX_CHARS: usize = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    #[serde(alias = "ai", alias = "assistant", alias = "model")]
    Bot,
}

/// One entry of client-supplied conversation history.
///
/// Only an explicit `user` marks a user turn; a missing or unknown type
/// still occupies a slot in the history as a non-user turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    #[serde(rename = "type", alias = "role", default = "non_user", deserialize_with = "lenient_speaker")]
    pub speaker: Speaker,
    #[serde(default, deserialize_with = "lenient_content")]
    pub content: String,
}

fn non_user() -> Speaker {
    Speaker::Bot
}

fn lenient_speaker<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Speaker, D::Error> {
    Ok(Speaker::deserialize(Value::deserialize(deserializer)?).unwrap_or(Speaker::Bot))
}

fn lenient_content<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        _ => String::new(),
    })
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { speaker: Speaker::User, content: content.into() }
    }

    pub fn bot(content: impl Into<String>) -> Self {
        Self { speaker: Speaker::Bot, content: content.into() }
    }
}

/// Lower-cased user messages among the last few history entries.
pub fn recent_topics(history: &[ChatTurn]) -> Vec<String> {
    let start = history.len().saturating_sub(RECENT_WINDOW);
    history[start..]
        .iter()
        .filter(|turn| turn.speaker == Speaker::User)
        .map(|turn| turn.content.trim().to_lowercase())
        .filter(|topic| !topic.is_empty())
        .collect()
}

/// True when the message and a recent topic contain one another.
pub fn is_repetitive(message: &str, topics: &[String]) -> bool {
    let message = message.trim().to_lowercase();
    if message.is_empty() {
        return false;
    }
    topics
        .iter()
        .any(|topic| topic.contains(&message) || message.contains(topic.as_str()))
}

/// Strip the markdown the service tends to emit despite instructions.
pub fn clean_markdown(text: &str) -> String {
    let mut lines = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim_start();
        let unheaded = trimmed.trim_start_matches('#');
        let line = if unheaded.len() != trimmed.len() {
            unheaded.trim_start()
        } else {
            line.trim_end()
        };
        let line = match line.trim_start().strip_prefix("* ") {
            Some(rest) => format!("- {rest}"),
            None => line.to_string(),
        };
        lines.push(line.replace("**", "").replace("__", ""));
    }

    let mut out = String::new();
    let mut blank_run = 0;
    for line in lines {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(&line);
        out.push('\n');
    }
    out.trim().to_string()
}

/// Title for a new conversation: the first message, shortened.
pub fn conversation_title(first_message: &str) -> String {
    let message = first_message.trim();
    if message.is_empty() {
        return "New chat".to_string();
    }
    if message.chars().count() <= TITLE_MAX_CHARS {
        return message.to_string();
    }
    let mut title: String = message.chars().take(TITLE_MAX_CHARS).collect();
    title.push('…');
    title
}

/// A validated chat request.
#[derive(Debug, Clone)]
pub struct ChatRequest<'a> {
    pub message: &'a str,
    pub age: f64,
    pub age_group: &'a str,
    pub history: &'a [ChatTurn],
    pub parenting_mode: bool,
    pub features: Option<&'a FeatureDescriptor>,
}

/// Produce a cleaned chat reply. Service failures are returned as-is.
pub async fn reply(service: &dyn GenerativeService, request: &ChatRequest<'_>) -> Result<String, ContentError> {
    let topics = recent_topics(request.history);
    let repetitive = is_repetitive(request.message, &topics);
    let prompt = ChatPrompt {
        message: request.message,
        age: request.age,
        age_group: request.age_group,
        features: request.features,
        recent_topics: &topics,
        repetitive,
        parenting_mode: request.parenting_mode,
    }
    .render(&Nonce::fresh());

    tracing::debug!(
        age = request.age,
        topics = topics.len(),
        repetitive,
        parenting_mode = request.parenting_mode,
        "generating chat reply"
    );

    let raw = service
        .generate(&GenerationRequest::text(prompt, GenerationConfig::chat(), CHAT_TIMEOUT))
        .await?;
    Ok(clean_markdown(&raw))
}
