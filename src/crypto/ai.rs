use crate::error::{DigestError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const COMMENTARY_TIMEOUT: Duration = Duration::from_secs(3);
const WORD_CAP: usize = 80;

/// Chat-completion commentary contract. Modeled as a trait
/// so the Composer can fall back to a deterministic template on failure.
#[async_trait]
pub trait AiCommentaryProvider: Send + Sync {
    async fn commentary(&self, prompt: &str) -> Result<String>;
}

pub struct HttpAiProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpAiProvider {
    pub fn new(client: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f64,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[async_trait]
impl AiCommentaryProvider for HttpAiProvider {
    async fn commentary(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: "gpt-4o-mini",
            temperature: 0.3,
            messages: vec![ChatMessage { role: "user", content: prompt }],
        };

        let fut = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send();

        let resp = tokio::time::timeout(COMMENTARY_TIMEOUT, fut)
            .await
            .map_err(|_| DigestError::UpstreamTransient("AI provider: timed out".into()))?
            .map_err(|e| DigestError::UpstreamTransient(format!("AI provider: {e}")))?;

        if !resp.status().is_success() {
            return Err(DigestError::UpstreamUnavailable(format!(
                "AI provider: HTTP {}",
                resp.status()
            )));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| DigestError::UpstreamUnavailable(format!("AI provider: bad payload: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| DigestError::UpstreamUnavailable("AI provider: empty response".into()))?;

        Ok(truncate_words(&content, WORD_CAP))
    }
}

/// Enforces the 80-word cap by truncation if the model exceeds it.
pub fn truncate_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        text.trim().to_string()
    } else {
        words[..max_words].join(" ") + "…"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_words_leaves_short_text_untouched() {
        assert_eq!(truncate_words("short and sweet", 80), "short and sweet");
    }

    #[test]
    fn truncate_words_caps_long_text() {
        let long = (0..100).map(|i| i.to_string()).collect::<Vec<_>>().join(" ");
        let truncated = truncate_words(&long, 80);
        assert_eq!(truncated.split_whitespace().count(), 80);
        assert!(truncated.ends_with('…'));
    }
}
