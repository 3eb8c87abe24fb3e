use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{ParseMode, UpdateKind};

/// Transport error-kind taxonomy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportErrorKind {
    RateLimited { retry_after_secs: u64 },
    Unauthorized,
    ChatNotFound,
    PayloadTooLarge,
    Transient,
    Other,
}

#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub message_id: i32,
}

/// One inbound message, normalized from the transport's own update shape.
/// Only the `/coin <symbol>` entry point is parsed from `text` elsewhere;
/// everything else here is for the audit log.
#[derive(Debug, Clone)]
pub struct Update {
    pub update_id: i32,
    pub chat_id: i64,
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub text: String,
}

/// Messaging-platform collaborator contract, modeled as a trait so
/// the Scheduler can be exercised against a fake transport in tests.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        markdown: bool,
    ) -> Result<SendOutcome, TransportErrorKind>;

    async fn get_updates(&self, offset: i32) -> Result<Vec<Update>, TransportErrorKind>;
}

/// Concrete implementation wrapping `teloxide::Bot`.
pub struct TeloxideTransport {
    bot: Bot,
}

impl TeloxideTransport {
    pub fn new(token: &str) -> Self {
        Self { bot: Bot::new(token) }
    }
}

#[async_trait]
impl Transport for TeloxideTransport {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        markdown: bool,
    ) -> Result<SendOutcome, TransportErrorKind> {
        let mut request = self.bot.send_message(ChatId(chat_id), text);
        if markdown {
            request = request.parse_mode(ParseMode::Markdown);
        }

        match request.send().await {
            Ok(message) => Ok(SendOutcome { message_id: message.id.0 }),
            Err(err) => Err(classify_error(&err)),
        }
    }

    async fn get_updates(&self, offset: i32) -> Result<Vec<Update>, TransportErrorKind> {
        let updates = self
            .bot
            .get_updates()
            .offset(offset)
            .timeout(10)
            .send()
            .await
            .map_err(|e| classify_error(&e))?;

        Ok(updates
            .into_iter()
            .filter_map(|u| match u.kind {
                UpdateKind::Message(message) => {
                    let text = message.text()?.to_string();
                    let from = message.from()?;
                    Some(Update {
                        update_id: u.id as i32,
                        chat_id: message.chat.id.0,
                        user_id: from.id.0 as i64,
                        username: from.username.clone(),
                        first_name: Some(from.first_name.clone()),
                        text,
                    })
                }
                _ => None,
            })
            .collect())
    }
}

/// Maps a provider error onto the `kind` taxonomy. Matched on the
/// error text rather than internal enum shape, since the client library's
/// error variants evolve across minor releases and the digest pipeline only
/// needs the coarse classification.
fn classify_error(err: &teloxide::RequestError) -> TransportErrorKind {
    let message = err.to_string().to_lowercase();
    if let Some(secs) = message
        .find("retry after")
        .and_then(|idx| message[idx..].split_whitespace().nth(2))
        .and_then(|s| s.trim_matches(|c: char| !c.is_ascii_digit()).parse::<u64>().ok())
    {
        return TransportErrorKind::RateLimited { retry_after_secs: secs };
    }
    if message.contains("too many requests") {
        return TransportErrorKind::RateLimited { retry_after_secs: 30 };
    }
    if message.contains("unauthorized") || message.contains("forbidden") {
        return TransportErrorKind::Unauthorized;
    }
    if message.contains("chat not found") {
        return TransportErrorKind::ChatNotFound;
    }
    if message.contains("message is too long") || message.contains("payload too large") {
        return TransportErrorKind::PayloadTooLarge;
    }
    if message.contains("timed out") || message.contains("connection") || message.contains("network") {
        return TransportErrorKind::Transient;
    }
    TransportErrorKind::Other
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTransport;

    #[tokio::test]
    async fn fake_transport_replays_scripted_outcomes_in_order() {
        let fake = FakeTransport::new(vec![
            Err(TransportErrorKind::Transient),
            Ok(SendOutcome { message_id: 1 }),
        ]);
        assert!(fake.send_message(1, "hi", true).await.is_err());
        assert!(fake.send_message(1, "hi", true).await.is_ok());
        assert_eq!(fake.calls(), 2);
    }
}
