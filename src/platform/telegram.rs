use std::collections::HashSet;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::platform::IncomingMessage;

/// Header Telegram echoes back from `setWebhook(secret_token=...)`.
pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Telegram rejects texts above 4096 characters; stay below it.
pub const MESSAGE_LIMIT: usize = 4000;

/// Webhook delivery envelope. Only the fields the router reads are modelled.
#[derive(Debug, Deserialize, Default)]
pub struct Update {
    #[serde(default)]
    pub update_id: Option<i64>,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub edited_message: Option<Message>,
}

#[derive(Debug, Deserialize, Default)]
pub struct Message {
    #[serde(default)]
    pub chat: Option<Chat>,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct User {
    pub id: i64,
}

impl Update {
    /// Prefers `message` over `edited_message`. Returns `None` when there is
    /// no chat id or no text to route.
    pub fn into_incoming(self) -> Option<IncomingMessage> {
        let message = self.message.or(self.edited_message)?;
        let chat_id = message.chat?.id;
        let text = message.text?;
        Some(IncomingMessage {
            chat_id: chat_id.to_string(),
            user_id: message
                .from
                .map(|user| user.id.to_string())
                .unwrap_or_default(),
            text,
        })
    }
}

/// A slash command parsed from message text
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Lower-cased, without the leading `/` or any `@botname` suffix
    pub name: String,
    /// Everything after the first run of whitespace
    pub argument: String,
}

pub fn parse_command(text: &str) -> Option<Command> {
    let rest = text.trim().strip_prefix('/')?;
    let (head, argument) = match rest.find(char::is_whitespace) {
        Some(idx) => (&rest[..idx], rest[idx..].trim()),
        None => (rest, ""),
    };
    let name = head.split('@').next().unwrap_or_default().to_lowercase();
    if name.is_empty() {
        return None;
    }
    Some(Command {
        name,
        argument: argument.to_string(),
    })
}

/// Chats permitted to run commands. An empty list allows every chat.
#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    chat_ids: HashSet<String>,
}

impl Allowlist {
    pub fn parse(csv: &str) -> Self {
        Self {
            chat_ids: csv
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn permits(&self, chat_id: &str) -> bool {
        self.chat_ids.is_empty() || self.chat_ids.contains(chat_id)
    }

    pub fn is_empty(&self) -> bool {
        self.chat_ids.is_empty()
    }
}

/// Cut `text` to at most `max_len` bytes on a char boundary, marking the cut with `...`.
pub fn truncate_message(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        return text.to_string();
    }

    let mut end = max_len.saturating_sub(3);
    // Walk back to a valid UTF-8 char boundary so slicing doesn't panic
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    disable_web_page_preview: bool,
}

/// Minimal Bot API client used to answer commands
pub struct TelegramClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl TelegramClient {
    pub fn new(http: reqwest::Client, api_base: &str, token: String) -> Self {
        Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
        }
    }

    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.token);
        let text = truncate_message(text, MESSAGE_LIMIT);
        let request = SendMessageRequest {
            chat_id,
            text: &text,
            disable_web_page_preview: true,
        };

        debug!("Sending Telegram reply to chat {}", chat_id);

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            // The URL embeds the bot token
            .map_err(|e| e.without_url())
            .context("Failed to send request to Telegram")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Telegram API error ({}): {}", status, error_body);
        }

        Ok(())
    }
}
