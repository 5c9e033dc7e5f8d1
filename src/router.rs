use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::github::{DispatchEvent, GithubClient};
use crate::platform::telegram::{
    parse_command, truncate_message, Allowlist, Command, TelegramClient, Update,
};
use crate::platform::IncomingMessage;
use crate::products::{parse_scan_argument, smoke_products, ScanArgument};

/// Actions variable holding the worker's strategy profile
pub const PROFILE_VARIABLE: &str = "STRATEGY_PROFILE";

pub const PROFILES: [&str; 3] = ["conservative", "balanced", "aggressive"];

/// Upstream error bodies can be whole HTML pages; keep what reaches the chat short.
const ERROR_DETAIL_LIMIT: usize = 220;

const DEFAULT_LAST_LIMIT: i64 = 5;
const MAX_LAST_LIMIT: i64 = 10;

const NOT_CONFIGURED: &str = "⚙️ Dispatch backend is not configured \
    (GITHUB_DISPATCH_TOKEN, GITHUB_OWNER and GITHUB_REPO are required). Nothing was queued.";

const NOT_AUTHORIZED: &str = "⛔ This chat is not authorized to use this bot.";

/// JSON body returned to Telegram. The HTTP status is always 200 once the
/// request is authenticated, so failures only show up here.
#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct WebhookOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub ignored: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub denied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WebhookOutcome {
    pub fn ignored() -> Self {
        Self {
            ok: true,
            ignored: true,
            ..Default::default()
        }
    }

    fn denied() -> Self {
        Self {
            ok: true,
            denied: true,
            ..Default::default()
        }
    }

    fn handled(command: &str) -> Self {
        Self {
            ok: true,
            command: Some(command.to_string()),
            ..Default::default()
        }
    }
}

#[derive(Debug, PartialEq)]
enum ProfileAction {
    Show,
    Set(&'static str),
    Invalid(String),
}

fn parse_profile_argument(argument: &str) -> ProfileAction {
    let token = argument
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_lowercase();
    match token.as_str() {
        "" | "show" | "get" | "status" => ProfileAction::Show,
        value => match PROFILES.iter().find(|p| **p == value) {
            Some(profile) => ProfileAction::Set(*profile),
            None => ProfileAction::Invalid(value.to_string()),
        },
    }
}

/// Single-line, bounded rendering of an error chain.
fn error_details(e: &anyhow::Error) -> String {
    let flat = format!("{:#}", e)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    truncate_message(&flat, ERROR_DETAIL_LIMIT)
}

fn parse_last_limit(argument: &str) -> i64 {
    argument
        .split_whitespace()
        .next()
        .and_then(|t| t.parse::<i64>().ok())
        .unwrap_or(DEFAULT_LAST_LIMIT)
        .clamp(1, MAX_LAST_LIMIT)
}

pub fn help_text() -> String {
    "🤖 Available commands:\n\
     /scan [json] - queue a scan, optionally with a product or a list of products\n\
     /smoke - queue a small fixed test scan\n\
     /status - ask the worker for its status\n\
     /last [n] - last n saved opportunities (1-10, default 5)\n\
     /profile [show|conservative|balanced|aggressive] - read or change the strategy profile\n\
     /rules - how scans and profiles work\n\
     /id - show this chat and user id\n\
     /help - this message"
        .to_string()
}

fn rules_text(default_profile: &str) -> String {
    format!(
        "📏 Rules:\n\
         - Every /scan, /smoke, /status and /last is queued as a worker job; results arrive here when it finishes.\n\
         - /scan accepts a JSON object or array (code fences allowed). Each product needs a title and a positive price_eur.\n\
         - Profiles: conservative keeps only wide spreads, balanced is the default trade-off, aggressive accepts thinner margins.\n\
         - The profile is shared by everyone using the bot and applies from the next scan (default: {}).",
        default_profile
    )
}

/// Routes one webhook delivery. Built per request; holds no state between calls.
pub struct CommandRouter<'a> {
    config: &'a Config,
    http: reqwest::Client,
    telegram: TelegramClient,
    allowlist: Allowlist,
    request_id: Uuid,
}

impl<'a> CommandRouter<'a> {
    pub fn new(config: &'a Config, http: reqwest::Client, bot_token: String, request_id: Uuid) -> Self {
        let telegram = TelegramClient::new(http.clone(), &config.telegram.api_base, bot_token);
        Self {
            config,
            http,
            telegram,
            allowlist: Allowlist::parse(&config.telegram.allowed_chat_ids),
            request_id,
        }
    }

    /// Never fails: errors are reported to the chat and reflected in the outcome.
    pub async fn route(&self, update: Update) -> WebhookOutcome {
        let Some(incoming) = update.into_incoming() else {
            return WebhookOutcome::ignored();
        };
        let Some(command) = parse_command(&incoming.text) else {
            return WebhookOutcome::ignored();
        };

        if !self.allowlist.permits(&incoming.chat_id) {
            warn!(
                "Rejected /{} from unauthorized chat {}",
                command.name, incoming.chat_id
            );
            if let Err(e) = self
                .telegram
                .send_message(&incoming.chat_id, NOT_AUTHORIZED)
                .await
            {
                warn!("Failed to send denial to chat {}: {:#}", incoming.chat_id, e);
            }
            return WebhookOutcome::denied();
        }

        info!(
            "Command /{} from chat {} (user {})",
            command.name, incoming.chat_id, incoming.user_id
        );

        let (mut outcome, reply) = match self.execute(&command, &incoming).await {
            Ok(reply) => (WebhookOutcome::handled(&command.name), reply),
            Err(e) => {
                error!("Command /{} failed: {:#}", command.name, e);
                let details = error_details(&e);
                let reply = format!("⚠️ /{} failed: {}", command.name, details);
                let outcome = WebhookOutcome {
                    ok: false,
                    command: Some(command.name.clone()),
                    error: Some(details),
                    ..Default::default()
                };
                (outcome, reply)
            }
        };

        if let Err(e) = self.telegram.send_message(&incoming.chat_id, &reply).await {
            warn!("Failed to send reply to chat {}: {:#}", incoming.chat_id, e);
            outcome.ok = false;
            outcome
                .error
                .get_or_insert_with(|| format!("reply failed: {}", error_details(&e)));
        }

        outcome
    }

    async fn execute(&self, command: &Command, incoming: &IncomingMessage) -> Result<String> {
        match command.name.as_str() {
            "start" | "help" => Ok(help_text()),
            "id" => Ok(format!(
                "🆔 chat_id: {}\nuser_id: {}",
                incoming.chat_id,
                if incoming.user_id.is_empty() { "n/a" } else { incoming.user_id.as_str() }
            )),
            "rules" => Ok(rules_text(&self.config.strategy.default_profile)),
            "profile" => self.profile(&command.argument).await,
            "scan" => self.scan(&command.argument, incoming).await,
            "smoke" => self.smoke(incoming).await,
            "status" => self.status(incoming).await,
            "last" => self.last(&command.argument, incoming).await,
            other => Ok(format!(
                "❓ Command not recognized: /{}\n\n{}",
                other,
                help_text()
            )),
        }
    }

    /// `None` when any of the three connection parameters is missing.
    fn github(&self) -> Result<Option<GithubClient>> {
        self.config
            .github
            .connection()
            .map(|conn| GithubClient::new(self.http.clone(), conn))
            .transpose()
    }

    fn base_payload(&self, command: &str, incoming: &IncomingMessage) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("source".into(), json!("telegram"));
        payload.insert("command".into(), json!(command));
        payload.insert("chat_id".into(), json!(incoming.chat_id));
        payload.insert("user_id".into(), json!(incoming.user_id));
        payload.insert("request_id".into(), json!(self.request_id.to_string()));
        payload.insert("requested_at".into(), json!(Utc::now().to_rfc3339()));
        payload
    }

    async fn dispatch(&self, github: &GithubClient, payload: Map<String, Value>) -> Result<()> {
        let event = DispatchEvent {
            event_type: self.config.github.event_type.clone(),
            client_payload: Value::Object(payload),
        };
        github.dispatch(&event).await
    }

    async fn profile(&self, argument: &str) -> Result<String> {
        let Some(github) = self.github()? else {
            return Ok(NOT_CONFIGURED.to_string());
        };

        match parse_profile_argument(argument) {
            ProfileAction::Show => {
                let reply = match github.get_variable(PROFILE_VARIABLE).await? {
                    Some(value) if !value.trim().is_empty() => {
                        format!("🧭 Current strategy profile: {}", value.trim())
                    }
                    _ => format!(
                        "🧭 Current strategy profile: {} (default)",
                        self.config.strategy.default_profile
                    ),
                };
                Ok(reply)
            }
            ProfileAction::Set(profile) => {
                github.upsert_or_create(PROFILE_VARIABLE, profile).await?;
                Ok(format!(
                    "✅ Strategy profile set to {}. It applies from the next scan.",
                    profile
                ))
            }
            ProfileAction::Invalid(value) => Ok(format!(
                "❌ Invalid profile value '{}'. Use one of: {}.",
                value,
                PROFILES.join(", ")
            )),
        }
    }

    async fn scan(&self, argument: &str, incoming: &IncomingMessage) -> Result<String> {
        let Some(github) = self.github()? else {
            return Ok(NOT_CONFIGURED.to_string());
        };

        let products = match parse_scan_argument(argument) {
            ScanArgument::Empty => None,
            ScanArgument::Invalid(reason) => {
                return Ok(format!(
                    "❌ /scan payload rejected: {}. Nothing was queued.\n\
                     Example: /scan {{\"title\": \"iPhone 14 128GB\", \"price_eur\": 520}}",
                    reason
                ));
            }
            ScanArgument::Products(products) => Some(products),
        };

        let mut payload = self.base_payload("scan", incoming);
        let reply = match products {
            Some(products) => {
                let reply = format!(
                    "🚀 Scan queued with {} product(s). Results will be posted here.",
                    products.len()
                );
                payload.insert("products".into(), Value::Array(products));
                reply
            }
            None => "🚀 Scan queued. The worker will pick products automatically; results will be posted here.".to_string(),
        };

        self.dispatch(&github, payload).await?;
        Ok(reply)
    }

    async fn smoke(&self, incoming: &IncomingMessage) -> Result<String> {
        let Some(github) = self.github()? else {
            return Ok(NOT_CONFIGURED.to_string());
        };

        let products = smoke_products();
        let count = products.len();
        let mut payload = self.base_payload("scan", incoming);
        payload.insert("mode".into(), json!("smoke"));
        payload.insert("products".into(), Value::Array(products));

        self.dispatch(&github, payload).await?;
        Ok(format!("🧪 Smoke scan queued with {} test products.", count))
    }

    async fn status(&self, incoming: &IncomingMessage) -> Result<String> {
        let Some(github) = self.github()? else {
            return Ok(NOT_CONFIGURED.to_string());
        };

        self.dispatch(&github, self.base_payload("status", incoming))
            .await?;
        Ok("📡 Status request queued. The worker will reply shortly.".to_string())
    }

    async fn last(&self, argument: &str, incoming: &IncomingMessage) -> Result<String> {
        let Some(github) = self.github()? else {
            return Ok(NOT_CONFIGURED.to_string());
        };

        let limit = parse_last_limit(argument);
        let mut payload = self.base_payload("last", incoming);
        payload.insert("limit".into(), json!(limit));

        self.dispatch(&github, payload).await?;
        Ok(format!(
            "🗂 Request for the last {} opportunities queued.",
            limit
        ))
    }
}
