use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use subtle::ConstantTimeEq;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: Option<String>,
    /// Compared against the `X-Telegram-Bot-Api-Secret-Token` header.
    /// When unset the webhook accepts every delivery.
    #[serde(default)]
    pub webhook_secret: Option<String>,
    /// Comma-separated chat ids; empty means every chat is allowed.
    #[serde(default)]
    pub allowed_chat_ids: String,
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GithubConfig {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default = "default_event_type")]
    pub event_type: String,
    #[serde(default = "default_github_api_base")]
    pub api_base: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TriggerConfig {
    #[serde(default)]
    pub secret: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StrategyConfig {
    /// Reported by `/profile` while the remote variable is unset.
    #[serde(default = "default_profile")]
    pub default_profile: String,
}

/// Everything needed to talk to the repository hosting the worker.
#[derive(Debug, Clone, PartialEq)]
pub struct GithubConnection {
    pub api_base: String,
    pub token: String,
    pub owner: String,
    pub repo: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_github_api_base() -> String {
    "https://api.github.com".to_string()
}

fn default_event_type() -> String {
    "gateway_command".to_string()
}

fn default_profile() -> String {
    "balanced".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            webhook_secret: None,
            allowed_chat_ids: String::new(),
            api_base: default_telegram_api_base(),
        }
    }
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            token: None,
            owner: None,
            repo: None,
            event_type: default_event_type(),
            api_base: default_github_api_base(),
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            default_profile: default_profile(),
        }
    }
}

impl GithubConfig {
    /// Returns the connection only when token, owner and repo are all set.
    pub fn connection(&self) -> Option<GithubConnection> {
        Some(GithubConnection {
            api_base: self.api_base.trim_end_matches('/').to_string(),
            token: non_empty(self.token.as_deref())?,
            owner: non_empty(self.owner.as_deref())?,
            repo: non_empty(self.repo.as_deref())?,
        })
    }
}

impl TelegramConfig {
    pub fn bot_token(&self) -> Option<String> {
        non_empty(self.bot_token.as_deref())
    }

    pub fn webhook_secret(&self) -> Option<String> {
        verbatim(self.webhook_secret.as_deref())
    }
}

impl TriggerConfig {
    pub fn secret(&self) -> Option<String> {
        verbatim(self.secret.as_deref())
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Secrets must match byte for byte, so only blankness is checked.
fn verbatim(value: Option<&str>) -> Option<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
}

/// Exact, constant-time comparison of a presented secret.
pub fn secret_matches(expected: &str, presented: Option<&str>) -> bool {
    presented.is_some_and(|p| bool::from(p.as_bytes().ct_eq(expected.as_bytes())))
}

impl Config {
    /// Load `path` if it exists, then overlay the process environment.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::parse(&content)?
        } else {
            Config::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Overlay values from `lookup`. Blank values leave the current setting alone.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).and_then(|v| non_empty(Some(v.as_str())));
        let get_secret = |key: &str| lookup(key).and_then(|v| verbatim(Some(v.as_str())));

        if let Some(v) = get("GATEWAY_BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Some(v) = get("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = Some(v);
        }
        if let Some(v) = get_secret("TELEGRAM_WEBHOOK_SECRET") {
            self.telegram.webhook_secret = Some(v);
        }
        if let Some(v) = get("TELEGRAM_ALLOWED_CHAT_IDS") {
            self.telegram.allowed_chat_ids = v;
        }
        if let Some(v) = get("TELEGRAM_API_BASE") {
            self.telegram.api_base = v;
        }
        if let Some(v) = get("GITHUB_DISPATCH_TOKEN") {
            self.github.token = Some(v);
        }
        if let Some(v) = get("GITHUB_OWNER") {
            self.github.owner = Some(v);
        }
        if let Some(v) = get("GITHUB_REPO") {
            self.github.repo = Some(v);
        }
        if let Some(v) = get("GITHUB_EVENT_TYPE") {
            self.github.event_type = v;
        }
        if let Some(v) = get("GITHUB_API_BASE") {
            self.github.api_base = v;
        }
        if let Some(v) = get_secret("SCAN_TRIGGER_SECRET") {
            self.trigger.secret = Some(v);
        }
        if let Some(v) = get("STRATEGY_PROFILE_DEFAULT") {
            self.strategy.default_profile = v.to_lowercase();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_file() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.server.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.github.event_type, "gateway_command");
        assert_eq!(config.github.api_base, "https://api.github.com");
        assert_eq!(config.telegram.api_base, "https://api.telegram.org");
        assert_eq!(config.strategy.default_profile, "balanced");
        assert!(config.github.connection().is_none());
        assert!(config.trigger.secret().is_none());
    }

    #[test]
    fn test_toml_sections() {
        let config = Config::parse(
            r#"
[telegram]
bot_token = "123:abc"
allowed_chat_ids = "42, 43"

[github]
token = "ghp_x"
owner = "acme"
repo = "worker"
event_type = "scan_requested"
"#,
        )
        .unwrap();
        assert_eq!(config.telegram.bot_token().as_deref(), Some("123:abc"));
        assert_eq!(config.telegram.allowed_chat_ids, "42, 43");
        assert_eq!(config.github.event_type, "scan_requested");
        let conn = config.github.connection().unwrap();
        assert_eq!(conn.owner, "acme");
        assert_eq!(conn.repo, "worker");
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = Config::parse("[github]\nowner = \"from-file\"\n").unwrap();
        config.apply_env(env(&[
            ("GITHUB_OWNER", "from-env"),
            ("GITHUB_REPO", "repo"),
            ("GITHUB_DISPATCH_TOKEN", "tok"),
            ("SCAN_TRIGGER_SECRET", "s3cret"),
            ("STRATEGY_PROFILE_DEFAULT", "Conservative"),
        ]));
        let conn = config.github.connection().unwrap();
        assert_eq!(conn.owner, "from-env");
        assert_eq!(config.trigger.secret().as_deref(), Some("s3cret"));
        assert_eq!(config.strategy.default_profile, "conservative");
    }

    #[test]
    fn test_blank_values_count_as_missing() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("GITHUB_DISPATCH_TOKEN", "tok"),
            ("GITHUB_OWNER", "acme"),
            ("GITHUB_REPO", "   "),
            ("TELEGRAM_WEBHOOK_SECRET", ""),
        ]));
        assert!(config.github.connection().is_none());
        assert!(config.telegram.webhook_secret().is_none());
    }

    #[test]
    fn test_connection_trims_api_base() {
        let mut config = Config::default();
        config.github.api_base = "http://localhost:9000/".to_string();
        config.github.token = Some("t".into());
        config.github.owner = Some("o".into());
        config.github.repo = Some("r".into());
        assert_eq!(
            config.github.connection().unwrap().api_base,
            "http://localhost:9000"
        );
    }

    #[test]
    fn test_load_missing_file_is_not_an_error() {
        let config = Config::load(Path::new("/nonexistent/gateway.toml"));
        assert!(config.is_ok());
    }

    #[test]
    fn test_secrets_are_kept_verbatim() {
        let mut config = Config::parse("[trigger]\nsecret = \" padded \"\n").unwrap();
        config.apply_env(env(&[("TELEGRAM_WEBHOOK_SECRET", "hook ")]));
        assert_eq!(config.trigger.secret().as_deref(), Some(" padded "));
        assert_eq!(config.telegram.webhook_secret().as_deref(), Some("hook "));
    }

    #[test]
    fn test_secret_matches_is_exact() {
        assert!(secret_matches(" padded ", Some(" padded ")));
        assert!(!secret_matches(" padded ", Some("padded")));
        assert!(!secret_matches("s3cret", Some("s3cret2")));
        assert!(!secret_matches("s3cret", Some("")));
        assert!(!secret_matches("s3cret", None));
    }
}
