//! Configuration types.
//!
//! Everything is read once at startup from the environment (plus an
//! optional `.env` file) and is immutable afterwards.

use std::time::Duration;

use secrecy::SecretString;

use crate::channels::ChannelId;
use crate::error::ConfigError;

/// Default Telegram Bot API endpoint, used by [`Transport::Bot`].
pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// How the relay talks to Telegram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// MTProto user account: phone number, login code and optional 2FA
    /// password. Can read any channel the account is subscribed to.
    UserAccount,
    /// Bot API: the session credential is a bot token. The bot must be a
    /// member of the source channel.
    Bot,
}

impl std::str::FromStr for Transport {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "user" | "" => Ok(Transport::UserAccount),
            "bot" => Ok(Transport::Bot),
            other => Err(ConfigError::InvalidValue {
                key: "RELAY_TRANSPORT".into(),
                message: format!("'{other}' is not one of: user, bot"),
            }),
        }
    }
}

/// Keyword and length rules applied to every message from the source channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterConfig {
    /// All of these must appear in the lower-cased text.
    pub required_keywords: Vec<String>,
    /// At least one of these must appear, when any are configured.
    pub optional_keywords: Vec<String>,
    /// Minimum length in characters. Zero disables the check.
    pub min_message_length: usize,
}

impl FilterConfig {
    pub fn has_keywords(&self) -> bool {
        !self.required_keywords.is_empty() || !self.optional_keywords.is_empty()
    }
}

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Application id issued for the account.
    pub api_id: i32,
    /// Application hash issued for the account.
    pub api_hash: SecretString,
    /// Saved session credential. `None` triggers the interactive login.
    pub session: Option<SecretString>,
    pub transport: Transport,
    /// Channel being monitored.
    pub source_channel: ChannelId,
    /// Channel qualifying messages are re-posted to.
    pub target_channel: ChannelId,
    pub filter: FilterConfig,
    /// Bot API base URL, overridable for tests and self-hosted API servers.
    pub api_base: String,
    /// Connection attempts before giving up at startup.
    pub connection_retries: u32,
    /// Long-poll timeout for `getUpdates`.
    pub poll_timeout: Duration,
}

impl RelayConfig {
    /// Build config from the process environment, loading `.env` first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "Loaded .env file");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key/value lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String, ConfigError> {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
        };

        // Check presence of every required variable before validating any.
        let api_id = required("SOURCE_API_ID")?;
        let api_hash = required("SOURCE_API_HASH")?;
        let source_channel = required("SOURCE_CHANNEL_ID")?;
        let target_channel = required("TARGET_CHANNEL_ID")?;

        let api_id: i32 = api_id.parse().map_err(|_| ConfigError::InvalidValue {
            key: "SOURCE_API_ID".into(),
            message: format!("'{api_id}' is not an integer"),
        })?;

        let source_channel = source_channel
            .parse::<ChannelId>()
            .map_err(|e| with_key(e, "SOURCE_CHANNEL_ID"))?;
        let target_channel = target_channel
            .parse::<ChannelId>()
            .map_err(|e| with_key(e, "TARGET_CHANNEL_ID"))?;

        let session = lookup("SOURCE_SESSION_STRING")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(SecretString::from);

        let transport = lookup("RELAY_TRANSPORT")
            .map(|s| s.parse::<Transport>())
            .transpose()?
            .unwrap_or(Transport::UserAccount);

        let min_message_length = match lookup("MIN_MESSAGE_LENGTH")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
        {
            Some(raw) => raw.parse::<usize>().map_err(|_| ConfigError::InvalidValue {
                key: "MIN_MESSAGE_LENGTH".into(),
                message: format!("'{raw}' is not a non-negative integer"),
            })?,
            None => 0,
        };

        let filter = FilterConfig {
            required_keywords: parse_keywords(lookup("REQUIRED_KEYWORDS").as_deref()),
            optional_keywords: parse_keywords(lookup("OPTIONAL_KEYWORDS").as_deref()),
            min_message_length,
        };

        let api_base = lookup("TELEGRAM_API_BASE")
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        Ok(Self {
            api_id,
            api_hash: SecretString::from(api_hash),
            session,
            transport,
            source_channel,
            target_channel,
            filter,
            api_base,
            connection_retries: 5,
            poll_timeout: Duration::from_secs(30),
        })
    }
}

/// Split a comma-separated keyword list into trimmed, lower-cased, unique entries.
pub fn parse_keywords(raw: Option<&str>) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    for k in raw.unwrap_or_default().split(',') {
        let k = k.trim().to_lowercase();
        if !k.is_empty() && !keywords.contains(&k) {
            keywords.push(k);
        }
    }
    keywords
}

fn with_key(err: ConfigError, key: &str) -> ConfigError {
    match err {
        ConfigError::InvalidValue { message, .. } => ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn base() -> HashMap<String, String> {
        env(&[
            ("SOURCE_API_ID", "12345"),
            ("SOURCE_API_HASH", "abcdef"),
            ("SOURCE_CHANNEL_ID", "-1001111"),
            ("TARGET_CHANNEL_ID", "@mirror"),
        ])
    }

    fn load(vars: &HashMap<String, String>) -> Result<RelayConfig, ConfigError> {
        RelayConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = load(&base()).unwrap();
        assert_eq!(cfg.api_id, 12345);
        assert_eq!(cfg.api_hash.expose_secret(), "abcdef");
        assert!(cfg.session.is_none());
        assert_eq!(cfg.transport, Transport::UserAccount);
        assert_eq!(cfg.source_channel, ChannelId::Numeric(-1001111));
        assert_eq!(cfg.target_channel, ChannelId::Username("mirror".into()));
        assert_eq!(cfg.filter, FilterConfig::default());
        assert_eq!(cfg.api_base, DEFAULT_API_BASE);
        assert_eq!(cfg.connection_retries, 5);
    }

    #[test]
    fn each_required_var_is_enforced() {
        for key in [
            "SOURCE_API_ID",
            "SOURCE_API_HASH",
            "SOURCE_CHANNEL_ID",
            "TARGET_CHANNEL_ID",
        ] {
            let mut vars = base();
            vars.remove(key);
            match load(&vars) {
                Err(ConfigError::MissingEnvVar(k)) => assert_eq!(k, key),
                other => panic!("expected missing {key}, got {other:?}"),
            }
        }
    }

    #[test]
    fn blank_required_var_counts_as_missing() {
        let mut vars = base();
        vars.insert("SOURCE_API_HASH".into(), "   ".into());
        assert!(matches!(load(&vars), Err(ConfigError::MissingEnvVar(_))));
    }

    #[test]
    fn non_numeric_api_id_is_invalid() {
        let mut vars = base();
        vars.insert("SOURCE_API_ID".into(), "abc".into());
        assert!(matches!(
            load(&vars),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "SOURCE_API_ID"
        ));
    }

    #[test]
    fn transport_is_selectable() {
        let mut vars = base();
        vars.insert("RELAY_TRANSPORT".into(), "Bot".into());
        assert_eq!(load(&vars).unwrap().transport, Transport::Bot);

        vars.insert("RELAY_TRANSPORT".into(), "carrier-pigeon".into());
        assert!(matches!(
            load(&vars),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "RELAY_TRANSPORT"
        ));
    }

    #[test]
    fn api_id_out_of_range_is_invalid() {
        let mut vars = base();
        vars.insert("SOURCE_API_ID".into(), "99999999999".into());
        assert!(matches!(
            load(&vars),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "SOURCE_API_ID"
        ));
    }

    #[test]
    fn keywords_and_length_are_parsed() {
        let mut vars = base();
        vars.insert("REQUIRED_KEYWORDS".into(), " Rust, ASYNC ,,rust".into());
        vars.insert("OPTIONAL_KEYWORDS".into(), "tokio,Axum".into());
        vars.insert("MIN_MESSAGE_LENGTH".into(), "20".into());
        vars.insert("SOURCE_SESSION_STRING".into(), "tok".into());

        let cfg = load(&vars).unwrap();
        assert_eq!(cfg.filter.required_keywords, vec!["rust", "async"]);
        assert_eq!(cfg.filter.optional_keywords, vec!["tokio", "axum"]);
        assert_eq!(cfg.filter.min_message_length, 20);
        assert!(cfg.filter.has_keywords());
        assert_eq!(cfg.session.unwrap().expose_secret(), "tok");
    }

    #[test]
    fn invalid_min_length_is_rejected() {
        let mut vars = base();
        vars.insert("MIN_MESSAGE_LENGTH".into(), "-3".into());
        assert!(matches!(
            load(&vars),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "MIN_MESSAGE_LENGTH"
        ));
    }

    #[test]
    fn invalid_channel_reports_its_key() {
        let mut vars = base();
        vars.insert("TARGET_CHANNEL_ID".into(), "not a channel".into());
        assert!(matches!(
            load(&vars),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "TARGET_CHANNEL_ID"
        ));
    }

    #[test]
    fn api_base_trailing_slash_is_stripped() {
        let mut vars = base();
        vars.insert("TELEGRAM_API_BASE".into(), "http://127.0.0.1:8081/".into());
        assert_eq!(load(&vars).unwrap().api_base, "http://127.0.0.1:8081");
    }

    #[test]
    fn empty_keyword_list_imposes_nothing() {
        assert!(parse_keywords(Some("")).is_empty());
        assert!(parse_keywords(Some(" , ,")).is_empty());
        assert!(parse_keywords(None).is_empty());
    }
}
