//! Channel identity, inbound events and the messaging client traits.

use std::fmt;
use std::pin::Pin;
use std::str::FromStr;

use async_trait::async_trait;
use futures::Stream;

use crate::error::{ChannelError, ConfigError};

/// A stream of inbound message events.
pub type EventStream = Pin<Box<dyn Stream<Item = InboundEvent> + Send>>;

/// Identity of a messaging channel.
///
/// Numeric ids are compared as integers, so `"-1001234"` and `" -1001234 "`
/// are the same channel. The Bot API marks channel ids with a `-100`
/// prefix while MTProto reports the bare id; both forms match. Public
/// usernames are compared case-insensitively with the leading `@` stripped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelId {
    Numeric(i64),
    Username(String),
}

impl ChannelId {
    /// Whether a chat identified by `id` (and optionally `username`) is this channel.
    pub fn matches(&self, id: i64, username: Option<&str>) -> bool {
        match self {
            ChannelId::Numeric(n) => *n == id || bare_id(*n) == bare_id(id),
            ChannelId::Username(name) => username
                .map(|u| u.trim_start_matches('@').eq_ignore_ascii_case(name))
                .unwrap_or(false),
        }
    }
}

/// Offset the Bot API subtracts from a channel's id (`-100` prefix).
const CHANNEL_ID_MARK: i64 = 1_000_000_000_000;

/// Strip the Bot API sign/prefix marking from a chat id.
fn bare_id(id: i64) -> i64 {
    if id <= -CHANNEL_ID_MARK {
        -id - CHANNEL_ID_MARK
    } else {
        id.abs()
    }
}

impl FromStr for ChannelId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(id) = trimmed.parse::<i64>() {
            return Ok(ChannelId::Numeric(id));
        }

        let name = trimmed.trim_start_matches('@');
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidValue {
                key: "channel id".into(),
                message: format!("'{s}' is neither a numeric chat id nor a @username"),
            });
        }
        Ok(ChannelId::Username(name.to_ascii_lowercase()))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelId::Numeric(id) => write!(f, "{id}"),
            ChannelId::Username(name) => write!(f, "@{name}"),
        }
    }
}

/// One received message, as delivered by a messaging client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundEvent {
    /// Numeric id of the chat the message was posted in.
    pub chat_id: Option<i64>,
    /// Public username of that chat, if it has one.
    pub chat_username: Option<String>,
    /// Primary text body.
    pub text: Option<String>,
    /// Secondary text (media caption), used when `text` is absent.
    pub caption: Option<String>,
}

impl InboundEvent {
    pub fn new(chat_id: i64, text: &str) -> Self {
        Self {
            chat_id: Some(chat_id),
            text: Some(text.to_string()),
            ..Default::default()
        }
    }

    pub fn with_username(mut self, username: &str) -> Self {
        self.chat_username = Some(username.to_string());
        self
    }

    /// Message body: `text`, falling back to `caption`, falling back to "".
    pub fn body(&self) -> &str {
        self.text
            .as_deref()
            .or(self.caption.as_deref())
            .unwrap_or("")
    }
}

/// The send half of a messaging client.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Post `text` to `target` once.
    async fn send_text(&self, target: &ChannelId, text: &str) -> Result<(), ChannelError>;
}

/// A connected messaging client that can both listen and send.
#[async_trait]
pub trait MessagingClient: MessageSender {
    /// Channel name for logging.
    fn name(&self) -> &str;

    /// Verify the client can reach the service with its credentials.
    async fn health_check(&self) -> Result<(), ChannelError>;

    /// Start listening for new messages.
    async fn start(&self) -> Result<EventStream, ChannelError>;

    /// Stop listening.
    async fn shutdown(&self) -> Result<(), ChannelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_id_parses_with_whitespace() {
        let id: ChannelId = " -1001234567890 ".parse().unwrap();
        assert_eq!(id, ChannelId::Numeric(-1001234567890));
        assert_eq!(id.to_string(), "-1001234567890");
    }

    #[test]
    fn username_is_normalized() {
        let id: ChannelId = "@NewsFeed".parse().unwrap();
        assert_eq!(id, ChannelId::Username("newsfeed".into()));
        assert_eq!(id.to_string(), "@newsfeed");
        assert!(id.matches(-100, Some("newsfeed")));
        assert!(id.matches(-100, Some("NewsFeed")));
        assert!(!id.matches(-100, None));
    }

    #[test]
    fn empty_id_is_rejected() {
        assert!("".parse::<ChannelId>().is_err());
        assert!("@".parse::<ChannelId>().is_err());
        assert!("two words".parse::<ChannelId>().is_err());
    }

    #[test]
    fn numeric_match_ignores_username() {
        let id = ChannelId::Numeric(-42);
        assert!(id.matches(-42, None));
        assert!(!id.matches(43, Some("anything")));
    }

    #[test]
    fn marked_and_bare_channel_ids_match() {
        let id: ChannelId = "-1001234567890".parse().unwrap();
        assert!(id.matches(-1001234567890, None));
        assert!(id.matches(1234567890, None));
        assert!(!id.matches(1234567891, None));

        let group = ChannelId::Numeric(-4321);
        assert!(group.matches(4321, None));
    }

    #[test]
    fn body_prefers_text_over_caption() {
        let ev = InboundEvent {
            caption: Some("secondary".into()),
            ..InboundEvent::new(1, "primary")
        };
        assert_eq!(ev.body(), "primary");

        let ev = InboundEvent {
            chat_id: Some(1),
            caption: Some("secondary".into()),
            ..Default::default()
        };
        assert_eq!(ev.body(), "secondary");

        let ev = InboundEvent {
            chat_id: Some(1),
            ..Default::default()
        };
        assert_eq!(ev.body(), "");
    }
}
