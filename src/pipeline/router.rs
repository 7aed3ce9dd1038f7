//! Message router — decides per event whether to forward, then sends.
//!
//! Flow:
//! 1. Event without a chat id → dropped as malformed
//! 2. Event from another chat → dropped silently
//! 3. Text fails the keyword/length filter → dropped with a preview log
//! 4. Otherwise the text is sent once to the target channel
//!
//! Send failures are logged and swallowed; nothing is retried.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::channels::{ChannelId, InboundEvent, MessageSender};
use crate::config::RelayConfig;
use crate::pipeline::filter::should_forward;

/// Characters of a dropped message shown in the log.
const PREVIEW_CHARS: usize = 50;

/// Why an event was not forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No chat identity on the event.
    Malformed,
    /// Posted somewhere other than the source channel.
    ForeignChannel,
    /// Rejected by the keyword/length filter.
    Filtered,
}

impl DropReason {
    pub fn label(&self) -> &'static str {
        match self {
            DropReason::Malformed => "malformed",
            DropReason::ForeignChannel => "foreign_channel",
            DropReason::Filtered => "filtered",
        }
    }
}

/// What to do with one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    Forward { target: ChannelId, text: String },
    Drop(DropReason),
}

/// What actually happened to one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Forwarded,
    Dropped(DropReason),
    SendFailed(String),
}

/// Pure routing decision for `event` under `config`.
pub fn route(event: &InboundEvent, config: &RelayConfig) -> RouteDecision {
    let Some(chat_id) = event.chat_id else {
        return RouteDecision::Drop(DropReason::Malformed);
    };

    if !config
        .source_channel
        .matches(chat_id, event.chat_username.as_deref())
    {
        return RouteDecision::Drop(DropReason::ForeignChannel);
    }

    let text = event.body();
    if !should_forward(text, &config.filter) {
        return RouteDecision::Drop(DropReason::Filtered);
    }

    RouteDecision::Forward {
        target: config.target_channel.clone(),
        text: text.to_string(),
    }
}

/// First `max` characters of `text` followed by "...".
pub fn preview(text: &str, max: usize) -> String {
    let mut out: String = text.chars().take(max).collect();
    out.push_str("...");
    out
}

/// Applies [`route`] to each event and performs the send.
pub struct MessageRouter {
    config: Arc<RelayConfig>,
    sender: Arc<dyn MessageSender>,
}

impl MessageRouter {
    pub fn new(config: Arc<RelayConfig>, sender: Arc<dyn MessageSender>) -> Self {
        Self { config, sender }
    }

    /// Handle one inbound event. Never fails; errors are logged.
    pub async fn on_message(&self, event: &InboundEvent) -> RouteOutcome {
        match route(event, &self.config) {
            RouteDecision::Drop(DropReason::Malformed) => {
                info!("Missing required message data");
                RouteOutcome::Dropped(DropReason::Malformed)
            }
            RouteDecision::Drop(DropReason::ForeignChannel) => {
                debug!(chat_id = ?event.chat_id, "Ignoring message from another chat");
                RouteOutcome::Dropped(DropReason::ForeignChannel)
            }
            RouteDecision::Drop(DropReason::Filtered) => {
                info!(
                    preview = %preview(event.body(), PREVIEW_CHARS),
                    "Message filtered out"
                );
                RouteOutcome::Dropped(DropReason::Filtered)
            }
            RouteDecision::Forward { target, text } => {
                match self.sender.send_text(&target, &text).await {
                    Ok(()) => {
                        info!(to = %target, "Message forwarded successfully");
                        RouteOutcome::Forwarded
                    }
                    Err(e) => {
                        error!(to = %target, error = %e, "Error forwarding message");
                        RouteOutcome::SendFailed(e.to_string())
                    }
                }
            }
        }
    }
}
