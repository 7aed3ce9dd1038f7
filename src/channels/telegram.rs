//! Telegram channel — long-polls the Bot API for new posts and re-posts text.
//!
//! Listens for both `channel_post` and `message` updates so the source can
//! be a broadcast channel or a group the bot is a member of.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::auth::{CredentialKind, LoginBackend, LoginStep, Session};
use crate::channels::{ChannelId, EventStream, InboundEvent, MessageSender, MessagingClient};
use crate::error::{AuthError, ChannelError};

const CHANNEL_NAME: &str = "telegram";

/// Pause after a failed poll before trying again.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

// ── Bot API payloads ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
    channel_post: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    chat: Chat,
    text: Option<String>,
    caption: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
    username: Option<String>,
}

/// The account behind a session, as reported by `getMe`.
#[derive(Debug, Clone, Deserialize)]
pub struct BotUser {
    pub id: i64,
    pub username: Option<String>,
}

impl Update {
    fn into_event(self) -> Option<InboundEvent> {
        let message = self.channel_post.or(self.message)?;
        Some(InboundEvent {
            chat_id: Some(message.chat.id),
            chat_username: message.chat.username,
            text: message.text,
            caption: message.caption,
        })
    }
}

// ── Low-level API access ────────────────────────────────────────────

#[derive(Clone)]
struct BotApi {
    api_base: String,
    token: SecretString,
    client: reqwest::Client,
}

impl BotApi {
    fn new(api_base: &str, token: SecretString, client: reqwest::Client) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
            client,
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.token.expose_secret())
    }

    /// POST `body` to `method` and unwrap the `{ok, result}` envelope.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
    ) -> Result<T, ChannelError> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| ChannelError::Http(strip_token(&e.to_string(), &self.token)))?;

        let status = resp.status();
        let envelope: Option<ApiResponse<T>> = resp.json().await.ok();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::NOT_FOUND {
            return Err(ChannelError::Unauthorized {
                name: CHANNEL_NAME.into(),
                reason: envelope
                    .and_then(|e| e.description)
                    .unwrap_or_else(|| status.to_string()),
            });
        }

        // Another process is polling with the same token.
        if status == StatusCode::CONFLICT {
            return Err(ChannelError::Disconnected {
                name: CHANNEL_NAME.into(),
                reason: envelope
                    .and_then(|e| e.description)
                    .unwrap_or_else(|| status.to_string()),
            });
        }

        match envelope {
            Some(ApiResponse {
                ok: true,
                result: Some(result),
                ..
            }) => Ok(result),
            Some(ApiResponse { description, .. }) => Err(ChannelError::Http(format!(
                "{method} returned {status}: {}",
                description.unwrap_or_else(|| "no description".into())
            ))),
            None => Err(ChannelError::Http(format!(
                "{method} returned {status} with an unreadable body"
            ))),
        }
    }

    async fn get_me(&self) -> Result<BotUser, ChannelError> {
        self.call("getMe", &serde_json::json!({})).await
    }

    async fn get_updates(
        &self,
        offset: i64,
        timeout: Duration,
    ) -> Result<Vec<Update>, ChannelError> {
        let body = serde_json::json!({
            "offset": offset,
            "timeout": timeout.as_secs(),
            "allowed_updates": ["channel_post", "message"]
        });
        self.call("getUpdates", &body).await
    }
}

/// Keep the bot token out of error messages that quote the request URL.
fn strip_token(message: &str, token: &SecretString) -> String {
    let token = token.expose_secret();
    if token.is_empty() {
        return message.to_string();
    }
    message.replace(token, "<token>")
}

// ── Client ──────────────────────────────────────────────────────────

/// Telegram client — listens via long polling and sends via `sendMessage`.
pub struct TelegramClient {
    api: BotApi,
    poll_timeout: Duration,
    offset: Arc<AtomicI64>,
    shutdown: Arc<AtomicBool>,
}

impl TelegramClient {
    pub fn new(api_base: &str, session: &Session, poll_timeout: Duration) -> Self {
        let token = SecretString::from(session.expose().to_string());
        Self {
            api: BotApi::new(api_base, token, reqwest::Client::new()),
            poll_timeout,
            offset: Arc::new(AtomicI64::new(0)),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Identity of the authorized account.
    pub async fn get_me(&self) -> Result<BotUser, ChannelError> {
        self.api.get_me().await
    }

    /// Skip everything queued before startup so only new messages are relayed.
    ///
    /// Returns the number of the first update that will be delivered.
    pub async fn drop_pending_updates(&self) -> Result<i64, ChannelError> {
        let updates = self.api.get_updates(-1, Duration::ZERO).await?;
        if let Some(last) = updates.iter().map(|u| u.update_id).max() {
            self.offset.store(last + 1, Ordering::SeqCst);
            tracing::debug!(skipped_through = last, "Dropped pending Telegram updates");
        }
        Ok(self.offset.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl MessageSender for TelegramClient {
    async fn send_text(&self, target: &ChannelId, text: &str) -> Result<(), ChannelError> {
        let body = serde_json::json!({
            "chat_id": target.to_string(),
            "text": text,
        });

        let _: serde_json::Value = self
            .api
            .call("sendMessage", &body)
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: CHANNEL_NAME.into(),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}

#[async_trait]
impl MessagingClient for TelegramClient {
    fn name(&self) -> &str {
        CHANNEL_NAME
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        match self.api.get_me().await {
            Ok(_) => Ok(()),
            Err(e @ ChannelError::Unauthorized { .. }) => Err(e),
            Err(e) => Err(ChannelError::StartupFailed {
                name: CHANNEL_NAME.into(),
                reason: e.to_string(),
            }),
        }
    }

    async fn start(&self) -> Result<EventStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let api = self.api.clone();
        let poll_timeout = self.poll_timeout;
        let offset = Arc::clone(&self.offset);
        let shutdown = Arc::clone(&self.shutdown);

        tokio::spawn(async move {
            tracing::info!("Telegram channel listening for messages...");

            while !shutdown.load(Ordering::Relaxed) {
                let updates = match api
                    .get_updates(offset.load(Ordering::SeqCst), poll_timeout)
                    .await
                {
                    Ok(u) => u,
                    Err(
                        e @ (ChannelError::Unauthorized { .. }
                        | ChannelError::Disconnected { .. }),
                    ) => {
                        tracing::error!("Telegram stopped delivering updates: {e}");
                        return;
                    }
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {e}");
                        tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                        continue;
                    }
                };

                for update in updates {
                    // Advance offset past this update
                    offset.fetch_max(update.update_id + 1, Ordering::SeqCst);

                    let Some(event) = update.into_event() else {
                        continue;
                    };
                    if tx.send(event).is_err() {
                        tracing::info!("Telegram listener channel closed");
                        return;
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|ev| (ev, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        tracing::info!("Telegram channel shutting down");
        self.shutdown.store(true, Ordering::Relaxed);
        Ok(())
    }
}

// ── Login ───────────────────────────────────────────────────────────

/// Bot API login: the credential is the bot token, checked with `getMe`.
pub struct BotLogin {
    api_base: String,
    client: reqwest::Client,
    session: Option<Session>,
}

impl BotLogin {
    pub fn new(api_base: &str) -> Self {
        Self {
            api_base: api_base.to_string(),
            client: reqwest::Client::new(),
            session: None,
        }
    }
}

#[async_trait]
impl LoginBackend for BotLogin {
    async fn next_step(&mut self) -> Result<LoginStep, AuthError> {
        Ok(match self.session.take() {
            Some(session) => LoginStep::Done(session),
            None => LoginStep::Need(CredentialKind::BotToken),
        })
    }

    async fn submit(&mut self, kind: CredentialKind, answer: String) -> Result<(), AuthError> {
        if kind != CredentialKind::BotToken {
            return Err(AuthError::Rejected {
                reason: format!("unexpected {kind}"),
            });
        }

        let token = SecretString::from(answer);
        let api = BotApi::new(&self.api_base, token.clone(), self.client.clone());
        match api.get_me().await {
            Ok(user) => {
                tracing::info!(
                    bot_id = user.id,
                    username = user.username.as_deref().unwrap_or("unknown"),
                    "Bot token accepted"
                );
                self.session = Some(Session::new(token));
                Ok(())
            }
            Err(ChannelError::Unauthorized { reason, .. }) => Err(AuthError::Rejected { reason }),
            Err(e) => Err(AuthError::Channel(e)),
        }
    }
}
