//! Telegram user-account channel over MTProto.
//!
//! Logs in as a regular account, so it can read any channel the account is
//! subscribed to. The session is kept as a hex string of grammers' session
//! blob and handed back through `SOURCE_SESSION_STRING`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use grammers_client::session::Session as MtSession;
use grammers_client::types::{LoginToken, PackedChat, PasswordToken};
use grammers_client::{Client, Config, InitParams, InvocationError, SignInError, Update};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;

use crate::auth::{AccountAuth, Session, SignIn};
use crate::channels::{ChannelId, EventStream, InboundEvent, MessageSender, MessagingClient};
use crate::config::RelayConfig;
use crate::error::{AuthError, ChannelError, ConfigError};

const CHANNEL_NAME: &str = "telegram-user";

/// Pause after a failed update fetch before trying again.
const UPDATE_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Decode a saved session string.
pub fn decode_session(saved: &SecretString) -> Result<Vec<u8>, ConfigError> {
    let invalid = |message: String| ConfigError::InvalidValue {
        key: "SOURCE_SESSION_STRING".into(),
        message,
    };
    let bytes = hex::decode(saved.expose_secret().trim())
        .map_err(|e| invalid(format!("not a user session string: {e}")))?;
    MtSession::load(&bytes).map_err(|e| invalid(format!("unreadable session: {e}")))?;
    Ok(bytes)
}

fn encode_session(session: &MtSession) -> Session {
    Session::new(SecretString::from(hex::encode(session.save())))
}

/// RPC 401 family (`AUTH_KEY_UNREGISTERED`, `SESSION_REVOKED`, ...).
fn is_auth_error(err: &InvocationError) -> bool {
    matches!(err, InvocationError::Rpc(rpc) if rpc.code == 401)
}

fn http(err: impl std::fmt::Display) -> ChannelError {
    ChannelError::Http(err.to_string())
}

/// User-account client — receives `NewMessage` updates and sends with
/// `send_message`.
pub struct UserClient {
    client: Client,
    resolved: Mutex<HashMap<ChannelId, PackedChat>>,
    shutdown: Arc<AtomicBool>,
}

impl UserClient {
    /// Open a connection with `saved` session bytes, or a blank session.
    ///
    /// Updates missed while offline are not replayed.
    pub async fn connect(
        config: &RelayConfig,
        saved: Option<&[u8]>,
    ) -> Result<Self, ChannelError> {
        let session = match saved {
            Some(bytes) => MtSession::load(bytes).map_err(|e| ChannelError::StartupFailed {
                name: CHANNEL_NAME.into(),
                reason: e.to_string(),
            })?,
            None => MtSession::new(),
        };

        let client = Client::connect(Config {
            session,
            api_id: config.api_id,
            api_hash: config.api_hash.expose_secret().to_string(),
            params: InitParams {
                catch_up: false,
                ..Default::default()
            },
        })
        .await
        .map_err(|e| ChannelError::StartupFailed {
            name: CHANNEL_NAME.into(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            client,
            resolved: Mutex::new(HashMap::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Login calls bound to this connection.
    pub fn account(&self) -> GrammersAccount {
        GrammersAccount {
            client: self.client.clone(),
        }
    }

    /// Display name of the logged-in account.
    pub async fn get_me(&self) -> Result<String, ChannelError> {
        let me = self.client.get_me().await.map_err(http)?;
        Ok(me
            .username()
            .map(|u| format!("@{u}"))
            .unwrap_or_else(|| me.id().to_string()))
    }

    async fn resolve(&self, target: &ChannelId) -> Result<PackedChat, ChannelError> {
        if let Some(chat) = self.resolved.lock().await.get(target) {
            return Ok(*chat);
        }

        let found = match target {
            ChannelId::Username(name) => self
                .client
                .resolve_username(name)
                .await
                .map_err(http)?
                .map(|chat| chat.pack()),
            ChannelId::Numeric(_) => {
                let mut found = None;
                let mut dialogs = self.client.iter_dialogs();
                while let Some(dialog) = dialogs.next().await.map_err(http)? {
                    let chat = dialog.chat();
                    if target.matches(chat.id(), chat.username()) {
                        found = Some(chat.pack());
                        break;
                    }
                }
                found
            }
        };

        let chat = found.ok_or_else(|| ChannelError::SendFailed {
            name: CHANNEL_NAME.into(),
            reason: format!("{target} is not a chat this account can see"),
        })?;
        self.resolved.lock().await.insert(target.clone(), chat);
        Ok(chat)
    }
}

#[async_trait]
impl MessageSender for UserClient {
    async fn send_text(&self, target: &ChannelId, text: &str) -> Result<(), ChannelError> {
        let chat = self.resolve(target).await?;
        self.client
            .send_message(chat, text)
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: CHANNEL_NAME.into(),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}

#[async_trait]
impl MessagingClient for UserClient {
    fn name(&self) -> &str {
        CHANNEL_NAME
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        match self.client.is_authorized().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(ChannelError::Unauthorized {
                name: CHANNEL_NAME.into(),
                reason: "session is not logged in".into(),
            }),
            Err(e) if is_auth_error(&e) => Err(ChannelError::Unauthorized {
                name: CHANNEL_NAME.into(),
                reason: e.to_string(),
            }),
            Err(e) => Err(ChannelError::StartupFailed {
                name: CHANNEL_NAME.into(),
                reason: e.to_string(),
            }),
        }
    }

    async fn start(&self) -> Result<EventStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let client = self.client.clone();
        let shutdown = Arc::clone(&self.shutdown);

        tokio::spawn(async move {
            tracing::info!("Telegram user session listening for messages...");

            while !shutdown.load(Ordering::Relaxed) {
                let update = match client.next_update().await {
                    Ok(update) => update,
                    Err(e) if is_auth_error(&e) => {
                        tracing::error!("Telegram session was revoked: {e}");
                        return;
                    }
                    Err(e) => {
                        tracing::warn!("Telegram update error: {e}");
                        tokio::time::sleep(UPDATE_ERROR_BACKOFF).await;
                        continue;
                    }
                };

                let Update::NewMessage(message) = update else {
                    continue;
                };
                if message.outgoing() {
                    continue;
                }

                let chat = message.chat();
                let text = message.text();
                let event = InboundEvent {
                    chat_id: Some(chat.id()),
                    chat_username: chat.username().map(str::to_string),
                    text: (!text.is_empty()).then(|| text.to_string()),
                    caption: None,
                };
                if tx.send(event).is_err() {
                    tracing::info!("Telegram listener channel closed");
                    return;
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|ev| (ev, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        tracing::info!("Telegram user session shutting down");
        self.shutdown.store(true, Ordering::Relaxed);
        Ok(())
    }
}

// ── Login ───────────────────────────────────────────────────────────

/// Phone number login calls on a connected client.
pub struct GrammersAccount {
    client: Client,
}

#[async_trait]
impl AccountAuth for GrammersAccount {
    type CodeToken = LoginToken;
    type PasswordToken = PasswordToken;

    async fn request_code(&self, phone: &str) -> Result<LoginToken, AuthError> {
        self.client
            .request_login_code(phone)
            .await
            .map_err(|e| AuthError::Rejected {
                reason: e.to_string(),
            })
    }

    async fn sign_in(
        &self,
        token: &LoginToken,
        code: &str,
    ) -> Result<SignIn<PasswordToken>, AuthError> {
        match self.client.sign_in(token, code).await {
            Ok(_) => Ok(SignIn::Done),
            Err(SignInError::PasswordRequired(password_token)) => {
                Ok(SignIn::PasswordRequired(password_token))
            }
            Err(SignInError::InvalidCode) => Err(AuthError::Rejected {
                reason: "invalid login code".into(),
            }),
            Err(e) => Err(AuthError::Failed {
                reason: e.to_string(),
            }),
        }
    }

    async fn check_password(
        &self,
        token: PasswordToken,
        password: &str,
    ) -> Result<(), AuthError> {
        match self.client.check_password(token, password).await {
            Ok(_) => Ok(()),
            Err(SignInError::InvalidPassword) => Err(AuthError::Rejected {
                reason: "invalid 2FA password".into(),
            }),
            Err(e) => Err(AuthError::Failed {
                reason: e.to_string(),
            }),
        }
    }

    fn export_session(&self) -> Result<Session, AuthError> {
        Ok(encode_session(self.client.session()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_session_round_trips_through_hex() {
        let saved = encode_session(&MtSession::new());
        let bytes = decode_session(&SecretString::from(saved.save())).unwrap();
        assert!(MtSession::load(&bytes).is_ok());
    }

    #[test]
    fn bot_token_is_not_a_user_session() {
        let err = decode_session(&SecretString::from("123456:ABC-DEF")).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref key, .. } if key == "SOURCE_SESSION_STRING"
        ));
    }
}
