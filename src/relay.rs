//! Startup and the relay loop: authenticate, connect, then route every
//! event until shutdown.

use std::future::Future;
use std::time::Duration;

use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::auth::{self, Session, UserLogin};
use crate::channels::mtproto::decode_session;
use crate::channels::{BotLogin, CredentialPrompt, MessagingClient, TelegramClient, UserClient};
use crate::config::RelayConfig;
use crate::error::{ChannelError, Result};
use crate::pipeline::{MessageRouter, RouteOutcome};

/// Counters reported when the relay stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub received: u64,
    pub forwarded: u64,
    pub dropped: u64,
    pub failed: u64,
}

impl RelayStats {
    fn record(&mut self, outcome: &RouteOutcome) {
        self.received += 1;
        match outcome {
            RouteOutcome::Forwarded => self.forwarded += 1,
            RouteOutcome::Dropped(reason) => {
                debug!(reason = reason.label(), "Event dropped");
                self.dropped += 1;
            }
            RouteOutcome::SendFailed(_) => self.failed += 1,
        }
    }
}

/// Run `op` up to `attempts` times, sleeping `delay` between failures.
///
/// Rejected credentials are returned immediately.
pub async fn with_retries<T, F, Fut>(
    channel: &str,
    attempts: u32,
    delay: Duration,
    mut op: F,
) -> std::result::Result<T, ChannelError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, ChannelError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e @ ChannelError::Unauthorized { .. }) => return Err(e),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                warn!(channel, attempt, max = attempts, "Connection failed: {e}");
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Run `client.health_check()` up to `attempts` times.
pub async fn connect_with_retries<C>(
    client: &C,
    attempts: u32,
    delay: Duration,
) -> std::result::Result<(), ChannelError>
where
    C: MessagingClient + ?Sized,
{
    with_retries(client.name(), attempts, delay, || client.health_check()).await
}

/// Bot API client, logging in with a bot token when there is no usable
/// saved one.
///
/// The returned flag is true when a new session was created.
pub async fn authenticate_bot(
    config: &RelayConfig,
    prompt: &dyn CredentialPrompt,
    retry_delay: Duration,
) -> Result<(TelegramClient, bool)> {
    if let Some(saved) = &config.session {
        let session = Session::new(saved.clone());
        let client = TelegramClient::new(&config.api_base, &session, config.poll_timeout);
        match connect_with_retries(&client, config.connection_retries, retry_delay).await {
            Ok(()) => return Ok((client, false)),
            Err(ChannelError::Unauthorized { reason, .. }) => {
                warn!("Saved session was rejected ({reason}); starting interactive login");
            }
            Err(e) => return Err(e.into()),
        }
    }

    eprintln!("You need to login first!");
    let mut backend = BotLogin::new(&config.api_base);
    let session = auth::login(&mut backend, prompt).await?;
    auth::print_session_banner(&session);

    let client = TelegramClient::new(&config.api_base, &session, config.poll_timeout);
    connect_with_retries(&client, config.connection_retries, retry_delay).await?;
    Ok((client, true))
}

/// User-account client, logging in with phone number, code and 2FA
/// password when the saved session is missing or no longer authorized.
///
/// The returned flag is true when a new session was created.
pub async fn authenticate_user(
    config: &RelayConfig,
    prompt: &dyn CredentialPrompt,
    retry_delay: Duration,
) -> Result<(UserClient, bool)> {
    let saved = config.session.as_ref().map(decode_session).transpose()?;

    let client = with_retries(
        "telegram-user",
        config.connection_retries,
        retry_delay,
        || UserClient::connect(config, saved.as_deref()),
    )
    .await?;

    if saved.is_some() {
        match client.health_check().await {
            Ok(()) => return Ok((client, false)),
            Err(ChannelError::Unauthorized { reason, .. }) => {
                warn!("Saved session was rejected ({reason}); starting interactive login");
            }
            Err(e) => return Err(e.into()),
        }
    }

    eprintln!("You need to login first!");
    let mut backend = UserLogin::new(client.account());
    let session = auth::login(&mut backend, prompt).await?;
    auth::print_session_banner(&session);
    Ok((client, true))
}

/// Print what is being monitored and how it is filtered.
pub fn print_banner(config: &RelayConfig) {
    eprintln!("Client started successfully!");
    eprintln!("   Monitoring channel: {}", config.source_channel);
    eprintln!("   Will forward to channel: {}", config.target_channel);
    if config.filter.has_keywords() {
        eprintln!(
            "   Filtering for keywords: {} AND {}",
            config.filter.required_keywords.join(", "),
            config.filter.optional_keywords.join(", ")
        );
    }
    if config.filter.min_message_length > 0 {
        eprintln!(
            "   Minimum message length: {}",
            config.filter.min_message_length
        );
    }
}

/// Route events from `client` through `router` until the stream ends or
/// `shutdown` resolves.
pub async fn run<C, F>(
    client: &C,
    router: &MessageRouter,
    shutdown: F,
) -> std::result::Result<RelayStats, ChannelError>
where
    C: MessagingClient + ?Sized,
    F: Future<Output = ()>,
{
    let mut events = client.start().await?;
    let mut stats = RelayStats::default();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else {
                    info!(channel = client.name(), "Event stream ended");
                    break;
                };
                let outcome = router.on_message(&event).await;
                stats.record(&outcome);
            }
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    client.shutdown().await?;
    info!(
        received = stats.received,
        forwarded = stats.forwarded,
        dropped = stats.dropped,
        failed = stats.failed,
        "Relay stopped"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::channels::{ChannelId, EventStream, InboundEvent, MessageSender};

    /// Fails health checks until `fail_first` attempts have been made.
    struct FlakyClient {
        fail_first: u32,
        unauthorized: bool,
        checks: AtomicU32,
        events: Mutex<Vec<InboundEvent>>,
        stopped: Mutex<bool>,
    }

    impl FlakyClient {
        fn new(fail_first: u32) -> Self {
            Self {
                fail_first,
                unauthorized: false,
                checks: AtomicU32::new(0),
                events: Mutex::new(Vec::new()),
                stopped: Mutex::new(false),
            }
        }
    }

    #[async_trait]
    impl MessageSender for FlakyClient {
        async fn send_text(
            &self,
            _target: &ChannelId,
            _text: &str,
        ) -> std::result::Result<(), ChannelError> {
            Ok(())
        }
    }

    #[async_trait]
    impl MessagingClient for FlakyClient {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn health_check(&self) -> std::result::Result<(), ChannelError> {
            let n = self.checks.fetch_add(1, Ordering::SeqCst) + 1;
            if self.unauthorized {
                return Err(ChannelError::Unauthorized {
                    name: "flaky".into(),
                    reason: "bad token".into(),
                });
            }
            if n <= self.fail_first {
                return Err(ChannelError::StartupFailed {
                    name: "flaky".into(),
                    reason: format!("attempt {n}"),
                });
            }
            Ok(())
        }

        async fn start(&self) -> std::result::Result<EventStream, ChannelError> {
            let events = std::mem::take(&mut *self.events.lock().unwrap());
            Ok(Box::pin(futures::stream::iter(events)))
        }

        async fn shutdown(&self) -> std::result::Result<(), ChannelError> {
            *self.stopped.lock().unwrap() = true;
            Ok(())
        }
    }

    #[tokio::test]
    async fn connect_succeeds_after_transient_failures() {
        let client = FlakyClient::new(2);
        connect_with_retries(&client, 5, Duration::ZERO).await.unwrap();
        assert_eq!(client.checks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn connect_gives_up_after_attempts() {
        let client = FlakyClient::new(10);
        let err = connect_with_retries(&client, 5, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::StartupFailed { .. }));
        assert_eq!(client.checks.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn unauthorized_is_not_retried() {
        let mut client = FlakyClient::new(0);
        client.unauthorized = true;
        let err = connect_with_retries(&client, 5, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::Unauthorized { .. }));
        assert_eq!(client.checks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_return_the_first_success() {
        let calls = AtomicU32::new(0);
        let value = with_retries("test", 5, Duration::ZERO, || async {
            match calls.fetch_add(1, Ordering::SeqCst) {
                0 => Err(ChannelError::Http("reset".into())),
                n => Ok(n),
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn run_counts_outcomes_and_shuts_down() {
        use std::collections::HashMap;
        use std::sync::Arc;

        let vars: HashMap<&str, &str> = [
            ("SOURCE_API_ID", "1"),
            ("SOURCE_API_HASH", "hash"),
            ("SOURCE_CHANNEL_ID", "-1001"),
            ("TARGET_CHANNEL_ID", "-2002"),
            ("REQUIRED_KEYWORDS", "deal"),
        ]
        .into_iter()
        .collect();
        let config = RelayConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();

        let client = Arc::new(FlakyClient::new(0));
        *client.events.lock().unwrap() = vec![
            InboundEvent::new(-1001, "Great deal today"),
            InboundEvent::new(-1001, "nothing here"),
            InboundEvent::new(-5, "deal elsewhere"),
        ];
        let router = MessageRouter::new(Arc::new(config), client.clone());

        let stats = run(client.as_ref(), &router, std::future::pending())
            .await
            .unwrap();
        assert_eq!(
            stats,
            RelayStats {
                received: 3,
                forwarded: 1,
                dropped: 2,
                failed: 0,
            }
        );
        assert!(*client.stopped.lock().unwrap());
    }
}
