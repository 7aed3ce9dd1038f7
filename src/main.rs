use std::sync::Arc;
use std::time::Duration;

use channel_relay::channels::{MessagingClient, StdinPrompt};
use channel_relay::config::{RelayConfig, Transport};
use channel_relay::pipeline::MessageRouter;
use channel_relay::relay;

/// Pause between connection attempts at startup.
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // Fail fast on missing configuration, before any network traffic
    let config = RelayConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });
    let config = Arc::new(config);

    eprintln!("📡 Channel Relay v{}", env!("CARGO_PKG_VERSION"));

    let prompt = StdinPrompt::new();
    match config.transport {
        Transport::UserAccount => {
            let (client, fresh_login) =
                relay::authenticate_user(&config, &prompt, CONNECT_RETRY_DELAY)
                    .await
                    .unwrap_or_else(|e| {
                        eprintln!("Error starting client: {e}");
                        std::process::exit(1);
                    });
            match client.get_me().await {
                Ok(me) => tracing::info!(
                    account = %me,
                    fresh_login,
                    "Connected to {}",
                    client.name()
                ),
                Err(e) => tracing::warn!("Could not read account identity: {e}"),
            }
            serve(client, config).await?;
        }
        Transport::Bot => {
            let (client, fresh_login) =
                relay::authenticate_bot(&config, &prompt, CONNECT_RETRY_DELAY)
                    .await
                    .unwrap_or_else(|e| {
                        eprintln!("Error starting client: {e}");
                        std::process::exit(1);
                    });
            match client.get_me().await {
                Ok(me) => tracing::info!(
                    bot_id = me.id,
                    username = me.username.as_deref().unwrap_or("unknown"),
                    fresh_login,
                    "Connected to {}",
                    client.name()
                ),
                Err(e) => tracing::warn!("Could not read account identity: {e}"),
            }
            client.drop_pending_updates().await?;
            serve(client, config).await?;
        }
    }
    Ok(())
}

/// Relay with `client` until ctrl-c or until the client stops delivering.
async fn serve<C>(client: C, config: Arc<RelayConfig>) -> Result<(), Box<dyn std::error::Error>>
where
    C: MessagingClient + 'static,
{
    relay::print_banner(&config);

    let client = Arc::new(client);
    let router = MessageRouter::new(config, client.clone());

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    relay::run(client.as_ref(), &router, shutdown).await?;
    Ok(())
}
