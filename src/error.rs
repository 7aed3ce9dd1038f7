//! Error types for the relay.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Messaging channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send message on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Channel {name} rejected credentials: {reason}")]
    Unauthorized { name: String, reason: String },

    #[error("Channel {name} disconnected: {reason}")]
    Disconnected { name: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Login/session errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Prompt for {kind} failed: {reason}")]
    PromptFailed { kind: String, reason: String },

    #[error("Empty answer for {kind}")]
    EmptyAnswer { kind: String },

    #[error("Credential rejected: {reason}")]
    Rejected { reason: String },

    #[error("Login failed: {reason}")]
    Failed { reason: String },

    #[error("Login aborted after {attempts} attempts")]
    TooManyAttempts { attempts: u32 },

    #[error("Channel error during login: {0}")]
    Channel(#[from] ChannelError),
}

/// Result type alias for the relay.
pub type Result<T> = std::result::Result<T, Error>;
