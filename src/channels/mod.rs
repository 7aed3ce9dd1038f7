//! Channel abstraction for message I/O.

pub mod channel;
pub mod mtproto;
pub mod prompt;
pub mod telegram;

pub use channel::*;
pub use mtproto::UserClient;
pub use prompt::{CredentialPrompt, StdinPrompt};
pub use telegram::{BotLogin, TelegramClient};
