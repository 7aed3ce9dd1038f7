//! Channel Relay — forwards filtered posts from one Telegram channel to another.

pub mod auth;
pub mod channels;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod relay;
