//! Channel connections and the relay loop for the mirror
//!
//! This crate provides the Slack adapter, the per-channel connection that
//! drains and enriches events, and the loop that fans messages out between
//! connections.

pub mod connection;
pub mod relay;
pub mod slack;

// Re-export main types
pub use connection::ChannelConnection;
pub use relay::{CycleReport, RelayLoop};
pub use slack::{SlackEventStream, SlackPlatform, install_crypto_provider};
