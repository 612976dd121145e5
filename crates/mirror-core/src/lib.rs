//! Core types and logic for mirroring chat channels across workspaces
//!
//! This crate holds everything that does not touch the network directly:
//! configuration, the platform traits, the per-connection user directory and
//! mention rewriting.

pub mod config;
pub mod directory;
pub mod error;
pub mod mentions;
pub mod platform;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod types;

// Re-export main types
pub use config::{ConfigFormat, MirrorConfig, token_env_var};
pub use directory::{USER_CACHE_CAPACITY, UserDirectory};
pub use error::{MirrorError, Result};
pub use mentions::{mention_ids, rewrite_mentions};
pub use platform::{ChatPlatform, EventStream};
pub use types::{
    AuthIdentity, ChannelConfig, ChannelInfo, IncomingText, Message, OutgoingPost, PlatformEvent,
    UserProfile, UserRef,
};
