//! Error taxonomy shared by every mirror crate

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MirrorError>;

#[derive(Debug, Error)]
pub enum MirrorError {
    /// The configured channel name is not visible to the credential.
    #[error("no channel named '{channel}' in slack '{domain}'")]
    ChannelNotFound { domain: String, channel: String },

    #[error("no credential for '{domain}': set `token` in the config or export {env_var}")]
    MissingCredential { domain: String, env_var: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    /// The request never got a usable answer (DNS, TLS, socket, timeout).
    #[error("{method} transport error: {reason}")]
    Transport { method: String, reason: String },

    /// The platform answered and refused.
    #[error("{method} failed: {error}")]
    Platform { method: String, error: String },

    #[error("unexpected {method} payload: {reason}")]
    Decode { method: String, reason: String },

    #[error("real-time connection closed")]
    ConnectionClosed,
}

impl MirrorError {
    pub fn transport(method: &str, reason: impl ToString) -> Self {
        Self::Transport {
            method: method.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn platform(method: &str, error: impl ToString) -> Self {
        Self::Platform {
            method: method.to_string(),
            error: error.to_string(),
        }
    }

    pub fn decode(method: &str, reason: impl ToString) -> Self {
        Self::Decode {
            method: method.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Startup errors abort the process; everything else is per-cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ChannelNotFound { .. } | Self::MissingCredential { .. } | Self::Config(_)
        )
    }
}
