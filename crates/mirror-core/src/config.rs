//! Configuration loading and credential resolution

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{MirrorError, Result};
use crate::types::ChannelConfig;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Toml,
}

impl ConfigFormat {
    /// TOML for `*.toml`, YAML for anything else
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Self::Toml,
            _ => Self::Yaml,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    poll_interval_ms: Option<u64>,
    #[serde(alias = "channels")]
    slacks: Vec<RawChannel>,
}

#[derive(Debug, Deserialize)]
struct RawChannel {
    domain: String,
    channel: String,
    #[serde(default)]
    token: Option<String>,
}

/// Everything the relay needs, validated up front.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub channels: Vec<ChannelConfig>,
    pub poll_interval: Duration,
}

impl MirrorConfig {
    /// Read `path` and resolve credentials from the process environment
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| MirrorError::Config(format!("cannot read {}: {e}", path.display())))?;
        debug!("Loaded config from {:?} ({} bytes)", path, text.len());

        Self::parse_with(&text, ConfigFormat::from_path(path), |var| {
            std::env::var(var).ok()
        })
    }

    /// Parse `text`, resolving missing tokens through `lookup`
    pub fn parse_with<F>(text: &str, format: ConfigFormat, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw: RawConfig = match format {
            ConfigFormat::Yaml => serde_yml::from_str(text)
                .map_err(|e| MirrorError::Config(format!("invalid YAML: {e}")))?,
            ConfigFormat::Toml => toml::from_str(text)
                .map_err(|e| MirrorError::Config(format!("invalid TOML: {e}")))?,
        };

        if raw.slacks.is_empty() {
            return Err(MirrorError::Config("no channels configured".to_string()));
        }

        let poll_interval = match raw.poll_interval_ms {
            Some(0) => {
                return Err(MirrorError::Config(
                    "poll_interval_ms must be greater than zero".to_string(),
                ));
            }
            Some(ms) => Duration::from_millis(ms),
            None => DEFAULT_POLL_INTERVAL,
        };

        let channels = raw
            .slacks
            .into_iter()
            .map(|entry| resolve_channel(entry, &lookup))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            channels,
            poll_interval,
        })
    }
}

fn resolve_channel<F>(entry: RawChannel, lookup: &F) -> Result<ChannelConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let domain = entry.domain.trim().to_string();
    let channel = entry.channel.trim().trim_start_matches('#').to_string();
    if domain.is_empty() || channel.is_empty() {
        return Err(MirrorError::Config(
            "every entry needs a non-empty domain and channel".to_string(),
        ));
    }

    let credential = match entry.token.filter(|t| !t.trim().is_empty()) {
        Some(token) => token,
        None => {
            let env_var = token_env_var(&domain);
            lookup(&env_var)
                .filter(|t| !t.trim().is_empty())
                .ok_or_else(|| MirrorError::MissingCredential {
                    domain: domain.clone(),
                    env_var,
                })?
        }
    };

    Ok(ChannelConfig {
        domain,
        channel,
        credential,
    })
}

/// Environment variable holding the token for `domain`: `acme-corp` -> `ACME_CORP_TOKEN`
pub fn token_env_var(domain: &str) -> String {
    let normalized: String = domain
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("{normalized}_TOKEN")
}
