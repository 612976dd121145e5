//! Relay loop: fetch from every channel, fan each message out to all others

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use mirror_core::{ChannelConfig, ChatPlatform, MirrorConfig, Result};

use crate::connection::ChannelConnection;

/// What one cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub sent: usize,
    pub fetch_failures: usize,
    pub send_failures: usize,
}

/// Owns every connection and drives the mirror.
///
/// Connections are processed sequentially in configured order.
pub struct RelayLoop {
    connections: Vec<ChannelConnection>,
    poll_interval: Duration,
}

impl RelayLoop {
    pub fn new(connections: Vec<ChannelConnection>, poll_interval: Duration) -> Self {
        if connections.len() < 2 {
            warn!(
                "Only {} channel(s) configured; nothing will be mirrored",
                connections.len()
            );
        }
        Self {
            connections,
            poll_interval,
        }
    }

    /// Connect every configured channel in order.
    ///
    /// `platform_for` builds the platform client for one channel. The first
    /// failure aborts startup; connections opened so far are released.
    pub async fn connect<F>(config: &MirrorConfig, platform_for: F) -> Result<Self>
    where
        F: Fn(&ChannelConfig) -> Result<Arc<dyn ChatPlatform>>,
    {
        warn_duplicates(&config.channels);

        info!("Connecting {} channels", config.channels.len());
        let mut connections = Vec::with_capacity(config.channels.len());
        for channel in &config.channels {
            let platform = platform_for(channel)?;
            // An early return drops `connections`, closing their streams
            connections.push(ChannelConnection::connect(channel, platform).await?);
        }

        info!("All channels connected");
        Ok(Self::new(connections, config.poll_interval))
    }

    pub fn connections(&self) -> &[ChannelConnection] {
        &self.connections
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Fetch from every connection, then relay every queued message to every
    /// other connection.
    ///
    /// Failures are logged and counted, never propagated: one channel's
    /// outage does not stop the others. Each source queue is emptied before
    /// its messages are sent, whatever the outcome of the sends.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        for conn in &mut self.connections {
            match conn.fetch_messages().await {
                Ok(count) => report.fetched += count,
                Err(e) => {
                    error!(
                        action = "fetch.failed",
                        domain = conn.domain(),
                        channel = conn.channel_name(),
                        error = %e
                    );
                    report.fetch_failures += 1;
                }
            }
        }

        for source in 0..self.connections.len() {
            let messages = self.connections[source].take_pending();
            for message in &messages {
                for (index, target) in self.connections.iter().enumerate() {
                    if index == source {
                        continue;
                    }
                    match target.send_message(message).await {
                        Ok(()) => report.sent += 1,
                        Err(e) => {
                            error!(
                                action = "send.failed",
                                domain = target.domain(),
                                channel = target.channel_name(),
                                user = %message.author.name,
                                error = %e
                            );
                            report.send_failures += 1;
                        }
                    }
                }
            }
        }

        if report.fetched > 0 {
            debug!(?report, "Cycle complete");
        }
        report
    }

    /// Run cycles until `cancel` fires, sleeping `poll_interval` between
    /// them, then release every connection.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            "Relaying between {} channels every {:?}",
            self.connections.len(),
            self.poll_interval
        );

        while !cancel.is_cancelled() {
            self.run_cycle().await;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        self.shutdown();
    }

    /// Close every connection
    pub fn shutdown(&mut self) {
        info!("Closing {} connections", self.connections.len());
        for conn in &mut self.connections {
            conn.close();
        }
    }
}

/// Mirroring a channel into itself is not detected at relay time.
///
/// Returns how many entries repeat an earlier one.
fn warn_duplicates(channels: &[ChannelConfig]) -> usize {
    let mut seen = HashSet::new();
    let mut duplicates = 0;
    for channel in channels {
        if !seen.insert((channel.domain.as_str(), channel.channel.as_str())) {
            duplicates += 1;
            warn!(
                domain = %channel.domain,
                channel = %channel.channel,
                "Channel configured more than once; its messages will be echoed back into it"
            );
        }
    }
    duplicates
}
