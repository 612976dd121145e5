//! One mirrored channel: resolution at startup, event draining, posting

use std::sync::Arc;

use tracing::{Instrument, Span, debug, info, info_span, warn};

use mirror_core::{
    ChannelConfig, ChatPlatform, EventStream, IncomingText, Message, MirrorError, OutgoingPost,
    Result, UserDirectory, rewrite_mentions,
};

/// A live connection to one channel in one domain.
///
/// Owns the event stream, the user cache and the queue of fetched messages
/// waiting to be relayed. The stream is closed on [`close`](Self::close) or
/// drop.
pub struct ChannelConnection {
    domain: String,
    channel_name: String,
    channel_id: String,
    platform: Arc<dyn ChatPlatform>,
    events: Box<dyn EventStream>,
    directory: UserDirectory,
    pending: Vec<Message>,
    span: Span,
}

impl ChannelConnection {
    /// Authenticate, resolve the channel id by name and open the event stream.
    ///
    /// The first channel with a matching name wins. Nothing here is retried:
    /// any error means this channel cannot be mirrored.
    pub async fn connect(config: &ChannelConfig, platform: Arc<dyn ChatPlatform>) -> Result<Self> {
        let span = info_span!("channel", domain = %config.domain, channel = %config.channel);

        async move {
            let identity = platform.authenticate().await?;
            debug!(team = %identity.team, user = %identity.user_id, "Authenticated");

            let channels = platform.list_channels().await?;
            let channel_id = channels
                .into_iter()
                .find(|c| c.name == config.channel)
                .map(|c| c.id)
                .ok_or_else(|| MirrorError::ChannelNotFound {
                    domain: config.domain.clone(),
                    channel: config.channel.clone(),
                })?;

            let events = platform.open_events().await?;
            info!(channel_id = %channel_id, "Connected");

            Ok::<Self, MirrorError>(Self {
                domain: config.domain.clone(),
                channel_name: config.channel.clone(),
                channel_id,
                directory: UserDirectory::new(Arc::clone(&platform)),
                platform,
                events,
                pending: Vec::new(),
                span: Span::current(),
            })
        }
        .instrument(span)
        .await
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Messages fetched but not yet relayed, in arrival order
    pub fn pending(&self) -> &[Message] {
        &self.pending
    }

    /// Hand over the queued messages, leaving the queue empty
    pub fn take_pending(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.pending)
    }

    /// Drain the event stream and queue every new user message in this channel.
    ///
    /// Returns how many messages were queued. A message whose author cannot be
    /// resolved is dropped on its own. A dropped connection is reopened once.
    pub async fn fetch_messages(&mut self) -> Result<usize> {
        let span = self.span.clone();
        self.fetch_inner().instrument(span).await
    }

    async fn fetch_inner(&mut self) -> Result<usize> {
        let events = match self.events.drain() {
            Err(MirrorError::ConnectionClosed) => {
                warn!(action = "events.reconnect", "Real-time connection lost, reopening");
                self.events = self.platform.open_events().await?;
                self.events.drain()?
            }
            other => other?,
        };
        debug!(action = "events.fetched", count = events.len());

        let mut fetched = 0;
        for event in &events {
            let Some(incoming) = event.as_channel_message(&self.channel_id) else {
                continue;
            };
            match self.enrich(incoming).await {
                Ok(message) => {
                    self.pending.push(message);
                    fetched += 1;
                }
                Err(e) => warn!(action = "message.dropped", user = incoming.user, error = %e),
            }
        }

        if fetched > 0 {
            info!(action = "messages.fetched", count = fetched);
        }
        Ok(fetched)
    }

    /// Attach the author's identity and rewrite mentions to names
    async fn enrich(&mut self, incoming: IncomingText<'_>) -> Result<Message> {
        let author = self.directory.resolve(incoming.user).await?;
        let text = rewrite_mentions(incoming.text, &mut self.directory).await;

        Ok(Message {
            origin_channel_id: self.channel_id.clone(),
            raw_text: incoming.text.to_string(),
            text,
            author,
            ts: incoming.ts.map(str::to_string),
        })
    }

    /// Post `message` here under its author's name and avatar
    pub async fn send_message(&self, message: &Message) -> Result<()> {
        let post = OutgoingPost {
            channel: self.channel_id.clone(),
            text: message.text.clone(),
            username: message.author.name.clone(),
            icon_url: message.author.avatar_url.clone(),
        };

        async {
            self.platform.post_message(&post).await?;
            info!(action = "messages.sent", text = %post.text, user = %post.username);
            Ok::<(), MirrorError>(())
        }
        .instrument(self.span.clone())
        .await
    }

    /// Release the real-time connection
    pub fn close(&mut self) {
        let _guard = self.span.enter();
        self.events.close();
        debug!("Real-time connection released");
    }
}

impl Drop for ChannelConnection {
    fn drop(&mut self) {
        self.events.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_core::PlatformEvent;
    use mirror_core::testing::FakePlatform;

    fn config(channel: &str) -> ChannelConfig {
        ChannelConfig {
            domain: "acme".to_string(),
            channel: channel.to_string(),
            credential: "xoxb-test".to_string(),
        }
    }

    fn platform() -> FakePlatform {
        FakePlatform::new()
            .with_channel("C0", "random")
            .with_channel("C1", "general")
            .with_user("U1", "alice")
            .with_user("U2", "bob")
    }

    async fn connect(platform: &FakePlatform) -> ChannelConnection {
        ChannelConnection::connect(&config("general"), Arc::new(platform.clone()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_connect_resolves_channel_id() {
        let platform = platform();
        let conn = connect(&platform).await;

        assert_eq!(conn.channel_id(), "C1");
        assert_eq!(conn.domain(), "acme");
        assert_eq!(conn.channel_name(), "general");
        assert!(platform.is_connected());
    }

    #[tokio::test]
    async fn test_connect_first_duplicate_name_wins() {
        let platform = FakePlatform::new()
            .with_channel("C7", "general")
            .with_channel("C8", "general");
        let conn = connect(&platform).await;

        assert_eq!(conn.channel_id(), "C7");
    }

    #[tokio::test]
    async fn test_connect_unknown_channel_fails() {
        let platform = platform();
        let result = ChannelConnection::connect(&config("missing"), Arc::new(platform.clone())).await;

        match result {
            Err(MirrorError::ChannelNotFound { domain, channel }) => {
                assert_eq!(domain, "acme");
                assert_eq!(channel, "missing");
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("connected to a channel that does not exist"),
        }
        assert_eq!(platform.opened_streams(), 0);
    }

    #[tokio::test]
    async fn test_fetch_queues_enriched_messages() {
        let platform = platform();
        let mut conn = connect(&platform).await;

        platform.push_message("C1", "U1", "hey <@U2|bob>");
        platform.push_message("C1", "U2", "hi alice");

        assert_eq!(conn.fetch_messages().await.unwrap(), 2);

        let pending = conn.pending();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].text, "hey @bob");
        assert_eq!(pending[0].raw_text, "hey <@U2|bob>");
        assert_eq!(pending[0].author.name, "alice");
        assert_eq!(
            pending[0].author.avatar_url.as_deref(),
            Some("https://avatars.example/alice.png")
        );
        assert_eq!(pending[0].origin_channel_id, "C1");
        assert_eq!(pending[1].author.name, "bob");
        // U1 and U2 each looked up once
        assert_eq!(platform.lookups(), vec!["U1", "U2"]);
    }

    #[tokio::test]
    async fn test_fetch_filters_foreign_and_system_events() {
        let platform = platform();
        let mut conn = connect(&platform).await;

        platform.push_message("C0", "U1", "other channel");
        platform.push_event(PlatformEvent {
            kind: Some("user_typing".to_string()),
            channel: Some("C1".to_string()),
            user: Some("U1".to_string()),
            ..PlatformEvent::default()
        });
        platform.push_event(PlatformEvent {
            kind: Some("message".to_string()),
            subtype: Some("bot_message".to_string()),
            channel: Some("C1".to_string()),
            text: Some("relayed from elsewhere".to_string()),
            ..PlatformEvent::default()
        });

        assert_eq!(conn.fetch_messages().await.unwrap(), 0);
        assert!(conn.pending().is_empty());
        assert!(platform.lookups().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_drops_message_with_unknown_author() {
        let platform = platform();
        let mut conn = connect(&platform).await;

        platform.push_message("C1", "UGHOST", "boo");
        platform.push_message("C1", "U1", "still here");

        assert_eq!(conn.fetch_messages().await.unwrap(), 1);
        assert_eq!(conn.pending()[0].text, "still here");
    }

    #[tokio::test]
    async fn test_fetch_with_nothing_new() {
        let platform = platform();
        let mut conn = connect(&platform).await;

        assert_eq!(conn.fetch_messages().await.unwrap(), 0);
        assert!(conn.pending().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_reopens_lost_connection() {
        let platform = platform();
        let mut conn = connect(&platform).await;

        platform.disconnect();
        platform.push_message("C1", "U1", "after reconnect");

        assert_eq!(conn.fetch_messages().await.unwrap(), 1);
        assert_eq!(platform.opened_streams(), 2);
    }

    #[tokio::test]
    async fn test_fetch_reports_failed_reconnect() {
        let platform = platform();
        let mut conn = connect(&platform).await;

        platform.disconnect();
        platform.set_fail_open(true);

        assert!(conn.fetch_messages().await.is_err());

        platform.set_fail_open(false);
        assert_eq!(conn.fetch_messages().await.unwrap(), 0);
        assert!(platform.is_connected());
    }

    #[tokio::test]
    async fn test_take_pending_empties_queue() {
        let platform = platform();
        let mut conn = connect(&platform).await;
        platform.push_message("C1", "U1", "one");
        conn.fetch_messages().await.unwrap();

        let taken = conn.take_pending();

        assert_eq!(taken.len(), 1);
        assert!(conn.pending().is_empty());
    }

    #[tokio::test]
    async fn test_send_message_uses_author_identity() {
        let platform = platform();
        let conn = connect(&platform).await;
        let message = Message {
            origin_channel_id: "CX".to_string(),
            raw_text: "hello".to_string(),
            text: "hello".to_string(),
            author: mirror_core::UserRef {
                id: "U9".to_string(),
                name: "carol".to_string(),
                avatar_url: Some("https://img/carol.png".to_string()),
            },
            ts: None,
        };

        conn.send_message(&message).await.unwrap();

        let posts = platform.posts();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].channel, "C1");
        assert_eq!(posts[0].text, "hello");
        assert_eq!(posts[0].username, "carol");
        assert_eq!(posts[0].icon_url.as_deref(), Some("https://img/carol.png"));
    }

    #[tokio::test]
    async fn test_close_and_drop_release_stream() {
        let platform = platform();
        let mut conn = connect(&platform).await;

        conn.close();
        assert!(!platform.is_connected());
        assert_eq!(platform.closed_streams(), 1);

        drop(conn);
        assert_eq!(platform.closed_streams(), 1);
    }
}
