//! Chat platform abstraction
//!
//! The relay only talks to a platform through these traits. The Slack
//! implementation lives in `mirror-channels`; tests use
//! [`FakePlatform`](crate::testing::FakePlatform).

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{AuthIdentity, ChannelInfo, OutgoingPost, PlatformEvent, UserProfile};

/// Web API operations for one credential in one domain
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Verify the credential
    async fn authenticate(&self) -> Result<AuthIdentity>;

    /// Every channel visible to the credential, in platform order
    async fn list_channels(&self) -> Result<Vec<ChannelInfo>>;

    /// Open the real-time event connection
    async fn open_events(&self) -> Result<Box<dyn EventStream>>;

    /// Look up a user's display name and avatar
    async fn user_info(&self, user_id: &str) -> Result<UserProfile>;

    /// Post `post.text` displayed as `post.username` with `post.icon_url`
    async fn post_message(&self, post: &OutgoingPost) -> Result<()>;
}

/// A live real-time connection.
///
/// Implementations release the connection on drop as well as on `close`.
pub trait EventStream: Send {
    /// Everything queued since the last drain. Never blocks.
    ///
    /// Returns [`MirrorError::ConnectionClosed`](crate::MirrorError::ConnectionClosed)
    /// once the connection is gone and nothing is left to drain.
    fn drain(&mut self) -> Result<Vec<PlatformEvent>>;

    /// Release the connection. Safe to call more than once.
    fn close(&mut self);
}
