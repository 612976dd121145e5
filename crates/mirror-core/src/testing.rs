//! In-memory platform for tests (feature `test-util`)

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::{MirrorError, Result};
use crate::platform::{ChatPlatform, EventStream};
use crate::types::{AuthIdentity, ChannelInfo, OutgoingPost, PlatformEvent, UserProfile};

#[derive(Default)]
struct State {
    channels: Vec<ChannelInfo>,
    users: HashMap<String, UserProfile>,
    events: VecDeque<PlatformEvent>,
    live_stream: Option<u64>,
    next_stream: u64,
    opened: usize,
    closed: usize,
    lookups: Vec<String>,
    posts: Vec<OutgoingPost>,
    fail_posts: bool,
    fail_open: bool,
}

/// Scriptable [`ChatPlatform`] that records every lookup and post.
///
/// Clones share state, so a test can keep one handle while the code under
/// test owns another.
#[derive(Clone, Default)]
pub struct FakePlatform {
    state: Arc<Mutex<State>>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("fake platform state poisoned")
    }

    pub fn with_channel(self, id: &str, name: &str) -> Self {
        self.state().channels.push(ChannelInfo {
            id: id.to_string(),
            name: name.to_string(),
        });
        self
    }

    pub fn with_user(self, id: &str, name: &str) -> Self {
        self.state().users.insert(
            id.to_string(),
            UserProfile {
                id: id.to_string(),
                name: name.to_string(),
                avatar_url: Some(format!("https://avatars.example/{name}.png")),
            },
        );
        self
    }

    /// Queue a user message on the live connection.
    pub fn push_message(&self, channel: &str, user: &str, text: &str) {
        self.push_event(PlatformEvent {
            kind: Some(PlatformEvent::MESSAGE.to_string()),
            channel: Some(channel.to_string()),
            user: Some(user.to_string()),
            text: Some(text.to_string()),
            ..PlatformEvent::default()
        });
    }

    pub fn push_event(&self, event: PlatformEvent) {
        self.state().events.push_back(event);
    }

    /// Drop the live connection as if the server hung up.
    pub fn disconnect(&self) {
        self.state().live_stream = None;
    }

    pub fn set_fail_posts(&self, fail: bool) {
        self.state().fail_posts = fail;
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.state().fail_open = fail;
    }

    /// User ids passed to `user_info`, in call order.
    pub fn lookups(&self) -> Vec<String> {
        self.state().lookups.clone()
    }

    pub fn posts(&self) -> Vec<OutgoingPost> {
        self.state().posts.clone()
    }

    pub fn opened_streams(&self) -> usize {
        self.state().opened
    }

    pub fn closed_streams(&self) -> usize {
        self.state().closed
    }

    pub fn is_connected(&self) -> bool {
        self.state().live_stream.is_some()
    }
}

#[async_trait]
impl ChatPlatform for FakePlatform {
    async fn authenticate(&self) -> Result<AuthIdentity> {
        Ok(AuthIdentity {
            team: "fake".to_string(),
            user_id: "UBOT".to_string(),
        })
    }

    async fn list_channels(&self) -> Result<Vec<ChannelInfo>> {
        Ok(self.state().channels.clone())
    }

    async fn open_events(&self) -> Result<Box<dyn EventStream>> {
        let mut state = self.state();
        if state.fail_open {
            return Err(MirrorError::transport("rtm.connect", "connection refused"));
        }
        let id = state.next_stream;
        state.next_stream += 1;
        state.live_stream = Some(id);
        state.opened += 1;
        Ok(Box::new(FakeEventStream {
            state: Arc::clone(&self.state),
            id,
        }))
    }

    async fn user_info(&self, user_id: &str) -> Result<UserProfile> {
        let mut state = self.state();
        state.lookups.push(user_id.to_string());
        state
            .users
            .get(user_id)
            .cloned()
            .ok_or_else(|| MirrorError::platform("users.info", "user_not_found"))
    }

    async fn post_message(&self, post: &OutgoingPost) -> Result<()> {
        let mut state = self.state();
        if state.fail_posts {
            return Err(MirrorError::platform("chat.postMessage", "ratelimited"));
        }
        state.posts.push(post.clone());
        Ok(())
    }
}

struct FakeEventStream {
    state: Arc<Mutex<State>>,
    id: u64,
}

impl EventStream for FakeEventStream {
    fn drain(&mut self) -> Result<Vec<PlatformEvent>> {
        let mut state = self.state.lock().expect("fake platform state poisoned");
        if state.live_stream != Some(self.id) {
            return Err(MirrorError::ConnectionClosed);
        }
        Ok(state.events.drain(..).collect())
    }

    fn close(&mut self) {
        let mut state = self.state.lock().expect("fake platform state poisoned");
        if state.live_stream == Some(self.id) {
            state.live_stream = None;
            state.closed += 1;
        }
    }
}

impl Drop for FakeEventStream {
    fn drop(&mut self) {
        self.close();
    }
}
