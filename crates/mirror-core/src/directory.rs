//! Per-connection user lookup with a small LRU cache

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use tracing::debug;

use crate::error::Result;
use crate::platform::ChatPlatform;
use crate::types::UserRef;

/// Enough for the recently active speakers of one channel.
pub const USER_CACHE_CAPACITY: usize = 16;

/// Resolves user ids to names and avatars.
///
/// A cached entry is reused until it is evicted, so a renamed user keeps the
/// old name for a while.
pub struct UserDirectory {
    platform: Arc<dyn ChatPlatform>,
    cache: LruCache<String, UserRef>,
}

impl UserDirectory {
    pub fn new(platform: Arc<dyn ChatPlatform>) -> Self {
        Self::with_capacity(platform, USER_CACHE_CAPACITY)
    }

    pub fn with_capacity(platform: Arc<dyn ChatPlatform>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            platform,
            cache: LruCache::new(capacity),
        }
    }

    /// Cached profile for `user_id`, or one network lookup on a miss
    pub async fn resolve(&mut self, user_id: &str) -> Result<UserRef> {
        if let Some(user) = self.cache.get(user_id) {
            return Ok(user.clone());
        }

        let user = UserRef::from(self.platform.user_info(user_id).await?);
        debug!(action = "fetch.userinfo", user = user_id);
        self.cache.put(user_id.to_string(), user.clone());
        Ok(user)
    }

    pub fn is_cached(&self, user_id: &str) -> bool {
        self.cache.contains(user_id)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cache.cap().get()
    }
}
