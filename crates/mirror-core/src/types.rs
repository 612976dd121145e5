//! Typed records for configuration, platform payloads and relayed messages

use std::fmt;

use serde::{Deserialize, Serialize};

/// One mirrored channel, fully resolved. Immutable once loaded.
#[derive(Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub domain: String,
    pub channel: String,
    pub credential: String,
}

impl fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelConfig")
            .field("domain", &self.domain)
            .field("channel", &self.channel)
            .field("credential", &"[redacted]")
            .finish()
    }
}

/// Entry of the platform's channel listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
}

/// Who the credential authenticated as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthIdentity {
    pub team: String,
    pub user_id: String,
}

/// Profile returned by a user lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    /// Largest avatar image the platform offers.
    pub avatar_url: Option<String>,
}

/// Author identity attached to a relayed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRef {
    pub id: String,
    pub name: String,
    pub avatar_url: Option<String>,
}

impl From<UserProfile> for UserRef {
    fn from(profile: UserProfile) -> Self {
        Self {
            id: profile.id,
            name: profile.name,
            avatar_url: profile.avatar_url,
        }
    }
}

/// A frame from the real-time event stream.
///
/// Every field is optional so that any frame (hello, typing, reply acks)
/// decodes; shape checks happen in [`PlatformEvent::as_channel_message`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformEvent {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<String>,
}

/// The parts of a user-authored message event the relay needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncomingText<'a> {
    pub user: &'a str,
    pub text: &'a str,
    pub ts: Option<&'a str>,
}

impl PlatformEvent {
    pub const MESSAGE: &'static str = "message";

    /// A user-authored message event in `channel_id`, or `None`.
    ///
    /// Events of another type, in another channel, without a user (system
    /// and bot posts, including our own relayed posts) or without text are
    /// excluded.
    pub fn as_channel_message(&self, channel_id: &str) -> Option<IncomingText<'_>> {
        if self.kind.as_deref() != Some(Self::MESSAGE) {
            return None;
        }
        if self.channel.as_deref() != Some(channel_id) {
            return None;
        }
        let user = self.user.as_deref().filter(|u| !u.is_empty())?;
        let text = self.text.as_deref()?;
        Some(IncomingText {
            user,
            text,
            ts: self.ts.as_deref(),
        })
    }
}

/// A fetched message waiting to be relayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub origin_channel_id: String,
    pub raw_text: String,
    /// Text after mention rewriting.
    pub text: String,
    pub author: UserRef,
    pub ts: Option<String>,
}

/// A post made on behalf of someone else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingPost {
    pub channel: String,
    pub text: String,
    pub username: String,
    pub icon_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(json: &str) -> PlatformEvent {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_message_event_in_channel_is_accepted() {
        let ev = event(r#"{"type":"message","channel":"C1","user":"U1","text":"hi","ts":"1.2"}"#);
        let incoming = ev.as_channel_message("C1").unwrap();
        assert_eq!(incoming.user, "U1");
        assert_eq!(incoming.text, "hi");
        assert_eq!(incoming.ts, Some("1.2"));
    }

    #[test]
    fn test_non_message_events_are_filtered() {
        let typing = event(r#"{"type":"user_typing","channel":"C1","user":"U1"}"#);
        assert!(typing.as_channel_message("C1").is_none());

        let hello = event(r#"{"type":"hello"}"#);
        assert!(hello.as_channel_message("C1").is_none());

        let ack = event(r#"{"ok":true,"reply_to":1,"ts":"1.0","text":"x"}"#);
        assert!(ack.as_channel_message("C1").is_none());
    }

    #[test]
    fn test_other_channel_is_filtered() {
        let ev = event(r#"{"type":"message","channel":"C2","user":"U1","text":"hi"}"#);
        assert!(ev.as_channel_message("C1").is_none());
    }

    #[test]
    fn test_bot_posts_without_user_are_filtered() {
        let ev = event(
            r#"{"type":"message","subtype":"bot_message","channel":"C1","bot_id":"B1","username":"alice","text":"hi"}"#,
        );
        assert!(ev.as_channel_message("C1").is_none());
    }

    #[test]
    fn test_textless_message_is_filtered() {
        let ev = event(r#"{"type":"message","channel":"C1","user":"U1"}"#);
        assert!(ev.as_channel_message("C1").is_none());
    }

    #[test]
    fn test_channel_config_debug_hides_credential() {
        let config = ChannelConfig {
            domain: "acme".to_string(),
            channel: "general".to_string(),
            credential: "xoxb-secret".to_string(),
        };
        let shown = format!("{config:?}");
        assert!(shown.contains("acme"));
        assert!(!shown.contains("xoxb-secret"));
    }

    #[test]
    fn test_user_ref_from_profile() {
        let user = UserRef::from(UserProfile {
            id: "U1".to_string(),
            name: "alice".to_string(),
            avatar_url: Some("https://img/alice.png".to_string()),
        });
        assert_eq!(user.name, "alice");
        assert_eq!(user.avatar_url.as_deref(), Some("https://img/alice.png"));
    }
}
