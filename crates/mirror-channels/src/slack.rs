//! Slack channel adapter
//!
//! Web API calls go through `reqwest`; the real-time stream is the RTM
//! websocket, read by a background task into an unbounded queue so that
//! draining never blocks.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use mirror_core::{
    AuthIdentity, ChannelInfo, ChatPlatform, EventStream, MirrorError, OutgoingPost,
    PlatformEvent, Result, UserProfile,
};

pub const SLACK_API: &str = "https://slack.com/api";

/// conversations.list pages followed before giving up (50 x 200 channels)
const MAX_PAGES: usize = 50;
const PAGE_SIZE: &str = "200";

/// Upper bound on the websocket handshake, matching the HTTP client timeout
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Install the ring crypto provider used for `wss://` connections.
///
/// Safe to call more than once; later calls are no-ops.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

#[derive(Debug, Deserialize)]
struct AuthTest {
    #[serde(default)]
    team: String,
    #[serde(default)]
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct ConversationsPage {
    #[serde(default)]
    channels: Vec<ChannelInfo>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

#[derive(Debug, Deserialize)]
struct UsersInfo {
    user: SlackUser,
}

#[derive(Debug, Deserialize)]
struct SlackUser {
    id: String,
    name: String,
    #[serde(default)]
    profile: SlackUserProfile,
}

#[derive(Debug, Default, Deserialize)]
struct SlackUserProfile {
    image_512: Option<String>,
    image_192: Option<String>,
    image_72: Option<String>,
}

impl From<SlackUser> for UserProfile {
    fn from(user: SlackUser) -> Self {
        let SlackUserProfile {
            image_512,
            image_192,
            image_72,
        } = user.profile;
        Self {
            id: user.id,
            name: user.name,
            avatar_url: image_512.or(image_192).or(image_72),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RtmConnect {
    url: String,
}

/// Slack Web API client for one workspace token
pub struct SlackPlatform {
    http: reqwest::Client,
    token: String,
    base_url: String,
}

impl SlackPlatform {
    pub fn new(token: impl Into<String>) -> Result<Self> {
        Self::with_base_url(token, SLACK_API)
    }

    /// Point the client at another API root (used by tests)
    pub fn with_base_url(token: impl Into<String>, base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| MirrorError::Config(format!("invalid Slack API URL {base_url}: {e}")))?;
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| MirrorError::transport("http client", e))?;

        Ok(Self {
            http,
            token: token.into(),
            base_url: base.as_str().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method)
    }

    async fn get<T: DeserializeOwned>(&self, method: &str, query: &[(&str, &str)]) -> Result<T> {
        let request = self.http.get(self.endpoint(method)).query(query);
        self.call(method, request).await
    }

    async fn post<T: DeserializeOwned>(&self, method: &str, body: &Value) -> Result<T> {
        let request = self.http.post(self.endpoint(method)).json(body);
        self.call(method, request).await
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, request: RequestBuilder) -> Result<T> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| MirrorError::transport(method, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| MirrorError::transport(method, e))?;

        parse_response(method, status, &body)
    }
}

/// Check HTTP status and Slack's `ok` flag, then decode the payload
fn parse_response<T: DeserializeOwned>(method: &str, status: StatusCode, body: &str) -> Result<T> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(MirrorError::platform(method, "ratelimited"));
    }
    if !status.is_success() {
        return Err(MirrorError::platform(method, format!("HTTP {status}: {body}")));
    }

    let value: Value = serde_json::from_str(body).map_err(|e| MirrorError::decode(method, e))?;

    // Slack answers 200 for most application errors
    if value.get("ok") != Some(&Value::Bool(true)) {
        let error = value
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        return Err(MirrorError::platform(method, error));
    }

    serde_json::from_value(value).map_err(|e| MirrorError::decode(method, e))
}

/// JSON body for `chat.postMessage`, posting under someone else's name
fn post_body(post: &OutgoingPost) -> Value {
    let mut body = json!({
        "channel": post.channel,
        "text": post.text,
        "username": post.username,
    });
    if let Some(ref icon_url) = post.icon_url {
        body["icon_url"] = json!(icon_url);
    }
    body
}

/// The RTM URL must be a websocket URL
fn validate_ws_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| MirrorError::decode("rtm.connect", e))?;
    match url.scheme() {
        "wss" | "ws" => Ok(url),
        other => Err(MirrorError::decode(
            "rtm.connect",
            format!("expected a websocket URL, got scheme '{other}'"),
        )),
    }
}

#[async_trait]
impl ChatPlatform for SlackPlatform {
    async fn authenticate(&self) -> Result<AuthIdentity> {
        let auth: AuthTest = self.get("auth.test", &[]).await?;
        Ok(AuthIdentity {
            team: auth.team,
            user_id: auth.user_id,
        })
    }

    async fn list_channels(&self) -> Result<Vec<ChannelInfo>> {
        let mut channels = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let page: ConversationsPage = {
                let mut query = vec![
                    ("types", "public_channel,private_channel"),
                    ("exclude_archived", "true"),
                    ("limit", PAGE_SIZE),
                ];
                if let Some(ref next) = cursor {
                    query.push(("cursor", next.as_str()));
                }
                self.get("conversations.list", &query).await?
            };
            channels.extend(page.channels);

            cursor = page
                .response_metadata
                .map(|m| m.next_cursor)
                .filter(|c| !c.trim().is_empty());
            if cursor.is_none() {
                return Ok(channels);
            }
        }

        warn!(
            pages = MAX_PAGES,
            "Slack: conversations.list page limit reached; channel list may be incomplete"
        );
        Ok(channels)
    }

    async fn open_events(&self) -> Result<Box<dyn EventStream>> {
        let rtm: RtmConnect = self.get("rtm.connect", &[]).await?;
        let url = validate_ws_url(&rtm.url)?;
        let stream = SlackEventStream::connect(&url).await?;
        Ok(Box::new(stream))
    }

    async fn user_info(&self, user_id: &str) -> Result<UserProfile> {
        let info: UsersInfo = self.get("users.info", &[("user", user_id)]).await?;
        Ok(info.user.into())
    }

    async fn post_message(&self, post: &OutgoingPost) -> Result<()> {
        let _: IgnoredAny = self.post("chat.postMessage", &post_body(post)).await?;
        Ok(())
    }
}

type RtmSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Live RTM connection. Closing or dropping it stops the reader task.
pub struct SlackEventStream {
    events: mpsc::UnboundedReceiver<PlatformEvent>,
    cancel: CancellationToken,
    closed: bool,
}

impl SlackEventStream {
    async fn connect(url: &Url) -> Result<Self> {
        Self::connect_within(url, HANDSHAKE_TIMEOUT).await
    }

    async fn connect_within(url: &Url, limit: Duration) -> Result<Self> {
        install_crypto_provider();

        let handshake = tokio_tungstenite::connect_async(url.as_str());
        let (socket, _) = tokio::time::timeout(limit, handshake)
            .await
            .map_err(|_| MirrorError::transport("rtm websocket", "timed out"))?
            .map_err(|e| MirrorError::transport("rtm websocket", e))?;
        info!("Slack: real-time connection open");

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        tokio::spawn(read_events(socket, tx, cancel.clone()));

        Ok(Self {
            events: rx,
            cancel,
            closed: false,
        })
    }
}

impl EventStream for SlackEventStream {
    fn drain(&mut self) -> Result<Vec<PlatformEvent>> {
        if self.closed {
            return Err(MirrorError::ConnectionClosed);
        }

        let mut events = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if events.is_empty() {
                        return Err(MirrorError::ConnectionClosed);
                    }
                    break;
                }
            }
        }
        Ok(events)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.cancel.cancel();
            self.events.close();
        }
    }
}

impl Drop for SlackEventStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Reader task: decode text frames into events until cancelled or disconnected.
///
/// Pings are answered by tungstenite itself while reading.
async fn read_events(
    socket: RtmSocket,
    tx: mpsc::UnboundedSender<PlatformEvent>,
    cancel: CancellationToken,
) {
    let (mut write, mut read) = socket.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = write.send(WsMessage::Close(None)).await;
                debug!("Slack: real-time connection closed locally");
                break;
            }

            frame = read.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Some(event) = decode_event(text.as_str()) {
                            if tx.send(event).is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        info!("Slack: real-time connection closed by server");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("Slack: real-time read error: {e}");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

fn decode_event(text: &str) -> Option<PlatformEvent> {
    match serde_json::from_str(text) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!("Slack: skipping undecodable frame: {e}");
            None
        }
    }
}
