use super::messages::Topic;
use super::router::{EventRouter, TopicHandler};
use crate::config::{BackendConfig, Credential, StreamingConfig};
use crate::conversation::ConnectionState;
use crate::error::{Result, SyncError};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

/// Close codes the backend uses for rejected credentials and permissions
const TERMINAL_CLOSE_CODES: [u16; 2] = [4401, 4403];

/// Something that happened on an open socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Text(String),
    Closed { code: Option<u16>, reason: String },
    Error(String),
}

/// Opens socket connections
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, url: &Url) -> Result<Box<dyn FrameStream>>;
}

/// One open socket
#[async_trait::async_trait]
pub trait FrameStream: Send {
    /// Next event; `None` once the connection is gone
    async fn next_event(&mut self) -> Option<StreamEvent>;

    /// Close locally
    async fn close(&mut self);
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// tokio-tungstenite [`Connector`]
pub struct WebSocketConnector {
    connect_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait::async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, url: &Url) -> Result<Box<dyn FrameStream>> {
        match tokio::time::timeout(self.connect_timeout, connect_async(url.as_str())).await {
            Ok(Ok((stream, _))) => Ok(Box::new(WebSocketFrames { stream })),
            Ok(Err(e)) => Err(SyncError::WebSocket(e.to_string())),
            Err(_) => Err(SyncError::WebSocket(format!(
                "Connection timeout after {:?}",
                self.connect_timeout
            ))),
        }
    }
}

struct WebSocketFrames {
    stream: WsStream,
}

#[async_trait::async_trait]
impl FrameStream for WebSocketFrames {
    async fn next_event(&mut self) -> Option<StreamEvent> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(StreamEvent::Text(text.as_str().to_owned())),
                Ok(Message::Ping(data)) => {
                    let _ = self.stream.send(Message::Pong(data)).await;
                }
                Ok(Message::Close(frame)) => {
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.as_str().to_owned()),
                        None => (None, String::new()),
                    };
                    return Some(StreamEvent::Closed { code, reason });
                }
                Ok(_) => {} // binary / pong / raw frames carry nothing for us
                Err(e) => return Some(StreamEvent::Error(e.to_string())),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}

/// Bounded exponential backoff between reconnect attempts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// 0 disables reconnection
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (0-indexed)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Where and how to open conversation sockets
#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// Base ending in `/`, e.g. `wss://host/api/v1/`
    pub base: Url,
    pub credential: Option<Credential>,
    pub tenant_id: Option<String>,
    pub lang: String,
    /// Requested name for [`Topic::Message`]
    pub message_topic: String,
    pub reconnect: ReconnectPolicy,
}

impl TransportSettings {
    pub fn new(base: &str, credential: Option<Credential>) -> Result<Self> {
        Ok(Self {
            base: socket_base(base)?,
            credential,
            tenant_id: None,
            lang: "en".to_string(),
            message_topic: Topic::Message.as_str().to_string(),
            reconnect: ReconnectPolicy::default(),
        })
    }

    /// Socket base from `streaming.base_url`, or derived from the REST base
    pub fn from_config(backend: &BackendConfig, streaming: &StreamingConfig) -> Result<Self> {
        let base = streaming.base_url.as_deref().unwrap_or(&backend.api_base);
        Ok(Self {
            base: socket_base(base)?,
            credential: backend.credential(),
            tenant_id: backend.tenant_id.clone(),
            lang: backend.lang.clone(),
            message_topic: streaming.message_topic.clone(),
            reconnect: ReconnectPolicy {
                max_attempts: streaming.max_reconnect_attempts,
                initial_delay: Duration::from_millis(streaming.reconnect_delay_ms),
                max_delay: Duration::from_millis(streaming.max_reconnect_delay_ms),
            },
        })
    }

    /// `{base}/conversations/ws/{id}?{auth}&lang=..&topics=..&topics=..`
    pub fn conversation_url(&self, conversation_id: &str, topics: &[Topic]) -> Result<Url> {
        let mut url = self.base.join(&format!("conversations/ws/{}", conversation_id))?;
        {
            let mut query = url.query_pairs_mut();
            match &self.credential {
                Some(Credential::ApiKey(key)) => {
                    query.append_pair("api_key", key);
                }
                Some(Credential::AccessToken(token)) => {
                    query.append_pair("access_token", token);
                }
                None => {}
            }
            query.append_pair("lang", &self.lang);
            for topic in topics {
                let name = match topic {
                    Topic::Message => self.message_topic.as_str(),
                    other => other.as_str(),
                };
                query.append_pair("topics", name);
            }
            if let Some(tenant) = &self.tenant_id {
                query.append_pair("X-Tenant-Id", tenant);
            }
        }
        Ok(url)
    }
}

/// Map `http(s)` to `ws(s)` and ensure a trailing slash
fn socket_base(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw)?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(SyncError::InvalidUrl(format!(
                "URL must use http(s):// or ws(s)://, got: {}",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| SyncError::InvalidUrl(raw.to_string()))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Id of the conversation a transport is attached to, tagged per connect call
#[derive(Debug, Clone)]
struct Tracked {
    generation: u64,
    conversation_id: String,
}

struct ActiveConnection {
    cancel: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Owns at most one live socket
///
/// Reconnection beyond [`ReconnectPolicy`] is left to the owner: once the
/// connection task gives up it clears the tracked id, so a later
/// [`connect`](Self::connect) for the same conversation opens a new socket.
pub struct StreamingTransport {
    settings: Arc<TransportSettings>,
    connector: Arc<dyn Connector>,
    tracked: Arc<Mutex<Option<Tracked>>>,
    active: Option<ActiveConnection>,
    generation: u64,
}

impl StreamingTransport {
    pub fn new(settings: TransportSettings, connector: Arc<dyn Connector>) -> Self {
        Self {
            settings: Arc::new(settings),
            connector,
            tracked: Arc::new(Mutex::new(None)),
            active: None,
            generation: 0,
        }
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    /// Conversation currently being established or open
    pub async fn tracked_conversation(&self) -> Option<String> {
        self.tracked
            .lock()
            .await
            .as_ref()
            .map(|t| t.conversation_id.clone())
    }

    /// Open a socket for `conversation_id`
    ///
    /// No-op while a socket for the same id is being established or open.
    /// Any other socket is closed first.
    pub async fn connect(
        &mut self,
        conversation_id: &str,
        topics: &[Topic],
        handler: Arc<dyn TopicHandler>,
    ) -> Result<()> {
        if self.tracked_conversation().await.as_deref() == Some(conversation_id) {
            debug!("Already connected to conversation {}", conversation_id);
            return Ok(());
        }

        self.disconnect().await;

        let url = self.settings.conversation_url(conversation_id, topics)?;

        self.generation += 1;
        let generation = self.generation;
        *self.tracked.lock().await = Some(Tracked {
            generation,
            conversation_id: conversation_id.to_string(),
        });

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let task = tokio::spawn(run_connection(
            url,
            conversation_id.to_string(),
            generation,
            Arc::clone(&self.connector),
            self.settings.reconnect.clone(),
            Arc::clone(&self.tracked),
            handler,
            cancel_rx,
        ));

        self.active = Some(ActiveConnection {
            cancel: cancel_tx,
            task,
        });

        Ok(())
    }

    /// Close the socket, if any. Safe to call repeatedly.
    pub async fn disconnect(&mut self) {
        if let Some(active) = self.active.take() {
            let _ = active.cancel.send(());
            if let Err(e) = active.task.await {
                warn!("Connection task ended abnormally: {}", e);
            }
        }
        *self.tracked.lock().await = None;
    }
}

enum PumpEnd {
    Cancelled,
    Closed { code: Option<u16> },
    Failed,
}

#[allow(clippy::too_many_arguments)]
async fn run_connection(
    url: Url,
    conversation_id: String,
    generation: u64,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    tracked: Arc<Mutex<Option<Tracked>>>,
    handler: Arc<dyn TopicHandler>,
    mut cancel: oneshot::Receiver<()>,
) {
    let mut attempt = 0;

    loop {
        handler.on_connection_state(ConnectionState::Connecting).await;
        info!("Connecting to conversation {} (attempt {})", conversation_id, attempt + 1);

        let opened = tokio::select! {
            _ = &mut cancel => {
                handler.on_connection_state(ConnectionState::Disconnected).await;
                return;
            }
            opened = connector.open(&url) => opened,
        };

        let mut retry = true;
        match opened {
            Ok(mut stream) => {
                attempt = 0;
                info!("Connected to conversation {}", conversation_id);
                handler.on_connection_state(ConnectionState::Connected).await;

                let end = pump(stream.as_mut(), &mut cancel, handler.as_ref()).await;
                handler.on_connection_state(ConnectionState::Disconnected).await;

                match end {
                    PumpEnd::Cancelled => {
                        info!("Closed connection to conversation {}", conversation_id);
                        return;
                    }
                    PumpEnd::Closed { code: Some(code) } if TERMINAL_CLOSE_CODES.contains(&code) => {
                        warn!(
                            "Conversation {} rejected the connection (code {})",
                            conversation_id, code
                        );
                        retry = false;
                    }
                    PumpEnd::Closed { .. } | PumpEnd::Failed => {}
                }
            }
            Err(e) => {
                warn!("Failed to connect to conversation {}: {}", conversation_id, e);
                handler.on_connection_state(ConnectionState::Disconnected).await;
            }
        }

        if !retry || attempt >= policy.max_attempts {
            break;
        }

        let delay = policy.delay(attempt);
        attempt += 1;
        debug!("Reconnecting to conversation {} in {:?}", conversation_id, delay);
        tokio::select! {
            _ = &mut cancel => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    // Give up: release the guard unless a newer connect already replaced it
    let mut guard = tracked.lock().await;
    if guard.as_ref().map(|t| t.generation) == Some(generation) {
        *guard = None;
    }
}

async fn pump(
    stream: &mut dyn FrameStream,
    cancel: &mut oneshot::Receiver<()>,
    handler: &dyn TopicHandler,
) -> PumpEnd {
    loop {
        tokio::select! {
            _ = &mut *cancel => {
                stream.close().await;
                return PumpEnd::Cancelled;
            }
            event = stream.next_event() => match event {
                Some(StreamEvent::Text(text)) => {
                    EventRouter::route(&text, handler).await;
                }
                Some(StreamEvent::Closed { code, reason }) => {
                    info!("Server closed connection (code={:?}, reason={})", code, reason);
                    return PumpEnd::Closed { code };
                }
                Some(StreamEvent::Error(e)) => {
                    warn!("WebSocket error: {}", e);
                    return PumpEnd::Failed;
                }
                None => return PumpEnd::Closed { code: None },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_url() {
        let mut settings = TransportSettings::new(
            "https://example.com/api/v1",
            Some(Credential::ApiKey("k1".to_string())),
        )
        .unwrap();
        settings.tenant_id = Some("acme".to_string());

        let url = settings
            .conversation_url("c1", &[Topic::Message, Topic::Finalize])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "wss://example.com/api/v1/conversations/ws/c1?api_key=k1&lang=en&topics=message&topics=finalize&X-Tenant-Id=acme"
        );
    }

    #[test]
    fn test_access_token_query() {
        let settings =
            TransportSettings::new("ws://localhost:8000", Some(Credential::AccessToken("t".to_string())))
                .unwrap();
        let url = settings.conversation_url("c2", &[]).unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8000/conversations/ws/c2?access_token=t&lang=en");
    }

    #[test]
    fn test_message_topic_name_from_config() {
        let backend = BackendConfig::default();
        let streaming = StreamingConfig {
            message_topic: "messages".to_string(),
            ..Default::default()
        };
        let settings = TransportSettings::from_config(&backend, &streaming).unwrap();

        let url = settings
            .conversation_url("c3", &[Topic::Message, Topic::Takeover])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "ws://localhost:8000/api/v1/conversations/ws/c3?lang=en&topics=messages&topics=takeover"
        );
    }

    #[test]
    fn test_rejects_unknown_scheme() {
        assert!(matches!(
            TransportSettings::new("ftp://example.com", None),
            Err(SyncError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_backoff_is_bounded() {
        let policy = ReconnectPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        };
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
        assert_eq!(policy.delay(9), Duration::from_secs(1));
    }
}
