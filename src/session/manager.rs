use super::store::{FileSessionStore, SessionStore};
use crate::api::{
    ConversationApi, HttpConversationApi, StartConversationRequest, UpdateConversationRequest,
};
use crate::config::Config;
use crate::conversation::{
    append_new, normalize, now_seconds, ChatMessage, ConnectionState, Conversation, Speaker,
    TakeoverPayload,
};
use crate::error::{Result, SyncError};
use crate::stream::{
    StreamingTransport, TopicHandler, TransportSettings, WebSocketConnector, PARTICIPANT_TOPICS,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const TAKEOVER_NOTICE: &str = "A supervisor has taken over the conversation.";
pub const FINALIZE_NOTICE: &str = "The conversation has been finalized.";

/// Receives messages newly added to the transcript
pub type MessageHandler = Box<dyn Fn(&[ChatMessage]) + Send + Sync>;
pub type TakeoverHandler = Box<dyn Fn(&TakeoverPayload) + Send + Sync>;
pub type FinalizeHandler = Box<dyn Fn(&Conversation) + Send + Sync>;
pub type ConnectionStateHandler = Box<dyn Fn(ConnectionState) + Send + Sync>;

/// What [`ConversationSessionManager::resume`] found in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// Nothing stored
    Fresh,
    /// Reconnected to a live conversation
    Resumed(String),
    /// Stored conversation is finalized; no connection opened
    ReadOnly(String),
}

/// Contextual identifiers sent with every conversation start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StartContext {
    pub operator_id: Uuid,
    pub data_source_id: Uuid,
}

/// One slot per event; setting a handler replaces the previous one
#[derive(Default)]
struct Handlers {
    message: Option<MessageHandler>,
    takeover: Option<TakeoverHandler>,
    finalize: Option<FinalizeHandler>,
    connection_state: Option<ConnectionStateHandler>,
}

/// State shared between the manager and its connection task
struct Shared {
    store: Arc<dyn SessionStore>,
    conversation: Mutex<Option<Conversation>>,
    transcript: Mutex<Vec<ChatMessage>>,
    suggested_queries: Mutex<Vec<String>>,
    connection_state: Mutex<ConnectionState>,
    handlers: Mutex<Handlers>,
}

impl Shared {
    /// The single path every message takes into the transcript
    async fn deliver(&self, messages: Vec<ChatMessage>) {
        let added = {
            let mut transcript = self.transcript.lock().await;
            append_new(&mut transcript, &messages)
        };
        if added.is_empty() {
            debug!("All {} incoming message(s) already known", messages.len());
            return;
        }

        let handlers = self.handlers.lock().await;
        if let Some(handler) = handlers.message.as_ref() {
            handler(&added);
        }
    }

    /// Synthetic `special` message stamped now
    async fn notice(&self, text: &str) -> ChatMessage {
        let now = now_seconds();
        let anchor = self
            .conversation
            .lock()
            .await
            .as_ref()
            .map(|c| c.create_time)
            .unwrap_or(now);
        normalize(ChatMessage::instant(Speaker::Special, text, now), anchor)
    }
}

/// Socket events for the participant, bound to the conversation the
/// socket was opened for
struct ParticipantEvents {
    shared: Arc<Shared>,
    conversation_id: String,
}

impl ParticipantEvents {
    /// Events from a socket whose conversation was replaced are dropped
    async fn is_current(&self) -> bool {
        let current = self
            .shared
            .conversation
            .lock()
            .await
            .as_ref()
            .is_some_and(|c| c.id == self.conversation_id);
        if !current {
            debug!("Dropping event for stale conversation {}", self.conversation_id);
        }
        current
    }
}

#[async_trait::async_trait]
impl TopicHandler for ParticipantEvents {
    async fn on_messages(&self, messages: Vec<ChatMessage>) {
        if self.is_current().await {
            self.shared.deliver(messages).await;
        }
    }

    async fn on_takeover(&self, takeover: TakeoverPayload) {
        if !self.is_current().await {
            return;
        }
        info!(
            "Conversation taken over (supervisor={:?}, user={:?})",
            takeover.supervisor_id, takeover.user_id
        );
        let notice = self.shared.notice(TAKEOVER_NOTICE).await;
        self.shared.deliver(vec![notice]).await;

        let handlers = self.shared.handlers.lock().await;
        if let Some(handler) = handlers.takeover.as_ref() {
            handler(&takeover);
        }
    }

    async fn on_finalize(&self, _payload: Value) {
        let finalized = {
            let mut conversation = self.shared.conversation.lock().await;
            match conversation.as_mut() {
                Some(c) if c.id != self.conversation_id => {
                    debug!("Dropping finalize for stale conversation {}", self.conversation_id);
                    return;
                }
                Some(c) if !c.finalized => {
                    c.finalized = true;
                    self.shared.store.save(c);
                    c.clone()
                }
                Some(_) => {
                    debug!("Ignoring repeated finalize");
                    return;
                }
                None => {
                    warn!("Finalize received without an active conversation");
                    return;
                }
            }
        };
        info!("Conversation {} finalized", finalized.id);

        {
            let handlers = self.shared.handlers.lock().await;
            if let Some(handler) = handlers.finalize.as_ref() {
                handler(&finalized);
            }
        }

        let notice = self.shared.notice(FINALIZE_NOTICE).await;
        self.shared.deliver(vec![notice]).await;
    }

    async fn on_connection_state(&self, state: ConnectionState) {
        *self.shared.connection_state.lock().await = state;

        let handlers = self.shared.handlers.lock().await;
        if let Some(handler) = handlers.connection_state.as_ref() {
            handler(state);
        }
    }
}

/// Participant side of a conversation: start or resume, send, receive
pub struct ConversationSessionManager {
    api: Arc<dyn ConversationApi>,
    transport: Mutex<StreamingTransport>,
    shared: Arc<Shared>,
    context: StartContext,
}

impl ConversationSessionManager {
    pub fn new(
        api: Arc<dyn ConversationApi>,
        store: Arc<dyn SessionStore>,
        transport: StreamingTransport,
        context: StartContext,
    ) -> Self {
        let shared = Arc::new(Shared {
            store,
            conversation: Mutex::new(None),
            transcript: Mutex::new(Vec::new()),
            suggested_queries: Mutex::new(Vec::new()),
            connection_state: Mutex::new(ConnectionState::Disconnected),
            handlers: Mutex::new(Handlers::default()),
        });
        Self {
            api,
            transport: Mutex::new(transport),
            shared,
            context,
        }
    }

    /// Construct and immediately [`resume`](Self::resume)
    pub async fn restore(
        api: Arc<dyn ConversationApi>,
        store: Arc<dyn SessionStore>,
        transport: StreamingTransport,
        context: StartContext,
    ) -> Result<(Self, ResumeOutcome)> {
        let manager = Self::new(api, store, transport, context);
        let outcome = manager.resume().await?;
        Ok((manager, outcome))
    }

    /// Production wiring: reqwest API, WebSocket transport, file-backed store
    pub async fn from_config(config: &Config) -> Result<(Self, ResumeOutcome)> {
        let api = Arc::new(HttpConversationApi::new(&config.backend)?);
        let store = Arc::new(FileSessionStore::new(
            config.session.resolved_dir(),
            &config.session.key,
        ));
        let connector = Arc::new(WebSocketConnector::new(Duration::from_secs(
            config.streaming.connect_timeout_secs,
        )));
        let transport = StreamingTransport::new(
            TransportSettings::from_config(&config.backend, &config.streaming)?,
            connector,
        );
        let context = StartContext {
            operator_id: config.backend.operator_id,
            data_source_id: config.backend.data_source_id,
        };

        Self::restore(api, store, transport, context).await
    }

    /// Create a conversation and connect to it
    ///
    /// A welcome message from the backend is delivered as an `agent` message
    /// at relative time 0 through the regular message handler.
    pub async fn start(&self) -> Result<String> {
        let request =
            StartConversationRequest::new(self.context.operator_id, self.context.data_source_id);
        let response = self.api.start_conversation(&request).await?;

        // The previous socket must be gone before its conversation is replaced
        self.transport.lock().await.disconnect().await;

        let conversation = Conversation::new(
            response.conversation_id.clone(),
            response.create_time.unwrap_or_else(now_seconds),
        );
        info!("Starting conversation {}", conversation.id);

        self.shared.store.save(&conversation);
        *self.shared.conversation.lock().await = Some(conversation.clone());
        self.shared.transcript.lock().await.clear();
        *self.shared.suggested_queries.lock().await =
            response.agent_possible_queries.unwrap_or_default();

        self.connect(&conversation.id).await?;

        if let Some(welcome) = response.agent_welcome_message.filter(|w| !w.is_empty()) {
            let message = normalize(
                ChatMessage::instant(Speaker::Agent, welcome, conversation.create_time),
                conversation.create_time,
            );
            self.shared.deliver(vec![message]).await;
        }

        Ok(conversation.id)
    }

    /// Pick up the stored conversation, if any
    pub async fn resume(&self) -> Result<ResumeOutcome> {
        let Some(conversation) = self.shared.store.load() else {
            debug!("No stored conversation to resume");
            return Ok(ResumeOutcome::Fresh);
        };

        let id = conversation.id.clone();
        let finalized = conversation.finalized;
        *self.shared.conversation.lock().await = Some(conversation);

        if finalized {
            info!("Stored conversation {} is finalized, read-only", id);
            return Ok(ResumeOutcome::ReadOnly(id));
        }

        info!("Resuming conversation {}", id);
        self.connect(&id).await?;
        Ok(ResumeOutcome::Resumed(id))
    }

    /// Re-open the socket after a disconnect; no-op while one is open
    pub async fn reconnect(&self) -> Result<()> {
        let conversation = self.active_conversation().await.ok_or(SyncError::NotStarted)?;
        self.connect(&conversation.id).await
    }

    /// Send one customer message
    ///
    /// The message is not added to the local transcript; it comes back over
    /// the socket.
    pub async fn send_message(&self, text: &str) -> Result<()> {
        let conversation = self.active_conversation().await.ok_or(SyncError::NotStarted)?;
        if text.trim().is_empty() {
            return Err(SyncError::EmptyMessage);
        }

        let message = normalize(
            ChatMessage::instant(Speaker::Customer, text, now_seconds()),
            conversation.create_time,
        );
        let request = UpdateConversationRequest {
            messages: vec![message],
        };

        self.api.update_conversation(&conversation.id, &request).await
    }

    /// Drop the conversation, the socket and the stored record
    pub async fn reset(&self) {
        self.transport.lock().await.disconnect().await;

        if let Some(conversation) = self.shared.conversation.lock().await.take() {
            info!("Reset conversation {}", conversation.id);
        }
        self.shared.store.clear();
        self.shared.suggested_queries.lock().await.clear();
        self.shared.transcript.lock().await.clear();
    }

    pub async fn set_message_handler(&self, handler: impl Fn(&[ChatMessage]) + Send + Sync + 'static) {
        self.shared.handlers.lock().await.message = Some(Box::new(handler));
    }

    pub async fn set_takeover_handler(
        &self,
        handler: impl Fn(&TakeoverPayload) + Send + Sync + 'static,
    ) {
        self.shared.handlers.lock().await.takeover = Some(Box::new(handler));
    }

    pub async fn set_finalize_handler(&self, handler: impl Fn(&Conversation) + Send + Sync + 'static) {
        self.shared.handlers.lock().await.finalize = Some(Box::new(handler));
    }

    pub async fn set_connection_state_handler(
        &self,
        handler: impl Fn(ConnectionState) + Send + Sync + 'static,
    ) {
        self.shared.handlers.lock().await.connection_state = Some(Box::new(handler));
    }

    pub async fn conversation(&self) -> Option<Conversation> {
        self.shared.conversation.lock().await.clone()
    }

    pub async fn transcript(&self) -> Vec<ChatMessage> {
        self.shared.transcript.lock().await.clone()
    }

    pub async fn suggested_queries(&self) -> Vec<String> {
        self.shared.suggested_queries.lock().await.clone()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.shared.connection_state.lock().await
    }

    /// A finalized conversation is loaded
    pub async fn is_read_only(&self) -> bool {
        self.shared
            .conversation
            .lock()
            .await
            .as_ref()
            .is_some_and(|c| c.finalized)
    }

    async fn active_conversation(&self) -> Option<Conversation> {
        self.shared
            .conversation
            .lock()
            .await
            .clone()
            .filter(|c| !c.finalized)
    }

    async fn connect(&self, conversation_id: &str) -> Result<()> {
        let handler: Arc<dyn TopicHandler> = Arc::new(ParticipantEvents {
            shared: Arc::clone(&self.shared),
            conversation_id: conversation_id.to_string(),
        });
        self.transport
            .lock()
            .await
            .connect(conversation_id, &PARTICIPANT_TOPICS, handler)
            .await
    }
}
