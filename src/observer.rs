//! Read-only view of a conversation owned elsewhere
//!
//! The observer keeps a live transcript, merged statistics and the latest
//! takeover for a dashboard. Its state is published on a `watch` channel so
//! a UI can re-render on change.

use crate::conversation::{
    merge, ChatMessage, ConnectionState, StatisticsSnapshot, TakeoverInfo, TakeoverPayload,
};
use crate::error::Result;
use crate::stream::{StreamingTransport, TopicHandler, OBSERVER_TOPICS};
use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

/// Everything a dashboard shows for one conversation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObserverView {
    pub conversation_id: Option<String>,
    pub transcript: Vec<ChatMessage>,
    pub statistics: StatisticsSnapshot,
    pub takeover: Option<TakeoverInfo>,
    pub finalized: bool,
    pub connection_state: ConnectionState,
}

struct ObserverEvents {
    view: Arc<watch::Sender<ObserverView>>,
    initial_transcript: Vec<ChatMessage>,
}

#[async_trait::async_trait]
impl TopicHandler for ObserverEvents {
    // Relative times arrive from the backend ready for display
    async fn on_messages(&self, messages: Vec<ChatMessage>) {
        self.view.send_modify(|view| {
            view.transcript = merge(&view.transcript, &messages);
        });
    }

    async fn on_statistics(&self, update: Map<String, Value>) {
        self.view.send_modify(|view| view.statistics.merge(update));
    }

    async fn on_takeover(&self, takeover: TakeoverPayload) {
        self.view.send_modify(|view| {
            view.takeover = Some(TakeoverInfo {
                supervisor_id: takeover.supervisor_id,
                user_id: takeover.user_id,
                timestamp: Utc::now(),
            });
        });
    }

    async fn on_finalize(&self, _payload: Value) {
        self.view.send_modify(|view| view.finalized = true);
    }

    async fn on_connection_state(&self, state: ConnectionState) {
        self.view.send_modify(|view| {
            view.connection_state = state;
            // Every (re)open starts over from the known transcript
            if state == ConnectionState::Connected {
                view.transcript = self.initial_transcript.clone();
            }
        });
    }
}

/// Keeps an [`ObserverView`] in sync with one conversation at a time
pub struct ObserverSynchronizer {
    transport: Mutex<StreamingTransport>,
    view: Arc<watch::Sender<ObserverView>>,
    synchronizing: Mutex<Option<String>>,
}

impl ObserverSynchronizer {
    pub fn new(transport: StreamingTransport) -> Self {
        let (view, _) = watch::channel(ObserverView::default());
        Self {
            transport: Mutex::new(transport),
            view: Arc::new(view),
            synchronizing: Mutex::new(None),
        }
    }

    /// Follow `conversation_id`
    ///
    /// No-op when that conversation is already being followed over a live
    /// or connecting socket.
    pub async fn synchronize(
        &self,
        conversation_id: &str,
        initial_transcript: Option<Vec<ChatMessage>>,
    ) -> Result<()> {
        let mut synchronizing = self.synchronizing.lock().await;
        let mut transport = self.transport.lock().await;

        if synchronizing.as_deref() == Some(conversation_id)
            && transport.tracked_conversation().await.as_deref() == Some(conversation_id)
        {
            debug!("Already synchronizing conversation {}", conversation_id);
            return Ok(());
        }

        transport.disconnect().await;
        *synchronizing = None;

        let initial_transcript = initial_transcript.unwrap_or_default();
        self.view.send_replace(ObserverView {
            conversation_id: Some(conversation_id.to_string()),
            transcript: initial_transcript.clone(),
            ..ObserverView::default()
        });

        let handler = Arc::new(ObserverEvents {
            view: Arc::clone(&self.view),
            initial_transcript,
        });
        transport
            .connect(conversation_id, &OBSERVER_TOPICS, handler)
            .await?;

        info!("Synchronizing conversation {}", conversation_id);
        *synchronizing = Some(conversation_id.to_string());
        Ok(())
    }

    /// Stop following; a later `synchronize` for the same id reconnects
    pub async fn cancel(&self) {
        let mut synchronizing = self.synchronizing.lock().await;
        self.transport.lock().await.disconnect().await;
        if let Some(id) = synchronizing.take() {
            info!("Stopped synchronizing conversation {}", id);
        }
    }

    pub async fn synchronizing(&self) -> Option<String> {
        self.synchronizing.lock().await.clone()
    }

    /// Current view snapshot
    pub fn view(&self) -> ObserverView {
        self.view.borrow().clone()
    }

    /// Receiver notified on every view change
    pub fn subscribe(&self) -> watch::Receiver<ObserverView> {
        self.view.subscribe()
    }
}
