// Shared fakes for the integration tests
//
// ChannelConnector stands in for the WebSocket: every `open` creates a
// channel the test pushes frames into. FakeApi records REST calls.

#![allow(dead_code)]

use async_trait::async_trait;
use convo_sync::api::{
    ConversationApi, StartConversationRequest, StartConversationResponse,
    UpdateConversationRequest,
};
use convo_sync::stream::{Connector, FrameStream, StreamEvent};
use convo_sync::{Result, SyncError};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

#[derive(Default)]
struct ConnectorState {
    urls: Vec<Url>,
    senders: Vec<mpsc::UnboundedSender<StreamEvent>>,
    closed: Arc<AtomicUsize>,
    refuse: bool,
}

#[derive(Clone, Default)]
pub struct ChannelConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl ChannelConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().urls.len()
    }

    pub fn urls(&self) -> Vec<Url> {
        self.state.lock().unwrap().urls.clone()
    }

    /// Sockets closed from the client side
    pub fn local_close_count(&self) -> usize {
        self.state.lock().unwrap().closed.load(Ordering::SeqCst)
    }

    /// Make every following `open` fail
    pub fn refuse_connections(&self) {
        self.state.lock().unwrap().refuse = true;
    }

    /// Send a text frame on the most recent socket
    pub fn push(&self, text: &str) {
        self.send(StreamEvent::Text(text.to_string()));
    }

    /// Server-side close of the most recent socket
    pub fn close_remote(&self, code: Option<u16>) {
        self.send(StreamEvent::Closed {
            code,
            reason: String::new(),
        });
    }

    fn send(&self, event: StreamEvent) {
        let state = self.state.lock().unwrap();
        let sender = state.senders.last().expect("no socket opened");
        sender.send(event).expect("socket already gone");
    }
}

#[async_trait]
impl Connector for ChannelConnector {
    async fn open(&self, url: &Url) -> Result<Box<dyn FrameStream>> {
        let mut state = self.state.lock().unwrap();
        state.urls.push(url.clone());
        if state.refuse {
            return Err(SyncError::WebSocket("connection refused".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.senders.push(tx);
        Ok(Box::new(ChannelFrames {
            rx,
            closed: Arc::clone(&state.closed),
        }))
    }
}

struct ChannelFrames {
    rx: mpsc::UnboundedReceiver<StreamEvent>,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl FrameStream for ChannelFrames {
    async fn next_event(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    async fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeApi {
    pub response: Mutex<StartConversationResponse>,
    pub starts: AtomicUsize,
    pub updates: Mutex<Vec<(String, UpdateConversationRequest)>>,
    pub fail: AtomicBool,
}

impl FakeApi {
    pub fn returning(conversation_id: &str, create_time: f64, welcome: Option<&str>) -> Self {
        let api = Self::default();
        *api.response.lock().unwrap() = StartConversationResponse {
            conversation_id: conversation_id.to_string(),
            create_time: Some(create_time),
            agent_welcome_message: welcome.map(str::to_string),
            agent_possible_queries: None,
        };
        api
    }

    pub fn sent(&self) -> Vec<(String, UpdateConversationRequest)> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConversationApi for FakeApi {
    async fn start_conversation(
        &self,
        _request: &StartConversationRequest,
    ) -> Result<StartConversationResponse> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(SyncError::Http {
                status: 500,
                body: "boom".to_string(),
            });
        }
        Ok(self.response.lock().unwrap().clone())
    }

    async fn update_conversation(
        &self,
        conversation_id: &str,
        request: &UpdateConversationRequest,
    ) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SyncError::Http {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        self.updates
            .lock()
            .unwrap()
            .push((conversation_id.to_string(), request.clone()));
        Ok(())
    }
}

/// Poll `check` until it holds, failing the test after two seconds
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check().await {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn message_frame(text: &str, create_time: f64) -> String {
    format!(
        r#"{{"topic":"message","payload":{{"speaker":"agent","text":"{}","createTime":{},"startTime":1.0,"endTime":2.0}}}}"#,
        text, create_time
    )
}
