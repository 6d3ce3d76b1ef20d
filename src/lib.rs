pub mod api;
pub mod config;
pub mod conversation;
pub mod error;
pub mod observer;
pub mod session;
pub mod stream;

pub use api::{ConversationApi, HttpConversationApi};
pub use config::{Config, Credential};
pub use conversation::{
    ChatMessage, ConnectionState, Conversation, Speaker, StatisticsSnapshot, TakeoverInfo,
};
pub use error::{Result, SyncError};
pub use observer::{ObserverSynchronizer, ObserverView};
pub use session::{
    ConversationSessionManager, FileSessionStore, MemorySessionStore, ResumeOutcome,
    SessionStore,
};
pub use stream::{EventRouter, StreamingTransport, Topic, TopicHandler, TransportSettings};
