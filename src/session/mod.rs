//! Participant conversation session
//!
//! This module provides the `ConversationSessionManager` that manages:
//! - Conversation creation and resumption after restarts
//! - Persistence of the active conversation through a `SessionStore`
//! - The live event socket and the reconciled transcript
//! - Sending customer messages
//! - Takeover and finalize notices

mod manager;
mod store;

pub use manager::{
    ConnectionStateHandler, ConversationSessionManager, FinalizeHandler, MessageHandler,
    ResumeOutcome, StartContext, TakeoverHandler, FINALIZE_NOTICE, TAKEOVER_NOTICE,
};
pub use store::{FileSessionStore, MemorySessionStore, SessionStore};
