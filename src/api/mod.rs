//! REST client for the conversation endpoints
//!
//! - POST /conversations/start - Create a conversation
//! - PATCH /conversations/update/:id - Append messages

mod client;
mod types;

pub use client::{ConversationApi, HttpConversationApi};
pub use types::{StartConversationRequest, StartConversationResponse, UpdateConversationRequest};
