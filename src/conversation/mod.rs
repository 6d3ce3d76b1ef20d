//! Conversation data model
//!
//! - Conversation, message, statistics and takeover types
//! - Relative timestamp normalization
//! - Transcript reconciliation (the only place messages are de-duplicated)

mod reconcile;
mod timestamps;
mod types;

pub use reconcile::{append_new, merge};
pub use timestamps::{normalize, now_seconds};
pub use types::{
    parse_datetime_seconds, ChatMessage, ConnectionState, Conversation, Speaker,
    StatisticsSnapshot, TakeoverInfo, TakeoverPayload, INSTANT_EPSILON,
};
