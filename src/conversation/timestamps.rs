use super::types::{ChatMessage, INSTANT_EPSILON};
use chrono::Utc;

/// Current wall-clock time in seconds since epoch
pub fn now_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Rewrite `start_time`/`end_time` relative to the conversation start
///
/// Apply exactly once, where an absolute-time message enters the client.
/// An end earlier than the start is replaced by `start + INSTANT_EPSILON`.
pub fn normalize(message: ChatMessage, conversation_create_time: f64) -> ChatMessage {
    let start_time = message.start_time - conversation_create_time;
    let mut end_time = message.end_time - conversation_create_time;
    if end_time < start_time {
        end_time = start_time + INSTANT_EPSILON;
    }

    ChatMessage {
        start_time,
        end_time,
        ..message
    }
}
