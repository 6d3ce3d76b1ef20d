use super::types::ChatMessage;

/// Merge an incoming batch into a transcript
///
/// Existing messages keep their order. Each incoming message is appended
/// unless a message with the same `(text, create_time)` is already present,
/// counting messages accepted earlier from the same batch.
pub fn merge(existing: &[ChatMessage], incoming: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut merged = existing.to_vec();
    for message in incoming {
        if !merged.iter().any(|known| known.same_event(message)) {
            merged.push(message.clone());
        }
    }
    merged
}

/// Like [`merge`], but extends `transcript` in place and returns only the newly accepted messages
pub fn append_new(transcript: &mut Vec<ChatMessage>, incoming: &[ChatMessage]) -> Vec<ChatMessage> {
    let before = transcript.len();
    *transcript = merge(transcript, incoming);
    transcript[before..].to_vec()
}
