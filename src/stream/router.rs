use super::messages::{RoutedEvent, Topic};
use crate::conversation::{ChatMessage, ConnectionState, TakeoverPayload};
use serde_json::{Map, Value};
use tracing::debug;

/// Receiver of classified socket events, one method per topic
///
/// Methods run on the connection's reader task; the next frame is not read
/// until the current call returns.
#[async_trait::async_trait]
pub trait TopicHandler: Send + Sync {
    async fn on_messages(&self, messages: Vec<ChatMessage>);

    async fn on_statistics(&self, _update: Map<String, Value>) {}

    async fn on_takeover(&self, takeover: TakeoverPayload);

    async fn on_finalize(&self, payload: Value);

    async fn on_connection_state(&self, state: ConnectionState);
}

/// Frame classification and dispatch
pub struct EventRouter;

impl EventRouter {
    /// Parse and classify a text frame
    ///
    /// Returns `None` for invalid JSON, unknown topics and payloads of the
    /// wrong shape.
    pub fn parse(text: &str) -> Option<RoutedEvent> {
        match serde_json::from_str::<Value>(text) {
            Ok(frame) => Self::classify(frame),
            Err(e) => {
                debug!("Dropping malformed frame: {}", e);
                None
            }
        }
    }

    /// Classify a decoded `{topic|type, payload}` frame
    pub fn classify(frame: Value) -> Option<RoutedEvent> {
        let Value::Object(mut frame) = frame else {
            debug!("Dropping non-object frame");
            return None;
        };

        let name = frame
            .get("topic")
            .or_else(|| frame.get("type"))
            .and_then(Value::as_str)?
            .to_owned();
        let Some(topic) = Topic::from_wire(&name) else {
            debug!("Ignoring frame with unknown topic {}", name);
            return None;
        };
        let payload = frame.remove("payload").unwrap_or(Value::Null);

        match topic {
            Topic::Message => {
                let messages = Self::decode_messages(payload);
                (!messages.is_empty()).then_some(RoutedEvent::Messages(messages))
            }
            Topic::Statistics => match payload {
                Value::Object(update) => Some(RoutedEvent::Statistics(update)),
                other => {
                    debug!("Dropping statistics frame with payload {}", other);
                    None
                }
            },
            Topic::Takeover => {
                let takeover = match payload {
                    Value::Null => TakeoverPayload::default(),
                    other => serde_json::from_value(other).ok()?,
                };
                Some(RoutedEvent::Takeover(takeover))
            }
            Topic::Finalize => Some(RoutedEvent::Finalize(payload)),
        }
    }

    /// Single message or array, each item decoded on its own
    fn decode_messages(payload: Value) -> Vec<ChatMessage> {
        let items = match payload {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            single => vec![single],
        };

        items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<ChatMessage>(item) {
                Ok(message) => Some(message),
                Err(e) => {
                    debug!("Skipping undecodable message: {}", e);
                    None
                }
            })
            .collect()
    }

    /// Invoke the handler method for `event`'s topic
    pub async fn dispatch(event: RoutedEvent, handler: &dyn TopicHandler) {
        match event {
            RoutedEvent::Messages(messages) => handler.on_messages(messages).await,
            RoutedEvent::Statistics(update) => handler.on_statistics(update).await,
            RoutedEvent::Takeover(takeover) => handler.on_takeover(takeover).await,
            RoutedEvent::Finalize(payload) => handler.on_finalize(payload).await,
        }
    }

    /// Parse, classify and dispatch; returns whether a handler ran
    pub async fn route(text: &str, handler: &dyn TopicHandler) -> bool {
        match Self::parse(text) {
            Some(event) => {
                debug!("Routing {} frame", event.topic().as_str());
                Self::dispatch(event, handler).await;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Speaker;

    #[test]
    fn test_single_message_payload_becomes_vec() {
        let frame = r#"{"topic":"message","payload":{"speaker":"agent","text":"Hi","createTime":5,"startTime":0,"endTime":1}}"#;
        match EventRouter::parse(frame) {
            Some(RoutedEvent::Messages(messages)) => {
                assert_eq!(messages.len(), 1);
                assert_eq!(messages[0].speaker, Speaker::Agent);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_type_field_and_array_payload() {
        let frame = r#"{"type":"messages","payload":[
            {"speaker":"customer","text":"a","createTime":1,"startTime":0},
            {"speaker":"nobody","text":"b","createTime":2,"startTime":0},
            {"speaker":"agent","text":"c","createTime":3,"startTime":0}
        ]}"#;
        let Some(RoutedEvent::Messages(messages)) = EventRouter::parse(frame) else {
            panic!("expected messages");
        };
        let texts: Vec<_> = messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["a", "c"]);
    }

    #[test]
    fn test_malformed_and_unknown_frames_dropped() {
        assert!(EventRouter::parse("not json").is_none());
        assert!(EventRouter::parse("[1,2,3]").is_none());
        assert!(EventRouter::parse(r#"{"payload":{}}"#).is_none());
        assert!(EventRouter::parse(r#"{"topic":"typing","payload":{}}"#).is_none());
        assert!(EventRouter::parse(r#"{"topic":"statistics","payload":[1]}"#).is_none());
        assert!(EventRouter::parse(r#"{"topic":"message","payload":[]}"#).is_none());
    }

    #[test]
    fn test_takeover_accepts_both_casings() {
        let camel = EventRouter::parse(r#"{"topic":"takeover","payload":{"supervisorId":"s1","userId":"u1"}}"#);
        let snake = EventRouter::parse(r#"{"type":"takeover","payload":{"supervisor_id":"s1","user_id":"u1"}}"#);
        assert_eq!(camel, snake);
        assert_eq!(
            camel,
            Some(RoutedEvent::Takeover(TakeoverPayload {
                supervisor_id: Some("s1".to_string()),
                user_id: Some("u1".to_string()),
            }))
        );
    }

    #[test]
    fn test_finalize_without_payload() {
        assert_eq!(
            EventRouter::parse(r#"{"topic":"finalize"}"#),
            Some(RoutedEvent::Finalize(Value::Null))
        );
    }
}
