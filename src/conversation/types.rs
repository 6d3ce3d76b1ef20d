use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Offset used as the end of a message whose real end time is unknown
pub const INSTANT_EPSILON: f64 = 0.01;

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Customer,
    Agent,
    /// Synthetic notice (takeover, finalize), never typed by a person
    Special,
}

/// Identity and timing anchor of a conversation
///
/// Persisted as `{conversationId, createTime, finalized}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Backend-assigned id
    #[serde(rename = "conversationId")]
    pub id: String,

    /// Seconds since epoch; every relative offset in the conversation is measured from here
    pub create_time: f64,

    /// Terminal flag, no sends once set
    #[serde(default)]
    pub finalized: bool,
}

impl Conversation {
    pub fn new(id: impl Into<String>, create_time: f64) -> Self {
        Self {
            id: id.into(),
            create_time,
            finalized: false,
        }
    }
}

/// One conversation turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "WireChatMessage")]
pub struct ChatMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub speaker: Speaker,

    pub text: String,

    /// Absolute seconds since epoch when the message was produced
    pub create_time: f64,

    /// Seconds relative to the conversation start
    pub start_time: f64,

    /// Seconds relative to the conversation start, never before `start_time`
    pub end_time: f64,
}

impl ChatMessage {
    /// Message with absolute times and no known duration
    ///
    /// Start and end are still absolute here; run it through
    /// [`normalize`](super::normalize) before it leaves the client.
    pub fn instant(speaker: Speaker, text: impl Into<String>, create_time: f64) -> Self {
        Self {
            id: None,
            speaker,
            text: text.into(),
            create_time,
            start_time: create_time,
            end_time: create_time + INSTANT_EPSILON,
        }
    }

    /// Whether two messages describe the same event
    pub fn same_event(&self, other: &ChatMessage) -> bool {
        self.text == other.text && self.create_time == other.create_time
    }
}

/// Inbound shape; accepts the backend's snake_case names and datetime strings
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireChatMessage {
    #[serde(default)]
    id: Option<Value>,
    speaker: Speaker,
    text: String,
    #[serde(default, alias = "create_time")]
    create_time: Option<WireTime>,
    #[serde(alias = "start_time")]
    start_time: f64,
    #[serde(default, alias = "end_time")]
    end_time: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireTime {
    Seconds(f64),
    Text(String),
}

impl TryFrom<WireChatMessage> for ChatMessage {
    type Error = String;

    fn try_from(wire: WireChatMessage) -> Result<Self, Self::Error> {
        if wire.text.is_empty() {
            return Err("message text is empty".to_string());
        }

        // Legacy payloads carry no creation time; fall back to the start offset
        let create_time = match wire.create_time {
            Some(WireTime::Seconds(secs)) => secs,
            Some(WireTime::Text(text)) => parse_datetime_seconds(&text)
                .ok_or_else(|| format!("unrecognized createTime: {text}"))?,
            None => wire.start_time,
        };

        let end_time = wire
            .end_time
            .filter(|end| *end >= wire.start_time)
            .unwrap_or(wire.start_time + INSTANT_EPSILON);

        let id = wire.id.and_then(|id| match id {
            Value::String(s) => Some(s),
            Value::Null => None,
            other => Some(other.to_string()),
        });

        Ok(Self {
            id,
            speaker: wire.speaker,
            text: wire.text,
            create_time,
            start_time: wire.start_time,
            end_time,
        })
    }
}

/// Parse RFC 3339, or the `YYYY-MM-DD HH:MM:SS[.f][+zz:zz]` form the backend emits
pub fn parse_datetime_seconds(text: &str) -> Option<f64> {
    let to_secs = |dt: DateTime<Utc>| dt.timestamp_micros() as f64 / 1_000_000.0;

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(to_secs(dt.with_timezone(&Utc)));
    }
    if let Ok(dt) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(to_secs(dt.with_timezone(&Utc)));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| to_secs(naive.and_utc()))
}

/// Running metric values; updates are merged key by key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatisticsSnapshot(pub Map<String, Value>);

impl StatisticsSnapshot {
    /// Shallow merge: later keys overwrite, unseen keys persist
    pub fn merge(&mut self, update: Map<String, Value>) {
        for (key, value) in update {
            self.0.insert(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Supervisor ids carried by a takeover event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TakeoverPayload {
    #[serde(default, alias = "supervisor_id")]
    pub supervisor_id: Option<String>,

    #[serde(default, alias = "user_id")]
    pub user_id: Option<String>,
}

/// Latest takeover, replaced wholesale on each event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TakeoverInfo {
    pub supervisor_id: Option<String>,
    pub user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Streaming connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    #[default]
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_camel_case_message() {
        let json = r#"{"speaker":"agent","text":"Hi","createTime":1000.5,"startTime":0,"endTime":1.5}"#;
        let msg: ChatMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.speaker, Speaker::Agent);
        assert_eq!(msg.create_time, 1000.5);
        assert_eq!(msg.end_time, 1.5);
        assert!(msg.id.is_none());
    }

    #[test]
    fn test_decode_backend_snake_case_with_datetime() {
        let json = r#"{
            "id": 42,
            "speaker": "customer",
            "text": "hello",
            "create_time": "2025-10-27 14:30:05+00:00",
            "start_time": 3.0,
            "end_time": 0.0
        }"#;
        let msg: ChatMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.id.as_deref(), Some("42"));
        assert_eq!(msg.create_time, 1761575405.0);
        // end before start is treated as unknown
        assert_eq!(msg.end_time, 3.0 + INSTANT_EPSILON);
    }

    #[test]
    fn test_decode_rejects_empty_text() {
        let json = r#"{"speaker":"agent","text":"","createTime":1,"startTime":0}"#;
        assert!(serde_json::from_str::<ChatMessage>(json).is_err());
    }

    #[test]
    fn test_conversation_record_shape() {
        let conversation = Conversation::new("c1", 1_000_000.0);
        let json = serde_json::to_value(&conversation).unwrap();
        assert_eq!(json["conversationId"], "c1");
        assert_eq!(json["createTime"], 1_000_000.0);
        assert_eq!(json["finalized"], false);
    }

    #[test]
    fn test_statistics_merge_keeps_unseen_keys() {
        let mut stats = StatisticsSnapshot::default();
        stats.merge(serde_json::from_str(r#"{"sentiment":0.2,"turns":3}"#).unwrap());
        stats.merge(serde_json::from_str(r#"{"turns":4}"#).unwrap());

        assert_eq!(stats.get("sentiment"), Some(&Value::from(0.2)));
        assert_eq!(stats.get("turns"), Some(&Value::from(4)));
    }
}
