use crate::conversation::{parse_datetime_seconds, ChatMessage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ============================================================================
// Request/Response Types
// ============================================================================

/// POST /conversations/start
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartConversationRequest {
    /// Always empty; messages are sent through updates
    pub messages: Vec<ChatMessage>,
    pub recorded_at: DateTime<Utc>,
    pub operator_id: Uuid,
    pub data_source_id: Uuid,
}

impl StartConversationRequest {
    pub fn new(operator_id: Uuid, data_source_id: Uuid) -> Self {
        Self {
            messages: Vec::new(),
            recorded_at: Utc::now(),
            operator_id,
            data_source_id,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartConversationResponse {
    #[serde(alias = "conversation_id", deserialize_with = "string_or_number")]
    pub conversation_id: String,

    /// Seconds since epoch, when the backend reports it
    #[serde(default, alias = "create_time", deserialize_with = "optional_seconds")]
    pub create_time: Option<f64>,

    #[serde(default, alias = "agent_welcome_message")]
    pub agent_welcome_message: Option<String>,

    #[serde(default, alias = "agent_possible_queries")]
    pub agent_possible_queries: Option<Vec<String>>,
}

/// PATCH /conversations/update/{conversation_id}
#[derive(Debug, Clone, Serialize)]
pub struct UpdateConversationRequest {
    pub messages: Vec<ChatMessage>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected conversation id, got {}",
            other
        ))),
    }
}

fn optional_seconds<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) => parse_datetime_seconds(&s)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("unrecognized createTime: {}", s))),
        Some(other) => Err(serde::de::Error::custom(format!(
            "unexpected createTime: {}",
            other
        ))),
    }
}
