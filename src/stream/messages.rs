use crate::conversation::{ChatMessage, TakeoverPayload};
use serde_json::{Map, Value};

/// Event category carried on each socket frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Message,
    Statistics,
    Takeover,
    Finalize,
}

/// Topics a participant subscribes to
pub const PARTICIPANT_TOPICS: [Topic; 3] = [Topic::Message, Topic::Takeover, Topic::Finalize];

/// Topics an observer subscribes to
pub const OBSERVER_TOPICS: [Topic; 4] = [
    Topic::Message,
    Topic::Takeover,
    Topic::Finalize,
    Topic::Statistics,
];

impl Topic {
    /// Default name used in the `topics=` query parameter
    ///
    /// Backends that broadcast chat messages under `messages` need
    /// `streaming.message_topic` set to match.
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Message => "message",
            Topic::Statistics => "statistics",
            Topic::Takeover => "takeover",
            Topic::Finalize => "finalize",
        }
    }

    /// Accepts the backend's plural `messages` as well
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "message" | "messages" => Some(Topic::Message),
            "statistics" => Some(Topic::Statistics),
            "takeover" => Some(Topic::Takeover),
            "finalize" => Some(Topic::Finalize),
            _ => None,
        }
    }
}

/// A classified inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum RoutedEvent {
    /// One or more messages, never empty
    Messages(Vec<ChatMessage>),
    Statistics(Map<String, Value>),
    Takeover(TakeoverPayload),
    Finalize(Value),
}

impl RoutedEvent {
    pub fn topic(&self) -> Topic {
        match self {
            RoutedEvent::Messages(_) => Topic::Message,
            RoutedEvent::Statistics(_) => Topic::Statistics,
            RoutedEvent::Takeover(_) => Topic::Takeover,
            RoutedEvent::Finalize(_) => Topic::Finalize,
        }
    }
}
