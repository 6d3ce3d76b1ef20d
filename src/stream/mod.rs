pub mod messages;
pub mod router;
pub mod transport;

pub use messages::{RoutedEvent, Topic, OBSERVER_TOPICS, PARTICIPANT_TOPICS};
pub use router::{EventRouter, TopicHandler};
pub use transport::{
    Connector, FrameStream, ReconnectPolicy, StreamEvent, StreamingTransport, TransportSettings,
    WebSocketConnector,
};
