pub mod store;
pub mod types;

pub use store::{EventQuery, EventStore, QueryResult, Subscription, MAX_QUERY_LIMIT};
pub use types::{
    status_class, BodyCapture, CaptureEvent, ClientInfo, Destination, HttpInfo, MessageCapture,
    Observation, Scheme, StoredEvent,
};
