use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when publishing or subscribing through the bus.
#[derive(Debug, Error)]
pub enum EventBusError {
    /// One or more handlers failed while processing an emitted event.
    /// All registered handlers still ran; this carries the last failure.
    #[error("Handler failed for event '{event_type}': {reason}")]
    HandlerFailed { event_type: String, reason: String },

    /// The transport rejected a publish.
    #[error("Publish failed for event '{event_type}': {reason}")]
    PublishFailed { event_type: String, reason: String },

    /// The transport is not connected.
    #[error("Transport is not connected")]
    NotConnected,

    /// No responder is registered for a request subject.
    #[error("No responder registered for subject '{0}'")]
    NoResponder(String),

    /// A request did not receive a response in time.
    #[error("Request on subject '{subject}' timed out after {timeout:?}")]
    RequestTimeout { subject: String, timeout: Duration },

    /// The responder failed to produce a reply.
    #[error("Responder failed for subject '{subject}': {reason}")]
    ResponderFailed { subject: String, reason: String },

    /// A serialization/deserialization error occurred at the transport
    /// boundary.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for event bus operations.
pub type Result<T> = std::result::Result<T, EventBusError>;
