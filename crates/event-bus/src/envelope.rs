use chrono::{DateTime, Utc};
use common::{CorrelationId, EventId};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Metadata stamped onto every published event.
///
/// `event_id` and `timestamp` are assigned once at creation and never
/// mutated afterward. The remaining fields carry tracing and tenancy
/// context across service boundaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique identifier for this event.
    pub event_id: EventId,

    /// When the event was created.
    pub timestamp: DateTime<Utc>,

    /// Identifier threading related events/sagas together.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,

    /// The event that directly caused this one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<EventId>,

    /// The user on whose behalf the event was produced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// The organization the event belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,

    /// The service that produced the event.
    pub source: String,

    /// Schema version of the payload.
    pub version: String,
}

impl EventMetadata {
    /// Creates metadata with a fresh event ID and the current timestamp.
    pub fn new(source: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            event_id: EventId::new(),
            timestamp: Utc::now(),
            correlation_id: None,
            causation_id: None,
            user_id: None,
            organization_id: None,
            source: source.into(),
            version: version.into(),
        }
    }
}

/// An immutable description of a published occurrence.
///
/// The payload is opaque JSON at this layer; producers and consumers agree
/// on its shape out of band. Use [`Event::data_as`] to deserialize into a
/// concrete type at the edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Dotted event type, e.g. `training.workout.created` or
    /// `saga.transfer.completed`.
    #[serde(rename = "type")]
    pub event_type: String,

    /// The event payload.
    pub data: serde_json::Value,

    /// Envelope metadata.
    pub metadata: EventMetadata,
}

impl Event {
    /// Creates an event from its parts. Most callers should go through
    /// [`EventFactory`](crate::EventFactory) instead, which stamps
    /// consistent metadata.
    pub fn new(
        event_type: impl Into<String>,
        data: serde_json::Value,
        metadata: EventMetadata,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            metadata,
        }
    }

    /// Deserializes the payload into a concrete type.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data.clone())
    }
}
