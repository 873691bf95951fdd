use common::{CorrelationId, EventId};

use crate::envelope::{Event, EventMetadata};

/// Per-event metadata overrides supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct MetadataOverrides {
    pub correlation_id: Option<CorrelationId>,
    pub causation_id: Option<EventId>,
    pub user_id: Option<String>,
    pub organization_id: Option<String>,
}

/// Stamps outgoing events with consistent metadata so callers only supply
/// a type and a payload.
///
/// One factory per producing service; the `source` names that service in
/// every envelope it emits.
#[derive(Debug, Clone)]
pub struct EventFactory {
    source: String,
    version: String,
    default_user_id: Option<String>,
    default_organization_id: Option<String>,
}

impl EventFactory {
    /// Creates a factory for the given source service, with payload schema
    /// version `"1.0"`.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            version: "1.0".to_string(),
            default_user_id: None,
            default_organization_id: None,
        }
    }

    /// Overrides the payload schema version stamped on events.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Sets default user/organization context applied to every event that
    /// does not override it.
    pub fn with_user_context(
        mut self,
        user_id: Option<String>,
        organization_id: Option<String>,
    ) -> Self {
        self.default_user_id = user_id;
        self.default_organization_id = organization_id;
        self
    }

    /// The source service name stamped on events.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Creates an event with a fresh id, current timestamp, and the
    /// factory's default context.
    pub fn create_event(&self, event_type: impl Into<String>, data: serde_json::Value) -> Event {
        self.create_event_with(event_type, data, MetadataOverrides::default())
    }

    /// Creates an event, overriding selected metadata fields.
    pub fn create_event_with(
        &self,
        event_type: impl Into<String>,
        data: serde_json::Value,
        overrides: MetadataOverrides,
    ) -> Event {
        let mut metadata = EventMetadata::new(self.source.clone(), self.version.clone());
        metadata.correlation_id = overrides.correlation_id;
        metadata.causation_id = overrides.causation_id;
        metadata.user_id = overrides.user_id.or_else(|| self.default_user_id.clone());
        metadata.organization_id = overrides
            .organization_id
            .or_else(|| self.default_organization_id.clone());
        Event::new(event_type, data, metadata)
    }

    /// Creates an event threaded onto an existing causal chain.
    pub fn create_correlated_event(
        &self,
        event_type: impl Into<String>,
        data: serde_json::Value,
        correlation_id: CorrelationId,
    ) -> Event {
        self.create_event_with(
            event_type,
            data,
            MetadataOverrides {
                correlation_id: Some(correlation_id),
                ..MetadataOverrides::default()
            },
        )
    }
}
