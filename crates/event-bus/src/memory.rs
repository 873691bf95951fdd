use std::sync::Arc;

use async_trait::async_trait;

use crate::bus::{EventBus, EventHandler};
use crate::envelope::Event;
use crate::error::Result;
use crate::registry::{HandlerRegistry, SubscriptionId};

/// In-process event bus.
///
/// Construct one instance at startup and pass it (behind an `Arc`) to every
/// component that publishes or subscribes; there is no hidden global
/// accessor. [`InMemoryEventBus::reset`] is the explicit teardown hook for
/// tests.
#[derive(Clone, Default)]
pub struct InMemoryEventBus {
    registry: Arc<HandlerRegistry>,
}

impl InMemoryEventBus {
    /// Creates a new bus with no registered handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every registered handler. Test teardown only; production code
    /// should unsubscribe through the [`SubscriptionId`]s it holds.
    pub async fn reset(&self) {
        self.registry.remove_all(None).await;
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn on(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionId> {
        Ok(self.registry.add(event_type, handler, false).await)
    }

    async fn once(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionId> {
        Ok(self.registry.add(event_type, handler, true).await)
    }

    async fn off(&self, subscription: &SubscriptionId) -> bool {
        self.registry.remove(subscription).await
    }

    async fn emit(&self, event: Event) -> Result<()> {
        metrics::counter!("events_published_total").increment(1);
        self.registry.dispatch(&event).await
    }

    async fn remove_all_listeners(&self, event_type: Option<&str>) {
        self.registry.remove_all(event_type).await;
    }

    async fn listener_count(&self, event_type: &str) -> usize {
        self.registry.count(event_type).await
    }

    async fn event_types(&self) -> Vec<String> {
        self.registry.event_types().await
    }
}
