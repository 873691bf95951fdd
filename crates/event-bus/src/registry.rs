//! Shared handler registry backing both bus implementations.
//!
//! The in-memory bus dispatches into the registry directly; the transport
//! bus deserializes incoming messages and dispatches through the same path,
//! so a transport swap is invisible to handlers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;

use crate::bus::EventHandler;
use crate::envelope::Event;
use crate::error::{EventBusError, Result};

/// Identifies one `(event_type, handler)` registration for removal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId {
    event_type: String,
    id: u64,
}

impl SubscriptionId {
    /// The event type this subscription listens for.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }
}

struct Registered {
    id: u64,
    handler: Arc<dyn EventHandler>,
    once: bool,
}

/// Ordered per-type handler lists with snapshot-based dispatch.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Vec<Registered>>>,
    next_id: AtomicU64,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handler to the list for `event_type`.
    pub async fn add(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
        once: bool,
    ) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut handlers = self.handlers.write().await;
        handlers
            .entry(event_type.to_string())
            .or_default()
            .push(Registered { id, handler, once });
        SubscriptionId {
            event_type: event_type.to_string(),
            id,
        }
    }

    /// Removes a single registration. Returns false if it was already gone.
    pub async fn remove(&self, subscription: &SubscriptionId) -> bool {
        let mut handlers = self.handlers.write().await;
        let Some(list) = handlers.get_mut(&subscription.event_type) else {
            return false;
        };
        let before = list.len();
        list.retain(|r| r.id != subscription.id);
        let removed = list.len() < before;
        if list.is_empty() {
            handlers.remove(&subscription.event_type);
        }
        removed
    }

    /// Clears one event type, or everything when `None`.
    pub async fn remove_all(&self, event_type: Option<&str>) {
        let mut handlers = self.handlers.write().await;
        match event_type {
            Some(t) => {
                handlers.remove(t);
            }
            None => handlers.clear(),
        }
    }

    /// Number of handlers registered for an event type.
    pub async fn count(&self, event_type: &str) -> usize {
        self.handlers
            .read()
            .await
            .get(event_type)
            .map_or(0, Vec::len)
    }

    /// Event types with at least one registered handler.
    pub async fn event_types(&self) -> Vec<String> {
        self.handlers.read().await.keys().cloned().collect()
    }

    /// Invokes every handler registered for the event's type, sequentially
    /// and in registration order.
    ///
    /// Dispatch iterates over a snapshot taken under the lock, so handlers
    /// may re-enter the registry (including emitting further events) without
    /// corrupting the list. `once` registrations are removed from the live
    /// list before their single invocation. A failing handler is logged and
    /// the remaining handlers still run; the last failure is returned once
    /// dispatch completes.
    pub async fn dispatch(&self, event: &Event) -> Result<()> {
        let snapshot: Vec<Arc<dyn EventHandler>> = {
            let mut handlers = self.handlers.write().await;
            let Some(list) = handlers.get_mut(&event.event_type) else {
                return Ok(());
            };
            let snapshot = list.iter().map(|r| Arc::clone(&r.handler)).collect();
            list.retain(|r| !r.once);
            if list.is_empty() {
                handlers.remove(&event.event_type);
            }
            snapshot
        };

        let mut last_failure = None;
        for handler in snapshot {
            if let Err(e) = handler.handle(event).await {
                tracing::error!(
                    event_type = %event.event_type,
                    event_id = %event.metadata.event_id,
                    error = %e,
                    "event handler failed"
                );
                metrics::counter!("event_handler_failures_total").increment(1);
                last_failure = Some(e.to_string());
            }
        }

        match last_failure {
            Some(reason) => Err(EventBusError::HandlerFailed {
                event_type: event.event_type.clone(),
                reason,
            }),
            None => Ok(()),
        }
    }
}
