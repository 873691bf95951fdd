use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::envelope::Event;
use crate::error::Result;
use crate::registry::SubscriptionId;

/// Error type handlers may surface. Handler failures are logged per handler
/// and never prevent the remaining handlers from running.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A subscriber invoked for every emitted event of a matching type.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> std::result::Result<(), HandlerError>;
}

/// Core pub/sub contract.
///
/// Implementations dispatch handlers for a single event type sequentially,
/// in registration order, over a snapshot of the handler list - so a
/// handler registering or removing subscriptions mid-emit cannot corrupt
/// the dispatch in flight.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Registers a handler for an event type. Registering the same handler
    /// twice is allowed and produces duplicate invocation.
    async fn on(&self, event_type: &str, handler: Arc<dyn EventHandler>)
    -> Result<SubscriptionId>;

    /// Registers a handler that is removed after its first invocation.
    async fn once(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionId>;

    /// Removes a single subscription. Returns false if it was already gone.
    async fn off(&self, subscription: &SubscriptionId) -> bool;

    /// Delivers an event to every handler registered for its type.
    ///
    /// All handlers run even if some fail; if any handler failed, the last
    /// failure is returned after the dispatch completes.
    async fn emit(&self, event: Event) -> Result<()>;

    /// Clears handlers for one event type, or all handlers when `None`.
    async fn remove_all_listeners(&self, event_type: Option<&str>);

    /// Number of handlers currently registered for an event type.
    async fn listener_count(&self, event_type: &str) -> usize;

    /// Event types that currently have at least one handler.
    async fn event_types(&self) -> Vec<String>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<(), HandlerError>> + Send,
{
    async fn handle(&self, event: &Event) -> std::result::Result<(), HandlerError> {
        (self.0)(event.clone()).await
    }
}

/// Wraps an async closure as an [`EventHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}
