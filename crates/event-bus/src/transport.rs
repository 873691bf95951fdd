//! Pluggable network transport behind the [`EventBus`] contract.
//!
//! A [`Transport`] moves opaque byte payloads between subjects; the
//! [`TransportEventBus`] maps dotted event types to subjects
//! (`events.<type>`), serializes envelopes on publish, and deserializes on
//! receipt before dispatching to local handlers through the same registry
//! path as the in-memory bus - swapping the transport is invisible to the
//! layers above.
//!
//! [`InProcessTransport`] is the loopback implementation used in tests; a
//! broker-backed implementation (e.g. over a pub/sub messaging system)
//! drops in behind the same trait.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::bus::{EventBus, EventHandler, HandlerError};
use crate::envelope::Event;
use crate::error::{EventBusError, Result};
use crate::registry::{HandlerRegistry, SubscriptionId};

/// Maps a dotted event type to its transport subject.
pub fn subject_for(event_type: &str) -> String {
    format!("events.{event_type}")
}

/// Receives raw payloads delivered to a subscribed subject.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn deliver(&self, subject: &str, payload: &[u8]);
}

/// Produces a raw reply for a request subject.
#[async_trait]
pub trait MessageResponder: Send + Sync {
    async fn respond(&self, payload: &[u8]) -> std::result::Result<Vec<u8>, HandlerError>;
}

/// Byte-level delivery mechanism between subjects.
///
/// Implementations must deliver payloads to all sinks subscribed to a
/// subject and route requests to the subject's responder. Subscriptions
/// may be registered before `connect`; publishing requires a connection.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()>;
    async fn subscribe(&self, subject: &str, sink: Arc<dyn MessageSink>) -> Result<()>;
    async fn request(
        &self,
        subject: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>>;
    async fn respond(&self, subject: &str, responder: Arc<dyn MessageResponder>) -> Result<()>;
}

#[derive(Default)]
struct InProcessState {
    sinks: RwLock<HashMap<String, Vec<Arc<dyn MessageSink>>>>,
    responders: RwLock<HashMap<String, Arc<dyn MessageResponder>>>,
    connected: AtomicBool,
}

/// Loopback transport delivering within the current process.
///
/// Clones share state, so two bus instances built over clones of the same
/// transport behave like two services attached to one broker.
#[derive(Clone, Default)]
pub struct InProcessTransport {
    state: Arc<InProcessState>,
}

impl InProcessTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    async fn connect(&self) -> Result<()> {
        self.state.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.state.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()> {
        if !self.state.connected.load(Ordering::SeqCst) {
            return Err(EventBusError::NotConnected);
        }
        let sinks: Vec<Arc<dyn MessageSink>> = self
            .state
            .sinks
            .read()
            .await
            .get(subject)
            .map(|list| list.iter().map(Arc::clone).collect())
            .unwrap_or_default();
        for sink in sinks {
            sink.deliver(subject, &payload).await;
        }
        Ok(())
    }

    async fn subscribe(&self, subject: &str, sink: Arc<dyn MessageSink>) -> Result<()> {
        self.state
            .sinks
            .write()
            .await
            .entry(subject.to_string())
            .or_default()
            .push(sink);
        Ok(())
    }

    async fn request(
        &self,
        subject: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        if !self.state.connected.load(Ordering::SeqCst) {
            return Err(EventBusError::NotConnected);
        }
        let responder = self
            .state
            .responders
            .read()
            .await
            .get(subject)
            .map(Arc::clone)
            .ok_or_else(|| EventBusError::NoResponder(subject.to_string()))?;

        match tokio::time::timeout(timeout, responder.respond(&payload)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => Err(EventBusError::ResponderFailed {
                subject: subject.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(EventBusError::RequestTimeout {
                subject: subject.to_string(),
                timeout,
            }),
        }
    }

    async fn respond(&self, subject: &str, responder: Arc<dyn MessageResponder>) -> Result<()> {
        self.state
            .responders
            .write()
            .await
            .insert(subject.to_string(), responder);
        Ok(())
    }
}

/// Deserializes incoming payloads and dispatches them through the shared
/// handler registry.
struct RegistrySink {
    registry: Arc<HandlerRegistry>,
}

#[async_trait]
impl MessageSink for RegistrySink {
    async fn deliver(&self, subject: &str, payload: &[u8]) {
        let event: Event = match serde_json::from_slice(payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(subject, error = %e, "dropping undecodable event payload");
                return;
            }
        };
        // Handler failures were already logged per handler; delivery is
        // at-least-once and the remote publisher is not waiting on us.
        let _ = self.registry.dispatch(&event).await;
    }
}

/// Responds to requests by deserializing the envelope, delegating to an
/// [`EventResponder`], and serializing the reply.
#[async_trait]
pub trait EventResponder: Send + Sync {
    async fn respond(&self, event: Event) -> std::result::Result<Event, HandlerError>;
}

struct EnvelopeResponder {
    inner: Arc<dyn EventResponder>,
}

#[async_trait]
impl MessageResponder for EnvelopeResponder {
    async fn respond(&self, payload: &[u8]) -> std::result::Result<Vec<u8>, HandlerError> {
        let event: Event = serde_json::from_slice(payload)?;
        let reply = self.inner.respond(event).await?;
        Ok(serde_json::to_vec(&reply)?)
    }
}

/// Event bus backed by a [`Transport`].
///
/// Local subscriptions are registered with the transport per subject; every
/// received payload is deserialized and dispatched through the same
/// registry path the in-memory bus uses, so emitted events loop back to
/// local handlers exactly like remote ones.
pub struct TransportEventBus<T: Transport> {
    transport: T,
    registry: Arc<HandlerRegistry>,
    subscribed_subjects: Mutex<HashSet<String>>,
}

impl<T: Transport> TransportEventBus<T> {
    /// Creates a bus over the given transport. Call [`connect`] before
    /// publishing.
    ///
    /// [`connect`]: TransportEventBus::connect
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            registry: Arc::new(HandlerRegistry::new()),
            subscribed_subjects: Mutex::new(HashSet::new()),
        }
    }

    /// Connects the underlying transport.
    pub async fn connect(&self) -> Result<()> {
        self.transport.connect().await
    }

    /// Disconnects the underlying transport. Local registrations survive
    /// and resume delivery after a reconnect.
    pub async fn disconnect(&self) -> Result<()> {
        self.transport.disconnect().await
    }

    /// Sends a request over the event's subject and waits for a reply.
    pub async fn request(&self, event: Event, timeout: Duration) -> Result<Event> {
        let subject = subject_for(&event.event_type);
        let payload = serde_json::to_vec(&event)?;
        let reply = self.transport.request(&subject, payload, timeout).await?;
        Ok(serde_json::from_slice(&reply)?)
    }

    /// Registers the responder for request-reply on an event type's subject.
    pub async fn respond_to(
        &self,
        event_type: &str,
        responder: Arc<dyn EventResponder>,
    ) -> Result<()> {
        self.transport
            .respond(
                &subject_for(event_type),
                Arc::new(EnvelopeResponder { inner: responder }),
            )
            .await
    }

    async fn ensure_subject_subscribed(&self, event_type: &str) -> Result<()> {
        let subject = subject_for(event_type);
        let mut subscribed = self.subscribed_subjects.lock().await;
        if subscribed.contains(&subject) {
            return Ok(());
        }
        self.transport
            .subscribe(
                &subject,
                Arc::new(RegistrySink {
                    registry: Arc::clone(&self.registry),
                }),
            )
            .await?;
        subscribed.insert(subject);
        Ok(())
    }
}

#[async_trait]
impl<T: Transport> EventBus for TransportEventBus<T> {
    async fn on(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionId> {
        self.ensure_subject_subscribed(event_type).await?;
        Ok(self.registry.add(event_type, handler, false).await)
    }

    async fn once(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionId> {
        self.ensure_subject_subscribed(event_type).await?;
        Ok(self.registry.add(event_type, handler, true).await)
    }

    async fn off(&self, subscription: &SubscriptionId) -> bool {
        self.registry.remove(subscription).await
    }

    async fn emit(&self, event: Event) -> Result<()> {
        metrics::counter!("events_published_total").increment(1);
        let subject = subject_for(&event.event_type);
        let payload = serde_json::to_vec(&event)?;
        self.transport.publish(&subject, payload).await
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
