//! Event bus substrate for cross-service saga orchestration.
//!
//! This crate provides the publish/subscribe layer the saga engine and the
//! surrounding services communicate through:
//!
//! - [`Event`] / [`EventMetadata`] - the immutable envelope wrapping an
//!   opaque payload with identity, timing, and tracing context.
//! - [`EventBus`] - the pub/sub contract, with an in-process implementation
//!   ([`InMemoryEventBus`]) and a transport-backed one
//!   ([`TransportEventBus`]) that serializes envelopes over a pluggable
//!   [`Transport`].
//! - [`EventFactory`] - stamps outgoing events with consistent metadata.
//! - [`EventPublisher`] - delivery policy on top of bus + factory:
//!   fire-and-forget, retry with linear backoff, or ordered batches.
//!
//! Handlers for a single event type run sequentially in registration order;
//! a failing handler is logged and does not stop the remaining handlers.

pub mod bus;
pub mod envelope;
pub mod error;
pub mod factory;
pub mod memory;
pub mod publisher;
pub mod registry;
pub mod transport;

pub use bus::{EventBus, EventHandler, HandlerError, handler_fn};
pub use envelope::{Event, EventMetadata};
pub use error::{EventBusError, Result};
pub use factory::{EventFactory, MetadataOverrides};
pub use memory::InMemoryEventBus;
pub use publisher::{EventPublisher, PublisherConfig};
pub use registry::SubscriptionId;
pub use transport::{
    EventResponder, InProcessTransport, MessageResponder, MessageSink, Transport,
    TransportEventBus, subject_for,
};
