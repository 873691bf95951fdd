use std::sync::Arc;
use std::time::Duration;

use common::CorrelationId;

use crate::bus::EventBus;
use crate::envelope::Event;
use crate::error::Result;
use crate::factory::EventFactory;

/// Delivery policy for an [`EventPublisher`].
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Retry failed publishes before giving up.
    pub enable_retry: bool,
    /// Number of attempts when retry is enabled.
    pub retry_attempts: u32,
    /// Base delay; attempt `n` waits `retry_delay * n` (linear backoff).
    pub retry_delay: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            enable_retry: false,
            retry_attempts: 3,
            retry_delay: Duration::from_millis(1000),
        }
    }
}

/// Wraps a bus and a factory with delivery policy: fire-and-forget,
/// retry-with-backoff, or batch-in-order publication.
///
/// The retry backoff is linear (`retry_delay * attempt`) - distinct from
/// the saga engine's exponential step backoff.
#[derive(Clone)]
pub struct EventPublisher {
    bus: Arc<dyn EventBus>,
    factory: EventFactory,
    config: PublisherConfig,
}

impl EventPublisher {
    /// Creates a fire-and-forget publisher.
    pub fn new(bus: Arc<dyn EventBus>, factory: EventFactory) -> Self {
        Self {
            bus,
            factory,
            config: PublisherConfig::default(),
        }
    }

    /// Sets the delivery policy.
    pub fn with_config(mut self, config: PublisherConfig) -> Self {
        self.config = config;
        self
    }

    /// The factory used to stamp outgoing events.
    pub fn factory(&self) -> &EventFactory {
        &self.factory
    }

    /// Publishes a single event.
    #[tracing::instrument(skip(self, data))]
    pub async fn publish(&self, event_type: &str, data: serde_json::Value) -> Result<()> {
        let event = self.factory.create_event(event_type, data);
        self.deliver(event).await
    }

    /// Publishes a single event threaded onto an existing causal chain.
    #[tracing::instrument(skip(self, data))]
    pub async fn publish_correlated(
        &self,
        event_type: &str,
        data: serde_json::Value,
        correlation_id: CorrelationId,
    ) -> Result<()> {
        let event = self
            .factory
            .create_correlated_event(event_type, data, correlation_id);
        self.deliver(event).await
    }

    /// Publishes a batch sequentially, preserving input order.
    ///
    /// Without retry, the first failure aborts the batch. With retry, each
    /// event gets the full retry budget; an event that still fails is
    /// logged, the batch continues, and the last failure is surfaced after
    /// the final event.
    #[tracing::instrument(skip(self, events), fields(batch_len = events.len()))]
    pub async fn publish_batch(&self, events: Vec<(String, serde_json::Value)>) -> Result<()> {
        let mut last_failure = None;
        for (event_type, data) in events {
            let event = self.factory.create_event(event_type, data);
            match self.deliver(event).await {
                Ok(()) => {}
                Err(e) if self.config.enable_retry => {
                    tracing::error!(error = %e, "batch publish failed after retries, continuing");
                    last_failure = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        match last_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn deliver(&self, event: Event) -> Result<()> {
        if !self.config.enable_retry {
            return self.bus.emit(event).await;
        }

        let attempts = self.config.retry_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.bus.emit(event.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        event_type = %event.event_type,
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        "publish attempt failed"
                    );
                    last_error = Some(e);
                    tokio::time::sleep(self.config.retry_delay * attempt).await;
                }
            }
        }

        if let Some(error) = last_error {
            tracing::error!(
                event_type = %event.event_type,
                attempts,
                error = %error,
                "publish retries exhausted"
            );
            return Err(error);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::handler_fn;
    use crate::memory::InMemoryEventBus;
    use std::sync::Mutex;
    use tokio::time::Instant;

    fn publisher(bus: Arc<InMemoryEventBus>, config: PublisherConfig) -> EventPublisher {
        EventPublisher::new(bus, EventFactory::new("test-service")).with_config(config)
    }

    #[tokio::test]
    async fn publish_delivers_through_the_bus() {
        let bus = Arc::new(InMemoryEventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = Arc::clone(&seen);
        bus.on(
            "user.created",
            handler_fn(move |event| {
                let s = Arc::clone(&s);
                async move {
                    s.lock().unwrap().push(event.data["id"].to_string());
                    Ok(())
                }
            }),
        )
        .await
        .unwrap();

        let publisher = publisher(Arc::clone(&bus), PublisherConfig::default());
        publisher
            .publish("user.created", serde_json::json!({"id": "u1"}))
            .await
            .unwrap();

        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn publish_correlated_threads_the_correlation_id() {
        let bus = Arc::new(InMemoryEventBus::new());
        let seen = Arc::new(Mutex::new(None));
        let correlation_id = CorrelationId::new();

        let s = Arc::clone(&seen);
        bus.on(
            "user.created",
            handler_fn(move |event| {
                let s = Arc::clone(&s);
                async move {
                    *s.lock().unwrap() = event.metadata.correlation_id;
                    Ok(())
                }
            }),
        )
        .await
        .unwrap();

        let publisher = publisher(Arc::clone(&bus), PublisherConfig::default());
        publisher
            .publish_correlated("user.created", serde_json::json!({}), correlation_id)
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), Some(correlation_id));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_exhaustion_observes_linear_backoff_then_rejects() {
        let bus = Arc::new(InMemoryEventBus::new());
        let attempts = Arc::new(Mutex::new(0));

        let a = Arc::clone(&attempts);
        bus.on(
            "user.created",
            handler_fn(move |_| {
                let a = Arc::clone(&a);
                async move {
                    *a.lock().unwrap() += 1;
                    Err("handler always fails".into())
                }
            }),
        )
        .await
        .unwrap();

        let publisher = publisher(
            Arc::clone(&bus),
            PublisherConfig {
                enable_retry: true,
                retry_attempts: 3,
                retry_delay: Duration::from_millis(1000),
            },
        );

        let start = Instant::now();
        let result = publisher
            .publish("user.created", serde_json::json!({"id": "u1"}))
            .await;

        assert_eq!(*attempts.lock().unwrap(), 3);
        // Linear backoff after each failed attempt: 1000 + 2000 + 3000 ms.
        assert_eq!(start.elapsed(), Duration::from_millis(6000));
        match result {
            Err(crate::EventBusError::HandlerFailed { reason, .. }) => {
                assert!(reason.contains("handler always fails"));
            }
            other => panic!("expected HandlerFailed, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_stops_after_first_success() {
        let bus = Arc::new(InMemoryEventBus::new());
        let attempts = Arc::new(Mutex::new(0));

        let a = Arc::clone(&attempts);
        bus.on(
            "x",
            handler_fn(move |_| {
                let a = Arc::clone(&a);
                async move {
                    let mut n = a.lock().unwrap();
                    *n += 1;
                    if *n < 2 { Err("transient".into()) } else { Ok(()) }
                }
            }),
        )
        .await
        .unwrap();

        let publisher = publisher(
            Arc::clone(&bus),
            PublisherConfig {
                enable_retry: true,
                retry_attempts: 3,
                retry_delay: Duration::from_millis(1000),
            },
        );

        let start = Instant::now();
        publisher.publish("x", serde_json::json!({})).await.unwrap();

        assert_eq!(*attempts.lock().unwrap(), 2);
        assert_eq!(start.elapsed(), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn batch_preserves_order() {
        let bus = Arc::new(InMemoryEventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = Arc::clone(&seen);
        bus.on(
            "seq",
            handler_fn(move |event| {
                let s = Arc::clone(&s);
                async move {
                    s.lock().unwrap().push(event.data["n"].as_i64().unwrap());
                    Ok(())
                }
            }),
        )
        .await
        .unwrap();

        let publisher = publisher(Arc::clone(&bus), PublisherConfig::default());
        publisher
            .publish_batch(
                (0..5)
                    .map(|n| ("seq".to_string(), serde_json::json!({"n": n})))
                    .collect(),
            )
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn batch_without_retry_stops_at_first_failure() {
        let bus = Arc::new(InMemoryEventBus::new());
        let delivered = Arc::new(Mutex::new(Vec::new()));

        let d = Arc::clone(&delivered);
        bus.on(
            "seq",
            handler_fn(move |event| {
                let d = Arc::clone(&d);
                async move {
                    let n = event.data["n"].as_i64().unwrap();
                    d.lock().unwrap().push(n);
                    if n == 1 { Err("poison".into()) } else { Ok(()) }
                }
            }),
        )
        .await
        .unwrap();

        let publisher = publisher(Arc::clone(&bus), PublisherConfig::default());
        let result = publisher
            .publish_batch(
                (0..4)
                    .map(|n| ("seq".to_string(), serde_json::json!({"n": n})))
                    .collect(),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(*delivered.lock().unwrap(), vec![0, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_with_retry_continues_past_a_dead_event() {
        let bus = Arc::new(InMemoryEventBus::new());
        let delivered = Arc::new(Mutex::new(Vec::new()));

        let d = Arc::clone(&delivered);
        bus.on(
            "seq",
            handler_fn(move |event| {
                let d = Arc::clone(&d);
                async move {
                    let n = event.data["n"].as_i64().unwrap();
                    d.lock().unwrap().push(n);
                    if n == 1 { Err("poison".into()) } else { Ok(()) }
                }
            }),
        )
        .await
        .unwrap();

        let publisher = publisher(
            Arc::clone(&bus),
            PublisherConfig {
                enable_retry: true,
                retry_attempts: 2,
                retry_delay: Duration::from_millis(10),
            },
        );
        let result = publisher
            .publish_batch(
                (0..3)
                    .map(|n| ("seq".to_string(), serde_json::json!({"n": n})))
                    .collect(),
            )
            .await;

        // Event 1 was retried twice, events 0 and 2 delivered once each.
        assert_eq!(*delivered.lock().unwrap(), vec![0, 1, 1, 2]);
        assert!(result.is_err());
    }
}
