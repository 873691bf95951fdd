//! Integration tests for the saga engine wired to the event bus and store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::SagaId;
use event_bus::{
    Event, EventBus, EventFactory, EventPublisher, InMemoryEventBus, handler_fn,
};
use saga::{
    ContextOverrides, SagaContext, SagaDefinition, SagaEngine, SagaError, SagaStatus, SagaStep,
    StepError,
};
use saga_store::{InMemorySagaStore, SagaExecution, SagaStore};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TransferData {
    from: String,
    to: String,
    amount_cents: i64,
}

#[derive(Debug, Default)]
struct LedgerState {
    balances: HashMap<String, i64>,
    fail_credits: bool,
}

/// In-memory ledger standing in for the accounts service.
#[derive(Debug, Clone, Default)]
struct Ledger {
    state: Arc<Mutex<LedgerState>>,
}

impl Ledger {
    fn new() -> Self {
        Self::default()
    }

    fn set_balance(&self, account: &str, amount_cents: i64) {
        self.state
            .lock()
            .unwrap()
            .balances
            .insert(account.to_string(), amount_cents);
    }

    fn balance(&self, account: &str) -> i64 {
        *self
            .state
            .lock()
            .unwrap()
            .balances
            .get(account)
            .unwrap_or(&0)
    }

    fn set_fail_credits(&self, fail: bool) {
        self.state.lock().unwrap().fail_credits = fail;
    }

    fn adjust(&self, account: &str, delta_cents: i64) {
        let mut state = self.state.lock().unwrap();
        *state.balances.entry(account.to_string()).or_insert(0) += delta_cents;
    }
}

struct DebitStep {
    ledger: Ledger,
}

#[async_trait]
impl SagaStep<TransferData> for DebitStep {
    fn name(&self) -> &str {
        "debit"
    }

    async fn execute(
        &self,
        data: &mut TransferData,
        _context: &mut SagaContext,
    ) -> Result<(), StepError> {
        if self.ledger.balance(&data.from) < data.amount_cents {
            return Err(StepError::new("insufficient funds"));
        }
        self.ledger.adjust(&data.from, -data.amount_cents);
        Ok(())
    }

    async fn compensate(
        &self,
        data: &mut TransferData,
        _context: &SagaContext,
        _cause: &StepError,
    ) -> Result<(), StepError> {
        self.ledger.adjust(&data.from, data.amount_cents);
        Ok(())
    }
}

struct CreditStep {
    ledger: Ledger,
}

#[async_trait]
impl SagaStep<TransferData> for CreditStep {
    fn name(&self) -> &str {
        "credit"
    }

    async fn execute(
        &self,
        data: &mut TransferData,
        _context: &mut SagaContext,
    ) -> Result<(), StepError> {
        if self.ledger.state.lock().unwrap().fail_credits {
            return Err(StepError::new("insufficient funds"));
        }
        self.ledger.adjust(&data.to, data.amount_cents);
        Ok(())
    }

    async fn compensate(
        &self,
        data: &mut TransferData,
        _context: &SagaContext,
        _cause: &StepError,
    ) -> Result<(), StepError> {
        self.ledger.adjust(&data.to, -data.amount_cents);
        Ok(())
    }
}

struct TestHarness {
    engine: SagaEngine<TransferData, InMemorySagaStore>,
    store: InMemorySagaStore,
    ledger: Ledger,
    events: Arc<Mutex<Vec<Event>>>,
}

impl TestHarness {
    async fn new() -> Self {
        let bus = Arc::new(InMemoryEventBus::new());
        let events = Arc::new(Mutex::new(Vec::new()));

        for event_type in [
            "saga.transfer.step.completed",
            "saga.transfer.step.compensated",
            "saga.transfer.completed",
            "saga.transfer.failed",
        ] {
            let captured = Arc::clone(&events);
            bus.on(
                event_type,
                handler_fn(move |event| {
                    let captured = Arc::clone(&captured);
                    async move {
                        captured.lock().unwrap().push(event);
                        Ok(())
                    }
                }),
            )
            .await
            .unwrap();
        }

        let ledger = Ledger::new();
        let store = InMemorySagaStore::new();
        let publisher = EventPublisher::new(
            Arc::clone(&bus) as Arc<dyn EventBus>,
            EventFactory::new("transfer-service"),
        );

        let definition = SagaDefinition::builder("transfer")
            .step(DebitStep {
                ledger: ledger.clone(),
            })
            .step(CreditStep {
                ledger: ledger.clone(),
            })
            .build()
            .unwrap();

        let engine = SagaEngine::new(definition, store.clone()).with_publisher(publisher);

        Self {
            engine,
            store,
            ledger,
            events,
        }
    }

    fn event_types(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.event_type.clone())
            .collect()
    }
}

fn transfer(amount_cents: i64) -> TransferData {
    TransferData {
        from: "acc-1".to_string(),
        to: "acc-2".to_string(),
        amount_cents,
    }
}

#[tokio::test]
async fn transfer_happy_path_moves_funds_and_publishes_lifecycle() {
    let h = TestHarness::new().await;
    h.ledger.set_balance("acc-1", 1000);

    let execution = h
        .engine
        .execute(transfer(400), ContextOverrides::default())
        .await
        .unwrap();

    assert_eq!(execution.status, SagaStatus::Completed);
    assert_eq!(execution.context.completed_steps, vec!["debit", "credit"]);
    assert_eq!(h.ledger.balance("acc-1"), 600);
    assert_eq!(h.ledger.balance("acc-2"), 400);

    assert_eq!(
        h.event_types(),
        vec![
            "saga.transfer.step.completed",
            "saga.transfer.step.completed",
            "saga.transfer.completed",
        ]
    );

    // Every lifecycle event is threaded onto the execution's chain.
    let events = h.events.lock().unwrap();
    for event in events.iter() {
        assert_eq!(
            event.metadata.correlation_id,
            Some(execution.context.correlation_id)
        );
        assert_eq!(event.metadata.source, "transfer-service");
    }
}

#[tokio::test]
async fn failed_credit_compensates_debit_and_surfaces_the_original_error() {
    let h = TestHarness::new().await;
    h.ledger.set_balance("acc-1", 1000);
    h.ledger.set_fail_credits(true);

    let error = h
        .engine
        .execute(transfer(400), ContextOverrides::default())
        .await
        .unwrap_err();

    match &error {
        SagaError::StepFailed { step, source } => {
            assert_eq!(step, "credit");
            assert_eq!(source.message(), "insufficient funds");
        }
        other => panic!("expected StepFailed, got {other:?}"),
    }

    // The debit was rolled back.
    assert_eq!(h.ledger.balance("acc-1"), 1000);
    assert_eq!(h.ledger.balance("acc-2"), 0);

    assert_eq!(
        h.event_types(),
        vec![
            "saga.transfer.step.completed",
            "saga.transfer.step.compensated",
            "saga.transfer.failed",
        ]
    );

    let ids = <InMemorySagaStore as SagaStore<TransferData>>::list_by_status(
        &h.store,
        SagaStatus::Compensated,
    )
    .await
    .unwrap();
    assert_eq!(ids.len(), 1);

    let persisted: SagaExecution<TransferData> = h.store.load(ids[0]).await.unwrap().unwrap();
    assert_eq!(persisted.context.failed_step.as_deref(), Some("credit"));
    assert_eq!(persisted.error.as_deref(), Some("insufficient funds"));
    assert!(persisted.completed_at.is_some());
}

#[tokio::test]
async fn execute_rejections_always_leave_a_terminal_status() {
    let h = TestHarness::new().await;
    h.ledger.set_balance("acc-1", 100);

    // Debit fails immediately: nothing to compensate.
    let error = h
        .engine
        .execute(transfer(400), ContextOverrides::default())
        .await
        .unwrap_err();
    assert!(matches!(error, SagaError::StepFailed { .. }));

    let ids = <InMemorySagaStore as SagaStore<TransferData>>::list_by_status(
        &h.store,
        SagaStatus::Compensated,
    )
    .await
    .unwrap();
    assert_eq!(ids.len(), 1);

    let persisted: SagaExecution<TransferData> = h.store.load(ids[0]).await.unwrap().unwrap();
    assert!(persisted.status.is_terminal());
    assert!(persisted.completed_at.is_some());
    assert!(persisted.context.completed_steps.is_empty());
}

#[tokio::test]
async fn restart_sweep_finds_and_resumes_interrupted_executions() {
    let h = TestHarness::new().await;

    // A transfer that was debited and then interrupted mid-credit: the
    // source account already reflects the debit.
    h.ledger.set_balance("acc-1", 600);
    h.ledger.set_balance("acc-2", 0);

    let saga_id = SagaId::new();
    let mut context = SagaContext::new(saga_id, common::CorrelationId::new());
    context.completed_steps.push("debit".to_string());
    let mut interrupted = SagaExecution::new("transfer", transfer(400), context);
    interrupted.status = SagaStatus::Running;
    interrupted.current_step = Some("credit".to_string());
    h.store.persist(&interrupted).await.unwrap();

    let resumable = <InMemorySagaStore as SagaStore<TransferData>>::list_by_status(
        &h.store,
        SagaStatus::Running,
    )
    .await
    .unwrap();
    assert_eq!(resumable, vec![saga_id]);

    let execution = h.engine.resume(saga_id).await.unwrap();

    assert_eq!(execution.status, SagaStatus::Completed);
    assert_eq!(execution.context.completed_steps, vec!["debit", "credit"]);
    // The debit did not run again.
    assert_eq!(h.ledger.balance("acc-1"), 600);
    assert_eq!(h.ledger.balance("acc-2"), 400);
}

#[tokio::test]
async fn concurrent_executions_do_not_share_context() {
    let h = TestHarness::new().await;
    h.ledger.set_balance("acc-1", 1000);

    let (first, second) = tokio::join!(
        h.engine.execute(transfer(100), ContextOverrides::default()),
        h.engine.execute(transfer(200), ContextOverrides::default()),
    );
    let first = first.unwrap();
    let second = second.unwrap();

    assert_ne!(first.id, second.id);
    assert_ne!(
        first.context.correlation_id,
        second.context.correlation_id
    );
    assert_eq!(first.context.completed_steps, vec!["debit", "credit"]);
    assert_eq!(second.context.completed_steps, vec!["debit", "credit"]);
    assert_eq!(h.ledger.balance("acc-1"), 700);
    assert_eq!(h.ledger.balance("acc-2"), 300);
}
