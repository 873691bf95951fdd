use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use saga_store::SagaExecution;

use crate::error::SagaError;
use crate::step::SagaStep;

/// Callback invoked with the finalized execution after success or failure.
pub type SagaHook<D> =
    Arc<dyn for<'a> Fn(&'a SagaExecution<D>) -> BoxFuture<'a, ()> + Send + Sync>;

/// A named, ordered sequence of steps with optional outcome hooks.
///
/// Immutable once built; one engine owns one definition and every
/// `execute()` call runs the same step list. The builder rejects duplicate
/// step names and precomputes the name → position table used for
/// compensation lookup.
pub struct SagaDefinition<D> {
    name: String,
    steps: Vec<Arc<dyn SagaStep<D>>>,
    step_positions: HashMap<String, usize>,
    on_success: Option<SagaHook<D>>,
    on_failure: Option<SagaHook<D>>,
}

impl<D> SagaDefinition<D> {
    /// Starts building a definition with the given name.
    pub fn builder(name: impl Into<String>) -> SagaDefinitionBuilder<D> {
        SagaDefinitionBuilder {
            name: name.into(),
            steps: Vec::new(),
            on_success: None,
            on_failure: None,
        }
    }

    /// The definition name, used in lifecycle event types
    /// (`saga.<name>.completed` etc.).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The steps in declaration order.
    pub fn steps(&self) -> &[Arc<dyn SagaStep<D>>] {
        &self.steps
    }

    /// Looks a step up by name.
    pub fn step_by_name(&self, name: &str) -> Option<&Arc<dyn SagaStep<D>>> {
        self.step_positions.get(name).map(|&i| &self.steps[i])
    }

    /// Returns a step's position in declaration order.
    pub fn step_position(&self, name: &str) -> Option<usize> {
        self.step_positions.get(name).copied()
    }

    pub(crate) fn on_success(&self) -> Option<&SagaHook<D>> {
        self.on_success.as_ref()
    }

    pub(crate) fn on_failure(&self) -> Option<&SagaHook<D>> {
        self.on_failure.as_ref()
    }
}

/// Builder for [`SagaDefinition`].
pub struct SagaDefinitionBuilder<D> {
    name: String,
    steps: Vec<Arc<dyn SagaStep<D>>>,
    on_success: Option<SagaHook<D>>,
    on_failure: Option<SagaHook<D>>,
}

impl<D> SagaDefinitionBuilder<D> {
    /// Appends a step to the sequence.
    pub fn step(self, step: impl SagaStep<D> + 'static) -> Self {
        self.arc_step(Arc::new(step))
    }

    /// Appends an already-shared step to the sequence.
    pub fn arc_step(mut self, step: Arc<dyn SagaStep<D>>) -> Self {
        self.steps.push(step);
        self
    }

    /// Sets the callback invoked after the saga completes.
    pub fn on_success<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(&'a SagaExecution<D>) -> BoxFuture<'a, ()> + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(hook));
        self
    }

    /// Sets the callback invoked after the saga is compensated.
    pub fn on_failure<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(&'a SagaExecution<D>) -> BoxFuture<'a, ()> + Send + Sync + 'static,
    {
        self.on_failure = Some(Arc::new(hook));
        self
    }

    /// Validates step-name uniqueness and builds the definition.
    pub fn build(self) -> Result<SagaDefinition<D>, SagaError> {
        let mut step_positions = HashMap::with_capacity(self.steps.len());
        for (position, step) in self.steps.iter().enumerate() {
            if step_positions
                .insert(step.name().to_string(), position)
                .is_some()
            {
                return Err(SagaError::DuplicateStep(step.name().to_string()));
            }
        }

        Ok(SagaDefinition {
            name: self.name,
            steps: self.steps,
            step_positions,
            on_success: self.on_success,
            on_failure: self.on_failure,
        })
    }
}
