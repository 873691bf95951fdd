//! Saga engine for cross-service multi-step transactions.
//!
//! A saga is a named, ordered sequence of steps executed against a data
//! payload. Each step carries a compensating action; when a step fails
//! beyond its retry budget, the engine runs the compensations of all
//! previously completed steps in reverse order, so the system converges
//! back to a consistent state without a global transaction.
//!
//! The engine persists an execution snapshot before every state transition
//! (see `saga-store`), publishes lifecycle events through an optional
//! `event-bus` publisher, and surfaces the original step error to the
//! caller after compensation completes.
//!
//! ```text
//! Pending ──► Running ──┬──► Completed
//!                       ├──► Compensating ──► Compensated
//!                       └──► Failed
//! ```

pub mod definition;
pub mod engine;
pub mod error;
pub mod step;

pub use definition::{SagaDefinition, SagaDefinitionBuilder, SagaHook};
pub use engine::{ContextOverrides, SagaEngine};
pub use error::{Result, SagaError, StepError};
pub use saga_store::{SagaContext, SagaExecution, SagaStatus};
pub use step::SagaStep;
