pub mod types;

pub use types::{CorrelationId, EventId, SagaId};
