//! Domain errors callers match on. Everything transient stays `anyhow` and
//! bubbles to the worker for redelivery.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum MassageError {
    /// Batch job failed validation; fatal, surfaced via the job's message.
    #[error("invalid batch job: {0}")]
    Validation(String),

    #[error("batch job {0} not found")]
    JobNotFound(Uuid),

    #[error("item job {0} not found")]
    ItemNotFound(String),
}
