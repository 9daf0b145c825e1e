//! Lead massaging job pipeline.
//!
//! Fan-out/fan-in batch processing over a lead list: a `BatchJob` fans out
//! one `ItemJob` per lead, each item submits an AI transformation prompt,
//! completions are reconciled back into the lead rows, and the batch is
//! finalized once every lead is accounted for.
//!
//! - [`domains::massage`] holds the models and the four pipeline activities.
//! - [`kernel`] holds the infrastructure seams: store traits, the command
//!   queue and worker, the Postgres and in-memory backends, and the
//!   generation service implementations.

pub mod common;
pub mod domains;
pub mod kernel;

pub use kernel::{PipelineDeps, PipelineWorker, PipelineWorkerConfig};
