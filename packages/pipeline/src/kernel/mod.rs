//! Kernel module - pipeline infrastructure and dependencies.

pub mod deps;
pub mod generation;
pub mod memory;
pub mod postgres;
pub mod queue;
pub mod runner;
pub mod test_dependencies;
pub mod traits;

pub use deps::PipelineDeps;
pub use generation::{MockGeneration, RigGeneration, SubmittedPrompt};
pub use memory::{MemoryBatchStore, MemoryLeadStore};
pub use postgres::{migrate, PostgresBatchStore, PostgresLeadStore};
pub use queue::{ClaimedCommand, CommandQueue, MemoryCommandQueue};
pub use runner::{PipelineWorker, PipelineWorkerConfig};
pub use test_dependencies::{TestDependencies, TestEventSink};
pub use traits::*;
