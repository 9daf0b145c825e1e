//! Massage domain activities - the pipeline's stages.
//!
//! Controller → (N) processors → generation service → reconciler →
//! completion detector. Every edge between them is a command on the queue,
//! delivered at least once; every activity here is idempotent.

mod controller;
mod finalizer;
mod processor;
mod reconciler;

pub use controller::{start_batch, submit_batch};
pub use finalizer::finalize_batch;
pub use processor::process_item;
pub use reconciler::apply_completion;
