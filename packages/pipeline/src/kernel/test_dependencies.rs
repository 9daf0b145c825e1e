// TestDependencies - in-memory wiring for tests
//
// Wires the memory stores, the mock generation service and a capturing event
// sink into a PipelineDeps, keeping handles to each so tests can seed state
// and assert on what happened.

use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::domains::massage::events::MassageEvent;
use crate::kernel::deps::PipelineDeps;
use crate::kernel::generation::MockGeneration;
use crate::kernel::memory::{MemoryBatchStore, MemoryLeadStore};
use crate::kernel::queue::MemoryCommandQueue;
use crate::kernel::runner::{PipelineWorker, PipelineWorkerConfig};
use crate::kernel::traits::BaseEventSink;

/// Event sink that captures events for assertions.
#[derive(Default)]
pub struct TestEventSink {
    events: Mutex<Vec<MassageEvent>>,
}

impl TestEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MassageEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn contains(&self, expected: &MassageEvent) -> bool {
        self.events.lock().unwrap().iter().any(|e| e == expected)
    }
}

impl BaseEventSink for TestEventSink {
    fn publish(&self, event: MassageEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub struct TestDependencies {
    pub deps: Arc<PipelineDeps>,
    pub batch_store: Arc<MemoryBatchStore>,
    pub lead_store: Arc<MemoryLeadStore>,
    pub generation: Arc<MockGeneration>,
    pub queue: Arc<MemoryCommandQueue>,
    pub events: Arc<TestEventSink>,
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}

impl TestDependencies {
    pub fn new() -> Self {
        Self::with_generation(MockGeneration::new())
    }

    /// Use a pre-configured mock (custom outputs, held leads).
    pub fn with_generation(generation: MockGeneration) -> Self {
        let batch_store = Arc::new(MemoryBatchStore::new());
        let lead_store = Arc::new(MemoryLeadStore::new());
        let generation = Arc::new(generation);
        let queue = Arc::new(MemoryCommandQueue::new());
        let events = Arc::new(TestEventSink::new());
        let deps = Arc::new(PipelineDeps::new(
            batch_store.clone(),
            lead_store.clone(),
            generation.clone(),
            queue.clone(),
            events.clone(),
        ));
        Self {
            deps,
            batch_store,
            lead_store,
            generation,
            queue,
            events,
        }
    }

    /// A worker over the shared queue and deps.
    pub fn worker(&self) -> PipelineWorker {
        PipelineWorker::with_config(self.deps.clone(), PipelineWorkerConfig::default())
    }

    /// Deliver all pending, non-held generation completions into the queue.
    pub async fn deliver_completions(&self) -> Result<usize> {
        self.generation.deliver_pending(self.queue.as_ref()).await
    }
}
