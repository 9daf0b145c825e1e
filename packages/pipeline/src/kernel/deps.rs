//! Dependency container handed to pipeline activities.

use std::sync::Arc;

use sqlx::PgPool;

use crate::kernel::postgres::{PostgresBatchStore, PostgresLeadStore};
use crate::kernel::queue::CommandQueue;
use crate::kernel::traits::{
    BaseBatchStore, BaseEventSink, BaseGeneration, BaseLeadStore, TracingEventSink,
};

/// Everything an activity needs, behind the `Base*` seams so tests can swap
/// in memory stores and the mock generation service.
pub struct PipelineDeps {
    pub batch_store: Arc<dyn BaseBatchStore>,
    pub lead_store: Arc<dyn BaseLeadStore>,
    pub generation: Arc<dyn BaseGeneration>,
    pub queue: Arc<dyn CommandQueue>,
    pub events: Arc<dyn BaseEventSink>,
}

impl PipelineDeps {
    pub fn new(
        batch_store: Arc<dyn BaseBatchStore>,
        lead_store: Arc<dyn BaseLeadStore>,
        generation: Arc<dyn BaseGeneration>,
        queue: Arc<dyn CommandQueue>,
        events: Arc<dyn BaseEventSink>,
    ) -> Self {
        Self {
            batch_store,
            lead_store,
            generation,
            queue,
            events,
        }
    }

    /// Production wiring: Postgres-backed stores, events to the log.
    pub fn postgres(
        pool: PgPool,
        generation: Arc<dyn BaseGeneration>,
        queue: Arc<dyn CommandQueue>,
    ) -> Self {
        Self {
            batch_store: Arc::new(PostgresBatchStore::new(pool.clone())),
            lead_store: Arc::new(PostgresLeadStore::new(pool)),
            generation,
            queue,
            events: Arc::new(TracingEventSink),
        }
    }
}
