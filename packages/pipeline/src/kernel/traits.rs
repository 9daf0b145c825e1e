// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// The activities in domains/massage are the only callers; they compose these
// primitives into the controller / processor / reconciler / finalizer steps.
//
// Naming convention: Base* for trait names (e.g., BaseLeadStore).

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::domains::massage::events::MassageEvent;
use crate::domains::massage::models::{
    BatchJob, BatchJobStatus, ColumnWriteOutcome, GenerationMetadata, ItemAdvance, ItemJob,
    ItemJobStatus, LeadList, LeadPage, LeadRecord, ProgressDelta,
};

// =============================================================================
// Lead Store Trait (external collaborator: the dataset being massaged)
// =============================================================================

#[async_trait]
pub trait BaseLeadStore: Send + Sync {
    /// Page through a list's leads in stable insertion order.
    async fn list_leads(
        &self,
        list_id: Uuid,
        page_token: Option<String>,
        page_size: usize,
    ) -> Result<LeadPage>;

    async fn get_lead(&self, lead_item_id: Uuid) -> Result<Option<LeadRecord>>;

    /// Transactional read-then-conditional-write of one column.
    ///
    /// Writes the value only while the column is empty (post-trim) and stamps
    /// a per-column annotation carrying `request_id`; a non-empty column is
    /// never overwritten. The annotation lets a re-delivered completion tell
    /// its own earlier write (`AlreadyApplied`) apart from a lost race
    /// (`Filled`).
    async fn set_column_if_empty(
        &self,
        lead_item_id: Uuid,
        column: &str,
        value: &str,
        request_id: &str,
    ) -> Result<ColumnWriteOutcome>;

    async fn get_list(&self, list_id: Uuid) -> Result<Option<LeadList>>;

    /// Append a column to the list schema if absent. Idempotent.
    async fn add_list_column(&self, list_id: Uuid, column: &str) -> Result<()>;
}

// =============================================================================
// Batch Store Trait (batch jobs, item jobs, progress counters)
// =============================================================================

#[async_trait]
pub trait BaseBatchStore: Send + Sync {
    async fn insert_job(&self, job: BatchJob) -> Result<BatchJob>;

    async fn get_job(&self, job_id: Uuid) -> Result<Option<BatchJob>>;

    /// Guarded status transition: applies only while the current status is in
    /// `expected`, returning the updated job, or `None` when the guard loses.
    /// This is the single-writer guard for finalization.
    async fn transition_job(
        &self,
        job_id: Uuid,
        expected: &[BatchJobStatus],
        to: BatchJobStatus,
        message: Option<&str>,
    ) -> Result<Option<BatchJob>>;

    /// Record the fan-out total in one atomic statement:
    /// `total_leads = total`, `remaining_leads = total - processed_count`,
    /// and stamp `fanned_out_at`. Safe to re-run and safe against items that
    /// already finished while fan-out was still enumerating.
    async fn set_totals(&self, job_id: Uuid, total_leads: i64) -> Result<()>;

    /// Apply counter deltas as atomic increments. Never read-modify-write:
    /// up to one concurrent writer per lead races on these fields.
    async fn apply_progress(&self, job_id: Uuid, delta: ProgressDelta) -> Result<()>;

    /// Create-or-merge an item by its deterministic key. Repeated fan-out
    /// attempts must return the existing row untouched (status, output and
    /// request id are never clobbered).
    async fn upsert_item(&self, item: ItemJob) -> Result<ItemJob>;

    async fn get_item(&self, item_key: &str) -> Result<Option<ItemJob>>;

    /// Compare-and-set item transition: applies `advance` only while the
    /// current status is in `expected`. Returns `None` when the guard loses,
    /// which makes re-delivered events no-ops.
    async fn advance_item(
        &self,
        item_key: &str,
        expected: &[ItemJobStatus],
        advance: ItemAdvance,
    ) -> Result<Option<ItemJob>>;

    async fn count_items(&self, job_id: Uuid) -> Result<i64>;
}

// =============================================================================
// Generation Service Trait (external collaborator: the LLM)
// =============================================================================

#[async_trait]
pub trait BaseGeneration: Send + Sync {
    /// Submit a prompt; returns a request id immediately. The output arrives
    /// later as an `ApplyCompletion` command carrying the metadata back.
    async fn submit(&self, prompt: &str, metadata: GenerationMetadata) -> Result<String>;
}

// =============================================================================
// Event Sink Trait (observability)
// =============================================================================

pub trait BaseEventSink: Send + Sync {
    fn publish(&self, event: MassageEvent);
}

/// Event sink that logs through `tracing`.
pub struct TracingEventSink;

impl BaseEventSink for TracingEventSink {
    fn publish(&self, event: MassageEvent) {
        tracing::info!(event = ?event, "pipeline event");
    }
}
