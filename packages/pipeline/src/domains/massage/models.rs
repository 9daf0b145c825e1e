//! Models for the lead massaging pipeline.
//!
//! A `BatchJob` is one massaging campaign over a lead list; an `ItemJob` is
//! one lead's unit of work inside it. `LeadRecord`/`LeadList` mirror the rows
//! the pipeline reads from and conditionally patches in the lead store.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;
use uuid::Uuid;

// ============================================================================
// Status Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "batch_job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BatchJobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl BatchJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchJobStatus::Pending => "pending",
            BatchJobStatus::Running => "running",
            BatchJobStatus::Completed => "completed",
            BatchJobStatus::Failed => "failed",
            BatchJobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchJobStatus::Completed | BatchJobStatus::Failed | BatchJobStatus::Cancelled
        )
    }

    /// Whether downstream item processing must stop honoring this batch.
    pub fn is_abandoned(&self) -> bool {
        matches!(self, BatchJobStatus::Failed | BatchJobStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "item_job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ItemJobStatus {
    #[default]
    Queued,
    Processing,
    Done,
    Skipped,
    Error,
    Cancelled,
}

impl ItemJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemJobStatus::Queued => "queued",
            ItemJobStatus::Processing => "processing",
            ItemJobStatus::Done => "done",
            ItemJobStatus::Skipped => "skipped",
            ItemJobStatus::Error => "error",
            ItemJobStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal statuses are final and must never be overwritten.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemJobStatus::Done
                | ItemJobStatus::Skipped
                | ItemJobStatus::Error
                | ItemJobStatus::Cancelled
        )
    }
}

// ============================================================================
// Batch Job
// ============================================================================

/// One AI massaging campaign over a lead list.
///
/// Progress counters are only ever mutated through atomic increments
/// ([`ProgressDelta`]); once fan-out completes the invariants
/// `processed = newly + already + errors` and `remaining = total - processed`
/// hold.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct BatchJob {
    #[builder(default = Uuid::new_v4())]
    pub job_id: Uuid,

    // Inputs
    pub list_id: Uuid,
    pub source_columns: Vec<String>,
    pub new_column_name: String,
    pub prompt: String,

    // State
    #[builder(default)]
    pub status: BatchJobStatus,

    // Progress counters
    #[builder(default = 0)]
    pub total_leads: i64,
    #[builder(default = 0)]
    pub processed_count: i64,
    #[builder(default = 0)]
    pub newly_processed_count: i64,
    #[builder(default = 0)]
    pub already_processed_count: i64,
    #[builder(default = 0)]
    pub error_count: i64,
    #[builder(default = 0)]
    pub remaining_leads: i64,

    /// Set once fan-out has enumerated the full list; completion detection
    /// refuses to run before this so a fast item cannot finalize a batch
    /// that is still fanning out.
    #[builder(default, setter(strip_option))]
    pub fanned_out_at: Option<DateTime<Utc>>,

    #[builder(default, setter(strip_option))]
    pub message: Option<String>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl BatchJob {
    /// Whether completion detection may fire for this batch.
    pub fn is_drained(&self) -> bool {
        self.fanned_out_at.is_some() && self.remaining_leads <= 0
    }

    /// Human-readable completion summary.
    pub fn summary(&self) -> String {
        format!(
            "Processed {} leads: {} massaged, {} already filled, {} errors",
            self.total_leads,
            self.newly_processed_count,
            self.already_processed_count,
            self.error_count
        )
    }
}

/// Submission payload for a new batch job, produced by an out-of-scope
/// UI/CLI. A single `source_column` is normalized into a one-element
/// `source_columns`. Missing fields are representable so validation can
/// reject them with a message instead of a deserialization failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewBatchJob {
    pub list_id: Option<Uuid>,
    #[serde(default)]
    pub source_columns: Vec<String>,
    #[serde(default)]
    pub source_column: Option<String>,
    pub new_column_name: Option<String>,
    pub prompt: Option<String>,
}

impl NewBatchJob {
    /// Source columns with the legacy single-column field folded in.
    pub fn normalized_source_columns(&self) -> Vec<String> {
        if !self.source_columns.is_empty() {
            return self.source_columns.clone();
        }
        self.source_column.iter().cloned().collect()
    }
}

/// Signed counter increments applied atomically to a batch job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressDelta {
    pub processed: i64,
    pub newly: i64,
    pub already: i64,
    pub errors: i64,
    pub remaining: i64,
}

impl ProgressDelta {
    /// One lead massaged by the generation service.
    pub fn newly_done() -> Self {
        Self {
            processed: 1,
            newly: 1,
            remaining: -1,
            ..Self::default()
        }
    }

    /// One lead whose target column was already (or concurrently) filled.
    pub fn already_filled() -> Self {
        Self {
            processed: 1,
            already: 1,
            remaining: -1,
            ..Self::default()
        }
    }

    /// One lead that could not be processed.
    pub fn errored() -> Self {
        Self {
            processed: 1,
            errors: 1,
            remaining: -1,
            ..Self::default()
        }
    }
}

// ============================================================================
// Item Job
// ============================================================================

/// One lead's unit of work within a batch job.
///
/// The deterministic `item_key` guarantees at most one item per lead per
/// batch even under duplicate fan-out attempts.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct ItemJob {
    pub item_key: String,
    pub job_id: Uuid,
    pub list_id: Uuid,
    pub lead_item_id: Uuid,
    pub source_columns: Vec<String>,
    pub new_column_name: String,
    pub prompt: String,
    pub status: ItemJobStatus,
    pub generation_request_id: Option<String>,
    pub output: Option<String>,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ItemJob {
    /// Deterministic composite key for one lead within one batch.
    pub fn key_for(job_id: Uuid, lead_item_id: Uuid) -> String {
        format!("{job_id}:{lead_item_id}")
    }

    /// Create a queued item for one lead of a batch.
    pub fn for_lead(job: &BatchJob, lead_item_id: Uuid) -> Self {
        Self {
            item_key: Self::key_for(job.job_id, lead_item_id),
            job_id: job.job_id,
            list_id: job.list_id,
            lead_item_id,
            source_columns: job.source_columns.clone(),
            new_column_name: job.new_column_name.clone(),
            prompt: job.prompt.clone(),
            status: ItemJobStatus::Queued,
            generation_request_id: None,
            output: None,
            message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

/// Field updates applied together with a guarded item status transition.
#[derive(Debug, Clone, Default)]
pub struct ItemAdvance {
    pub status: ItemJobStatus,
    pub generation_request_id: Option<String>,
    pub output: Option<String>,
    pub message: Option<String>,
}

impl ItemAdvance {
    pub fn to(status: ItemJobStatus) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn with_request_id(mut self, request_id: &str) -> Self {
        self.generation_request_id = Some(request_id.to_string());
        self
    }

    pub fn with_output(mut self, output: &str) -> Self {
        self.output = Some(output.to_string());
        self
    }

    pub fn with_message(mut self, message: &str) -> Self {
        self.message = Some(message.to_string());
        self
    }
}

// ============================================================================
// Lead Store Models
// ============================================================================

/// Per-column annotation stamped when the pipeline fills a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStatus {
    pub state: ColumnState,
    pub updated_at: DateTime<Utc>,
    /// Generation request that produced the value; lets a re-delivered
    /// completion recognize its own earlier write.
    pub source_request_id: String,
}

impl ColumnStatus {
    pub fn done(request_id: &str) -> Self {
        Self {
            state: ColumnState::Done,
            updated_at: Utc::now(),
            source_request_id: request_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnState {
    Done,
}

/// Outcome of the conditional column write on a lead record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnWriteOutcome {
    /// The column was empty and the value was written.
    Applied,
    /// This generation request already wrote the value (re-delivery).
    AlreadyApplied,
    /// Another writer filled the column first; the value was not touched.
    Filled,
    /// The lead record does not exist.
    Missing,
}

/// A row in the target dataset. Owned by the lead store; the pipeline only
/// reads it and conditionally patches one column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadRecord {
    pub lead_item_id: Uuid,
    pub list_id: Uuid,
    pub data: BTreeMap<String, String>,
    #[serde(default)]
    pub column_status: BTreeMap<String, ColumnStatus>,
}

impl LeadRecord {
    /// Trimmed value of a column; missing columns read as empty.
    pub fn value_trimmed(&self, column: &str) -> &str {
        self.data.get(column).map(|v| v.trim()).unwrap_or("")
    }

    /// Decide the conditional-write outcome for a column without mutating.
    ///
    /// Shared by every store backend so they agree on the race semantics.
    pub fn column_write_outcome(&self, column: &str, request_id: &str) -> ColumnWriteOutcome {
        if self.value_trimmed(column).is_empty() {
            return ColumnWriteOutcome::Applied;
        }
        let ours = self
            .column_status
            .get(column)
            .is_some_and(|status| status.source_request_id == request_id);
        if ours {
            ColumnWriteOutcome::AlreadyApplied
        } else {
            ColumnWriteOutcome::Filled
        }
    }
}

/// Column schema for a lead list; append-only from this pipeline.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct LeadList {
    pub list_id: Uuid,
    pub columns: Vec<String>,
}

/// A page of leads plus the token for the next page, in stable insertion
/// order.
#[derive(Debug, Clone)]
pub struct LeadPage {
    pub records: Vec<LeadRecord>,
    pub next_page_token: Option<String>,
}

// ============================================================================
// Generation Service Models
// ============================================================================

/// Opaque bag round-tripped through the generation service to identify the
/// owning item job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationMetadata {
    pub job_id: Uuid,
    pub item_key: String,
    pub list_id: Uuid,
    pub lead_item_id: Uuid,
    pub new_column_name: String,
    pub source_columns: Vec<String>,
}

impl GenerationMetadata {
    pub fn for_item(item: &ItemJob) -> Self {
        Self {
            job_id: item.job_id,
            item_key: item.item_key.clone(),
            list_id: item.list_id,
            lead_item_id: item.lead_item_id,
            new_column_name: item.new_column_name.clone(),
            source_columns: item.source_columns.clone(),
        }
    }
}

/// Delivered once a generation request's output becomes available. May be
/// delivered more than once; consumers dedupe on the item job's status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationCompletion {
    pub request_id: String,
    pub metadata: GenerationMetadata,
    pub output: String,
}
