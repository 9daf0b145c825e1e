//! Massage domain events
//!
//! Events emitted by pipeline activities for observability and side effects.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events emitted by the massaging pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MassageEvent {
    /// A batch job was submitted and queued for fan-out
    BatchSubmitted { job_id: Uuid },

    /// Fan-out finished enumerating the lead list
    BatchStarted { job_id: Uuid, total_leads: i64 },

    /// A batch job failed validation and will not run
    BatchValidationFailed { job_id: Uuid, reason: String },

    /// An item job was created (or merged) for a lead
    ItemQueued { item_key: String },

    /// A prompt was submitted to the generation service
    GenerationSubmitted {
        item_key: String,
        request_id: String,
    },

    /// An item was skipped (target column already or concurrently filled)
    ItemSkipped { item_key: String, reason: String },

    /// An item ended in error
    ItemFailed { item_key: String, reason: String },

    /// An item was cancelled because its batch was abandoned
    ItemCancelled { item_key: String },

    /// A generation output was written into the lead record
    OutputApplied {
        item_key: String,
        request_id: String,
    },

    /// All leads accounted for; batch finalized
    BatchCompleted { job_id: Uuid, summary: String },
}
