//! Completion detector: finalizes a batch once every lead is accounted for.

use anyhow::Result;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domains::massage::events::MassageEvent;
use crate::domains::massage::models::BatchJobStatus;
use crate::kernel::deps::PipelineDeps;

/// Finalize the batch if it has drained. Errors are logged and swallowed:
/// retrying finalization could double-apply nothing, but failing the calling
/// reconciliation over it would.
pub async fn finalize_batch(job_id: Uuid, deps: &PipelineDeps) {
    if let Err(error) = try_finalize(job_id, deps).await {
        warn!(job_id = %job_id, error = %error, "batch finalization failed; not retrying");
    }
}

async fn try_finalize(job_id: Uuid, deps: &PipelineDeps) -> Result<()> {
    let Some(job) = deps.batch_store.get_job(job_id).await? else {
        return Ok(());
    };
    if !job.is_drained() || job.status == BatchJobStatus::Cancelled {
        return Ok(());
    }

    // The conditional transition is the sole idempotency guard; concurrent
    // finalizers race here and exactly one wins.
    let summary = job.summary();
    let Some(completed) = deps
        .batch_store
        .transition_job(
            job_id,
            &[
                BatchJobStatus::Pending,
                BatchJobStatus::Running,
                BatchJobStatus::Failed,
            ],
            BatchJobStatus::Completed,
            Some(&summary),
        )
        .await?
    else {
        debug!(job_id = %job_id, "batch already finalized");
        return Ok(());
    };

    // Only the winner patches the list schema; append-if-absent makes a
    // double-run harmless anyway.
    deps.lead_store
        .add_list_column(completed.list_id, &completed.new_column_name)
        .await?;

    deps.events.publish(MassageEvent::BatchCompleted {
        job_id,
        summary: summary.clone(),
    });
    info!(job_id = %job_id, summary = %summary, "batch completed");
    Ok(())
}
