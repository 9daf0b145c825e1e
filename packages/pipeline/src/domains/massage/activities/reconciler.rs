//! Result reconciler: applies generation outputs back into the lead store.

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::domains::massage::events::MassageEvent;
use crate::domains::massage::models::{
    BatchJobStatus, ColumnWriteOutcome, GenerationCompletion, ItemAdvance, ItemJobStatus,
    ProgressDelta,
};
use crate::kernel::deps::PipelineDeps;

use super::finalizer::finalize_batch;

/// Reconcile one generation completion.
///
/// Exactly one of three outcomes fires per completion: the output is applied
/// (`done`), the lead vanished (`error`), or another writer filled the
/// column first (`skipped`). The lead write is a conditional single-document
/// update and the item transition is a compare-and-set; counters ride the
/// winning transition, so a re-delivered completion changes nothing.
pub async fn apply_completion(completion: &GenerationCompletion, deps: &PipelineDeps) -> Result<()> {
    let metadata = &completion.metadata;
    let item_key = metadata.item_key.as_str();

    let Some(item) = deps.batch_store.get_item(item_key).await? else {
        warn!(item_key, request_id = %completion.request_id, "completion for unknown item; dropping");
        return Ok(());
    };
    if item.status.is_terminal() {
        debug!(item_key, status = item.status.as_str(), "completion already applied; no-op");
        return Ok(());
    }

    let Some(job) = deps.batch_store.get_job(item.job_id).await? else {
        warn!(item_key, job_id = %item.job_id, "parent batch job missing; dropping completion");
        return Ok(());
    };

    // A cancelled batch stops applying results: no lead mutation, no
    // counters.
    if job.status == BatchJobStatus::Cancelled {
        if deps
            .batch_store
            .advance_item(
                item_key,
                &[ItemJobStatus::Queued, ItemJobStatus::Processing],
                ItemAdvance::to(ItemJobStatus::Cancelled).with_message("output not applied"),
            )
            .await?
            .is_some()
        {
            deps.events.publish(MassageEvent::ItemCancelled {
                item_key: item_key.to_string(),
            });
        }
        return Ok(());
    }

    let output = completion.output.trim();
    let outcome = deps
        .lead_store
        .set_column_if_empty(
            metadata.lead_item_id,
            &metadata.new_column_name,
            output,
            &completion.request_id,
        )
        .await?;

    let (advance, delta, event) = match outcome {
        ColumnWriteOutcome::Applied | ColumnWriteOutcome::AlreadyApplied => (
            ItemAdvance::to(ItemJobStatus::Done).with_output(output),
            ProgressDelta::newly_done(),
            MassageEvent::OutputApplied {
                item_key: item_key.to_string(),
                request_id: completion.request_id.clone(),
            },
        ),
        ColumnWriteOutcome::Filled => (
            ItemAdvance::to(ItemJobStatus::Skipped).with_message("filled before output applied"),
            ProgressDelta::already_filled(),
            MassageEvent::ItemSkipped {
                item_key: item_key.to_string(),
                reason: "filled before output applied".to_string(),
            },
        ),
        ColumnWriteOutcome::Missing => (
            ItemAdvance::to(ItemJobStatus::Error).with_message("lead not found"),
            ProgressDelta::errored(),
            MassageEvent::ItemFailed {
                item_key: item_key.to_string(),
                reason: "lead not found".to_string(),
            },
        ),
    };

    if deps
        .batch_store
        .advance_item(
            item_key,
            &[ItemJobStatus::Queued, ItemJobStatus::Processing],
            advance,
        )
        .await?
        .is_some()
    {
        deps.batch_store
            .apply_progress(item.job_id, delta)
            .await?;
        deps.events.publish(event);
        info!(
            item_key,
            request_id = %completion.request_id,
            outcome = ?outcome,
            "completion reconciled"
        );
    } else {
        debug!(item_key, "lost item transition race; completion already settled");
    }

    // Completion detection rides the same causal chain as reconciliation.
    finalize_batch(item.job_id, deps).await;
    Ok(())
}
