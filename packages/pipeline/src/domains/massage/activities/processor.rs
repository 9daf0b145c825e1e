//! Item job processor: one lead's unit of work.

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::domains::massage::error::MassageError;
use crate::domains::massage::events::MassageEvent;
use crate::domains::massage::models::{
    GenerationMetadata, ItemAdvance, ItemJobStatus, ProgressDelta,
};
use crate::domains::massage::prompt::build_massage_prompt;
use crate::kernel::deps::PipelineDeps;

use super::finalizer::finalize_batch;

/// Process one queued item: check whether work is still needed, build the
/// transformation prompt and submit it to the generation service.
///
/// Re-delivery is a no-op once the item has advanced past `queued`; every
/// transition below is guarded by a compare-and-set on that status, so the
/// counter updates ride exactly one winning transition.
pub async fn process_item(item_key: &str, deps: &PipelineDeps) -> Result<()> {
    // Items are created before their command is enqueued, so a miss here is
    // store lag or loss; let redelivery retry it.
    let Some(item) = deps.batch_store.get_item(item_key).await? else {
        return Err(MassageError::ItemNotFound(item_key.to_string()).into());
    };
    if item.status != ItemJobStatus::Queued {
        debug!(item_key, status = item.status.as_str(), "item already advanced; no-op");
        return Ok(());
    }

    let Some(job) = deps.batch_store.get_job(item.job_id).await? else {
        warn!(item_key, job_id = %item.job_id, "parent batch job missing; cancelling item");
        deps.batch_store
            .advance_item(
                item_key,
                &[ItemJobStatus::Queued],
                ItemAdvance::to(ItemJobStatus::Cancelled).with_message("parent batch job not found"),
            )
            .await?;
        return Ok(());
    };

    // The batch is already abandoned; no side effects, no counter updates.
    if job.status.is_abandoned() {
        if deps
            .batch_store
            .advance_item(
                item_key,
                &[ItemJobStatus::Queued],
                ItemAdvance::to(ItemJobStatus::Cancelled).with_message("batch abandoned"),
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

    let Some(lead) = deps.lead_store.get_lead(item.lead_item_id).await? else {
        if deps
            .batch_store
            .advance_item(
                item_key,
                &[ItemJobStatus::Queued],
                ItemAdvance::to(ItemJobStatus::Error).with_message("lead not found"),
            )
            .await?
            .is_some()
        {
            deps.batch_store
                .apply_progress(item.job_id, ProgressDelta::errored())
                .await?;
            deps.events.publish(MassageEvent::ItemFailed {
                item_key: item_key.to_string(),
                reason: "lead not found".to_string(),
            });
            finalize_batch(item.job_id, deps).await;
        }
        return Ok(());
    };

    // Already filled: no generation round-trip happens for this lead, so
    // this path must update progress itself.
    if !lead.value_trimmed(&item.new_column_name).is_empty() {
        if deps
            .batch_store
            .advance_item(
                item_key,
                &[ItemJobStatus::Queued],
                ItemAdvance::to(ItemJobStatus::Skipped).with_message("already filled"),
            )
            .await?
            .is_some()
        {
            deps.batch_store
                .apply_progress(item.job_id, ProgressDelta::already_filled())
                .await?;
            deps.events.publish(MassageEvent::ItemSkipped {
                item_key: item_key.to_string(),
                reason: "already filled".to_string(),
            });
            finalize_batch(item.job_id, deps).await;
        }
        return Ok(());
    }

    let prompt = build_massage_prompt(&lead, &item.source_columns, &item.prompt);
    let metadata = GenerationMetadata::for_item(&item);
    let request_id = deps
        .generation
        .submit(&prompt, metadata)
        .await
        .context("failed to submit generation request")?;

    match deps
        .batch_store
        .advance_item(
            item_key,
            &[ItemJobStatus::Queued],
            ItemAdvance::to(ItemJobStatus::Processing).with_request_id(&request_id),
        )
        .await?
    {
        Some(_) => {
            deps.events.publish(MassageEvent::GenerationSubmitted {
                item_key: item_key.to_string(),
                request_id: request_id.clone(),
            });
            info!(item_key, request_id = %request_id, "generation request submitted");
        }
        None => {
            // A concurrent duplicate won; its completion will settle the
            // item and ours will be ignored as terminal.
            debug!(item_key, "item advanced concurrently after submission");
        }
    }
    Ok(())
}
