//! Batch job controller: submission and fan-out.

use anyhow::{Context, Result};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domains::massage::commands::MassageCommand;
use crate::domains::massage::error::MassageError;
use crate::domains::massage::events::MassageEvent;
use crate::domains::massage::models::{BatchJob, BatchJobStatus, ItemJob, NewBatchJob};
use crate::kernel::deps::PipelineDeps;

use super::finalizer::finalize_batch;

/// Leads fetched per page during fan-out.
const FAN_OUT_PAGE_SIZE: usize = 500;

/// Create a pending batch job from a submission and queue it for fan-out.
///
/// Missing fields are stored as empty values and rejected by validation when
/// the controller picks the job up, so a bad submission surfaces as a
/// `failed` job with a message rather than an opaque enqueue error.
pub async fn submit_batch(draft: NewBatchJob, deps: &PipelineDeps) -> Result<BatchJob> {
    let job = BatchJob::builder()
        .list_id(draft.list_id.unwrap_or_else(Uuid::nil))
        .source_columns(draft.normalized_source_columns())
        .new_column_name(draft.new_column_name.clone().unwrap_or_default())
        .prompt(draft.prompt.clone().unwrap_or_default())
        .build();
    let job = deps.batch_store.insert_job(job).await?;
    deps.queue
        .enqueue(MassageCommand::StartBatch { job_id: job.job_id })
        .await?;
    deps.events
        .publish(MassageEvent::BatchSubmitted { job_id: job.job_id });
    info!(job_id = %job.job_id, list_id = %job.list_id, "batch job submitted");
    Ok(job)
}

/// Validate the required batch job fields.
fn validate(job: &BatchJob) -> Result<(), MassageError> {
    if job.list_id.is_nil() {
        return Err(MassageError::Validation("listId is required".to_string()));
    }
    if job.source_columns.iter().all(|c| c.trim().is_empty()) {
        return Err(MassageError::Validation(
            "at least one source column is required".to_string(),
        ));
    }
    if job.new_column_name.trim().is_empty() {
        return Err(MassageError::Validation(
            "newColumnName is required".to_string(),
        ));
    }
    if job.prompt.trim().is_empty() {
        return Err(MassageError::Validation("prompt is required".to_string()));
    }
    Ok(())
}

/// Fan out one item job per lead of the batch's list.
///
/// Safe to re-deliver: item creation is an idempotent upsert and the totals
/// update is a single idempotent statement. A page-fetch error aborts after
/// the already-created pages are durable and bubbles up for redelivery.
pub async fn start_batch(job_id: Uuid, deps: &PipelineDeps) -> Result<()> {
    let Some(job) = deps.batch_store.get_job(job_id).await? else {
        return Err(MassageError::JobNotFound(job_id).into());
    };
    if job.status.is_terminal() {
        info!(job_id = %job_id, status = job.status.as_str(), "ignoring fan-out for terminal batch");
        return Ok(());
    }

    if let Err(invalid) = validate(&job) {
        // Fatal, not retried.
        let reason = invalid.to_string();
        deps.batch_store
            .transition_job(
                job_id,
                &[BatchJobStatus::Pending, BatchJobStatus::Running],
                BatchJobStatus::Failed,
                Some(&reason),
            )
            .await?;
        deps.events
            .publish(MassageEvent::BatchValidationFailed { job_id, reason: reason.clone() });
        warn!(job_id = %job_id, reason = %reason, "batch job failed validation");
        return Ok(());
    }

    // Running before any fan-out so progress is observable immediately.
    // Returns None when a re-delivered start already moved it; that's fine.
    deps.batch_store
        .transition_job(
            job_id,
            &[BatchJobStatus::Pending],
            BatchJobStatus::Running,
            None,
        )
        .await?;

    let mut page_token = None;
    let mut total: i64 = 0;
    loop {
        let page = deps
            .lead_store
            .list_leads(job.list_id, page_token, FAN_OUT_PAGE_SIZE)
            .await
            .context("failed to fetch lead page during fan-out")?;
        for record in &page.records {
            let item = ItemJob::for_lead(&job, record.lead_item_id);
            let item_key = item.item_key.clone();
            deps.batch_store.upsert_item(item).await?;
            deps.queue
                .enqueue(MassageCommand::ProcessItem {
                    item_key: item_key.clone(),
                })
                .await?;
            deps.events.publish(MassageEvent::ItemQueued { item_key });
            total += 1;
        }
        page_token = page.next_page_token;
        if page_token.is_none() {
            break;
        }
    }

    deps.batch_store.set_totals(job_id, total).await?;
    deps.events.publish(MassageEvent::BatchStarted {
        job_id,
        total_leads: total,
    });
    info!(job_id = %job_id, total_leads = total, "batch fan-out complete");

    // An empty list (or items that all finished mid-fan-out) completes here,
    // since no reconciliation will ever run for it.
    finalize_batch(job_id, deps).await;
    Ok(())
}
