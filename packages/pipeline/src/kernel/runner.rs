//! Pipeline worker: the poll loop that drives the stages.
//!
//! ```text
//! PipelineWorker
//!     │
//!     ├─► Claim commands from the CommandQueue
//!     ├─► Dispatch to the matching activity
//!     │       StartBatch      → activities::start_batch
//!     │       ProcessItem     → activities::process_item
//!     │       ApplyCompletion → activities::apply_completion
//!     └─► Ack on success, nack for redelivery on transient error
//! ```
//!
//! Delivery is at-least-once and every activity is idempotent, so a nacked
//! command can simply run again. Commands that keep failing are dropped
//! after `max_attempts` with an error log instead of looping forever.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domains::massage::activities;
use crate::domains::massage::commands::MassageCommand;
use crate::kernel::deps::PipelineDeps;
use crate::kernel::queue::ClaimedCommand;

/// Configuration for the pipeline worker.
#[derive(Debug, Clone)]
pub struct PipelineWorkerConfig {
    /// Maximum number of commands to claim at once
    pub batch_size: usize,
    /// How long to wait between polls when the queue is empty
    pub poll_interval: Duration,
    /// Deliveries after which a failing command is dropped
    pub max_attempts: u32,
    /// Worker ID for this instance
    pub worker_id: String,
}

impl Default for PipelineWorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            poll_interval: Duration::from_millis(100),
            max_attempts: 5,
            worker_id: format!("pipeline-worker-{}", Uuid::new_v4()),
        }
    }
}

/// A worker that processes massage commands from the queue.
pub struct PipelineWorker {
    deps: Arc<PipelineDeps>,
    config: PipelineWorkerConfig,
}

impl PipelineWorker {
    pub fn new(deps: Arc<PipelineDeps>) -> Self {
        Self::with_config(deps, PipelineWorkerConfig::default())
    }

    pub fn with_config(deps: Arc<PipelineDeps>, config: PipelineWorkerConfig) -> Self {
        Self { deps, config }
    }

    /// Run until the token is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(worker_id = %self.config.worker_id, "pipeline worker started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(error) = self.drain_once().await {
                        error!(worker_id = %self.config.worker_id, error = %error, "worker poll failed");
                    }
                }
            }
        }
        info!(worker_id = %self.config.worker_id, "pipeline worker stopped");
    }

    /// Drain the queue until no commands are left. Commands enqueued by
    /// handlers along the way are picked up too; used by tests and one-shot
    /// callers.
    pub async fn run_until_idle(&self) -> Result<()> {
        while self.drain_once().await? > 0 {}
        Ok(())
    }

    /// Claim and handle one batch of commands; returns how many were claimed.
    async fn drain_once(&self) -> Result<usize> {
        let claimed = self.deps.queue.claim(self.config.batch_size).await?;
        let count = claimed.len();
        for command in claimed {
            self.handle(command).await?;
        }
        Ok(count)
    }

    async fn handle(&self, claimed: ClaimedCommand) -> Result<()> {
        let command_type = claimed.command.command_type();
        debug!(
            command_id = %claimed.id,
            command_type,
            attempt = claimed.attempt,
            "dispatching command"
        );
        match self.dispatch(&claimed.command).await {
            Ok(()) => self.deps.queue.ack(claimed.id).await,
            Err(error) if claimed.attempt >= self.config.max_attempts => {
                error!(
                    command_id = %claimed.id,
                    command_type,
                    attempt = claimed.attempt,
                    error = %error,
                    "command exhausted its attempts; dropping"
                );
                self.deps.queue.ack(claimed.id).await
            }
            Err(error) => {
                warn!(
                    command_id = %claimed.id,
                    command_type,
                    attempt = claimed.attempt,
                    error = %error,
                    "command failed; requeueing"
                );
                self.deps.queue.nack(claimed.id).await
            }
        }
    }

    async fn dispatch(&self, command: &MassageCommand) -> Result<()> {
        match command {
            MassageCommand::StartBatch { job_id } => {
                activities::start_batch(*job_id, &self.deps).await
            }
            MassageCommand::ProcessItem { item_key } => {
                activities::process_item(item_key, &self.deps).await
            }
            MassageCommand::ApplyCompletion { completion } => {
                activities::apply_completion(completion, &self.deps).await
            }
        }
    }
}
