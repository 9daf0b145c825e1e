//! Durable command queue for the pipeline stages.
//!
//! The source system triggered each stage implicitly off document writes;
//! here the edges are explicit commands on a queue with claim/ack/nack and
//! at-least-once delivery. Handlers are idempotent, so redelivery is safe.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use uuid::Uuid;

use crate::domains::massage::commands::MassageCommand;

/// A claimed command ready for dispatch.
#[derive(Debug, Clone)]
pub struct ClaimedCommand {
    pub id: Uuid,
    /// Delivery attempt, starting at 1 for the first claim.
    pub attempt: u32,
    pub command: MassageCommand,
}

#[async_trait]
pub trait CommandQueue: Send + Sync {
    /// Enqueue a command for delivery.
    async fn enqueue(&self, command: MassageCommand) -> Result<()>;

    /// Claim up to `limit` commands. Claimed commands stay in flight until
    /// acked or nacked.
    async fn claim(&self, limit: usize) -> Result<Vec<ClaimedCommand>>;

    /// Acknowledge successful handling; the command is gone.
    async fn ack(&self, id: Uuid) -> Result<()>;

    /// Return a command to the queue for redelivery.
    async fn nack(&self, id: Uuid) -> Result<()>;

    /// Commands currently queued or in flight.
    async fn depth(&self) -> Result<usize>;
}

#[derive(Debug, Clone)]
struct PendingCommand {
    id: Uuid,
    attempt: u32,
    command: MassageCommand,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<PendingCommand>,
    in_flight: HashMap<Uuid, PendingCommand>,
}

/// In-memory FIFO command queue.
///
/// Backs the in-process runtime and the test suite. Un-acked commands are
/// redelivered on nack with an incremented attempt counter.
#[derive(Default)]
pub struct MemoryCommandQueue {
    state: Mutex<QueueState>,
}

impl MemoryCommandQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CommandQueue for MemoryCommandQueue {
    async fn enqueue(&self, command: MassageCommand) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.ready.push_back(PendingCommand {
            id: Uuid::new_v4(),
            attempt: 0,
            command,
        });
        Ok(())
    }

    async fn claim(&self, limit: usize) -> Result<Vec<ClaimedCommand>> {
        let mut state = self.state.lock().unwrap();
        let mut claimed = Vec::new();
        while claimed.len() < limit {
            let Some(mut pending) = state.ready.pop_front() else {
                break;
            };
            pending.attempt += 1;
            claimed.push(ClaimedCommand {
                id: pending.id,
                attempt: pending.attempt,
                command: pending.command.clone(),
            });
            state.in_flight.insert(pending.id, pending);
        }
        Ok(claimed)
    }

    async fn ack(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .in_flight
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| anyhow!("ack for unknown command {id}"))
    }

    async fn nack(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let pending = state
            .in_flight
            .remove(&id)
            .ok_or_else(|| anyhow!("nack for unknown command {id}"))?;
        state.ready.push_back(pending);
        Ok(())
    }

    async fn depth(&self) -> Result<usize> {
        let state = self.state.lock().unwrap();
        Ok(state.ready.len() + state.in_flight.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start_batch() -> MassageCommand {
        MassageCommand::StartBatch {
            job_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn claim_is_fifo() {
        let queue = MemoryCommandQueue::new();
        let first = start_batch();
        let second = start_batch();
        queue.enqueue(first.clone()).await.unwrap();
        queue.enqueue(second.clone()).await.unwrap();

        let claimed = queue.claim(10).await.unwrap();
        assert_eq!(claimed.len(), 2);
        assert_eq!(claimed[0].command, first);
        assert_eq!(claimed[1].command, second);
    }

    #[tokio::test]
    async fn acked_commands_are_gone() {
        let queue = MemoryCommandQueue::new();
        queue.enqueue(start_batch()).await.unwrap();
        let claimed = queue.claim(1).await.unwrap();
        queue.ack(claimed[0].id).await.unwrap();
        assert_eq!(queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn nacked_commands_are_redelivered_with_higher_attempt() {
        let queue = MemoryCommandQueue::new();
        queue.enqueue(start_batch()).await.unwrap();

        let claimed = queue.claim(1).await.unwrap();
        assert_eq!(claimed[0].attempt, 1);
        queue.nack(claimed[0].id).await.unwrap();

        let redelivered = queue.claim(1).await.unwrap();
        assert_eq!(redelivered[0].id, claimed[0].id);
        assert_eq!(redelivered[0].attempt, 2);
    }

    #[tokio::test]
    async fn claimed_commands_are_not_claimable_again() {
        let queue = MemoryCommandQueue::new();
        queue.enqueue(start_batch()).await.unwrap();
        let _claimed = queue.claim(1).await.unwrap();
        assert!(queue.claim(1).await.unwrap().is_empty());
        assert_eq!(queue.depth().await.unwrap(), 1);
    }
}
