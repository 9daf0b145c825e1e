//! Commands carried by the pipeline's durable queue.
//!
//! Each stage of the pipeline reacts to one command variant; delivery is
//! at-least-once, so every handler is idempotent.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::models::GenerationCompletion;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MassageCommand {
    /// Fan out one item job per lead of the batch's list.
    StartBatch { job_id: Uuid },

    /// Process one queued item: check, build prompt, submit generation.
    ProcessItem { item_key: String },

    /// Reconcile a generation completion back into the lead store.
    ApplyCompletion { completion: GenerationCompletion },
}

impl MassageCommand {
    pub fn command_type(&self) -> &'static str {
        match self {
            MassageCommand::StartBatch { .. } => "massage:start_batch",
            MassageCommand::ProcessItem { .. } => "massage:process_item",
            MassageCommand::ApplyCompletion { .. } => "massage:apply_completion",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_round_trip_through_json() {
        let command = MassageCommand::StartBatch {
            job_id: Uuid::new_v4(),
        };
        let json = serde_json::to_value(&command).expect("serialize");
        let back: MassageCommand = serde_json::from_value(json).expect("deserialize");
        assert_eq!(command, back);
    }

    #[test]
    fn command_types_are_namespaced() {
        let command = MassageCommand::ProcessItem {
            item_key: "a:b".to_string(),
        };
        assert_eq!(command.command_type(), "massage:process_item");
    }
}
