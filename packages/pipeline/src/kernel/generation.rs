// Generation service implementations.
//
// The pipeline only depends on the `BaseGeneration` contract: submit returns
// a request id immediately and the output comes back later as an
// `ApplyCompletion` command. `RigGeneration` fulfils it with an OpenAI agent
// via rig; `MockGeneration` fulfils it deterministically for tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use rig::completion::Prompt;
use rig::providers::openai;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domains::massage::commands::MassageCommand;
use crate::domains::massage::models::{GenerationCompletion, GenerationMetadata};
use crate::kernel::queue::CommandQueue;
use crate::kernel::traits::BaseGeneration;

fn new_request_id() -> String {
    format!("genreq-{}", Uuid::new_v4())
}

// =============================================================================
// OpenAI-backed generation (via rig)
// =============================================================================

/// OpenAI implementation of the generation contract.
///
/// `submit` returns immediately; the completion call runs on a spawned task
/// and delivers its output by enqueueing an `ApplyCompletion` command. A
/// failed call leaves the request without output (still pending), per the
/// external contract.
pub struct RigGeneration {
    client: openai::Client,
    model: String,
    queue: Arc<dyn CommandQueue>,
}

impl RigGeneration {
    pub fn new(api_key: &str, queue: Arc<dyn CommandQueue>) -> Self {
        Self {
            client: openai::Client::new(api_key),
            model: openai::GPT_4_TURBO.to_string(),
            queue,
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }
}

#[async_trait]
impl BaseGeneration for RigGeneration {
    async fn submit(&self, prompt: &str, metadata: GenerationMetadata) -> Result<String> {
        let request_id = new_request_id();
        let agent = self
            .client
            .agent(&self.model)
            .preamble("You transform CRM lead fields.")
            .max_tokens(1024)
            .build();

        let queue = Arc::clone(&self.queue);
        let prompt = prompt.to_string();
        let task_request_id = request_id.clone();
        tokio::spawn(async move {
            match agent.prompt(prompt.as_str()).await {
                Ok(output) => {
                    info!(
                        request_id = %task_request_id,
                        output_length = output.len(),
                        "generation output received"
                    );
                    let completion = GenerationCompletion {
                        request_id: task_request_id.clone(),
                        metadata,
                        output,
                    };
                    if let Err(e) = queue
                        .enqueue(MassageCommand::ApplyCompletion { completion })
                        .await
                    {
                        error!(request_id = %task_request_id, error = %e, "failed to enqueue completion");
                    }
                }
                Err(e) => {
                    warn!(
                        request_id = %task_request_id,
                        error = %e,
                        "generation call failed; request stays pending"
                    );
                }
            }
        });

        Ok(request_id)
    }
}

// =============================================================================
// Mock generation (tests)
// =============================================================================

/// A recorded submission.
#[derive(Debug, Clone)]
pub struct SubmittedPrompt {
    pub request_id: String,
    pub prompt: String,
    pub metadata: GenerationMetadata,
}

#[derive(Default)]
struct MockState {
    outputs: HashMap<Uuid, String>,
    default_output: String,
    held: HashSet<Uuid>,
    pending: Vec<SubmittedPrompt>,
    submissions: Vec<SubmittedPrompt>,
    delivered: Vec<GenerationCompletion>,
}

/// Deterministic generation service for tests.
///
/// Records every submission; completions are held until the test calls
/// [`MockGeneration::deliver_pending`], which lets tests interleave external
/// writes between submission and completion. Leads registered with
/// [`MockGeneration::hold`] never complete (a provider that goes silent).
pub struct MockGeneration {
    state: Mutex<MockState>,
}

impl Default for MockGeneration {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGeneration {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                default_output: "massaged output".to_string(),
                ..Default::default()
            }),
        }
    }

    /// Set the output returned for one lead.
    pub fn with_output(self, lead_item_id: Uuid, output: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .outputs
            .insert(lead_item_id, output.to_string());
        self
    }

    pub fn with_default_output(self, output: &str) -> Self {
        self.state.lock().unwrap().default_output = output.to_string();
        self
    }

    /// Never deliver a completion for this lead.
    pub fn hold(&self, lead_item_id: Uuid) {
        self.state.lock().unwrap().held.insert(lead_item_id);
    }

    pub fn submissions(&self) -> Vec<SubmittedPrompt> {
        self.state.lock().unwrap().submissions.clone()
    }

    pub fn was_submitted_for(&self, lead_item_id: Uuid) -> bool {
        self.state
            .lock()
            .unwrap()
            .submissions
            .iter()
            .any(|s| s.metadata.lead_item_id == lead_item_id)
    }

    /// Completions delivered so far (for re-delivery tests).
    pub fn delivered(&self) -> Vec<GenerationCompletion> {
        self.state.lock().unwrap().delivered.clone()
    }

    /// Deliver completions for all pending, non-held submissions by
    /// enqueueing `ApplyCompletion` commands. Returns how many fired.
    pub async fn deliver_pending(&self, queue: &dyn CommandQueue) -> Result<usize> {
        let ready: Vec<GenerationCompletion> = {
            let mut state = self.state.lock().unwrap();
            let held = state.held.clone();
            let (ready, kept): (Vec<_>, Vec<_>) = state
                .pending
                .drain(..)
                .partition(|s| !held.contains(&s.metadata.lead_item_id));
            state.pending = kept;
            let completions: Vec<GenerationCompletion> = ready
                .into_iter()
                .map(|submission| GenerationCompletion {
                    request_id: submission.request_id,
                    output: state
                        .outputs
                        .get(&submission.metadata.lead_item_id)
                        .cloned()
                        .unwrap_or_else(|| state.default_output.clone()),
                    metadata: submission.metadata,
                })
                .collect();
            state.delivered.extend(completions.iter().cloned());
            completions
        };
        let count = ready.len();
        for completion in ready {
            queue
                .enqueue(MassageCommand::ApplyCompletion { completion })
                .await?;
        }
        Ok(count)
    }

    /// Re-deliver an already-delivered completion (duplicate event).
    pub async fn redeliver(&self, queue: &dyn CommandQueue, request_id: &str) -> Result<bool> {
        let completion = {
            let state = self.state.lock().unwrap();
            state
                .delivered
                .iter()
                .find(|c| c.request_id == request_id)
                .cloned()
        };
        match completion {
            Some(completion) => {
                queue
                    .enqueue(MassageCommand::ApplyCompletion { completion })
                    .await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl BaseGeneration for MockGeneration {
    async fn submit(&self, prompt: &str, metadata: GenerationMetadata) -> Result<String> {
        let request_id = new_request_id();
        let submission = SubmittedPrompt {
            request_id: request_id.clone(),
            prompt: prompt.to_string(),
            metadata,
        };
        let mut state = self.state.lock().unwrap();
        state.pending.push(submission.clone());
        state.submissions.push(submission);
        Ok(request_id)
    }
}
