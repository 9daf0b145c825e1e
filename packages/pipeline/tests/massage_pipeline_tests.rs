//! End-to-end pipeline scenarios over the in-memory stores.
//!
//! Each test drives the full loop: submit a batch, let the worker fan out
//! and process items, deliver generation completions, and let the worker
//! reconcile them. The mock generation service holds completions until the
//! test releases them, so external writes can be interleaved in between.

use pipeline_core::domains::massage::activities;
use pipeline_core::domains::massage::commands::MassageCommand;
use pipeline_core::domains::massage::events::MassageEvent;
use pipeline_core::domains::massage::models::{
    BatchJob, BatchJobStatus, ItemJob, ItemJobStatus, NewBatchJob,
};
use pipeline_core::kernel::{BaseBatchStore, CommandQueue, MockGeneration, TestDependencies};
use uuid::Uuid;

fn draft(list_id: Uuid) -> NewBatchJob {
    NewBatchJob {
        list_id: Some(list_id),
        source_columns: vec!["name".to_string(), "notes".to_string()],
        source_column: None,
        new_column_name: Some("summary".to_string()),
        prompt: Some("Summarize this lead in one sentence.".to_string()),
    }
}

/// Seed a list with one lead per data slice; returns the list and lead ids.
fn seed_list(test: &TestDependencies, leads: &[&[(&str, &str)]]) -> (Uuid, Vec<Uuid>) {
    pipeline_core::common::observability::init();
    let list_id = Uuid::new_v4();
    test.lead_store.add_list(list_id, &["name", "notes"]);
    let ids = leads
        .iter()
        .map(|data| test.lead_store.add_lead(list_id, data))
        .collect();
    (list_id, ids)
}

async fn submit(test: &TestDependencies, draft: NewBatchJob) -> BatchJob {
    activities::submit_batch(draft, &test.deps)
        .await
        .expect("submit batch")
}

/// Drain all queued commands, deliver every pending completion, then drain
/// the reconciliations those produced.
async fn run_to_quiescence(test: &TestDependencies) {
    let worker = test.worker();
    worker.run_until_idle().await.expect("fan-out and processing");
    test.deliver_completions().await.expect("deliver completions");
    worker.run_until_idle().await.expect("reconciliation");
}

fn job(test: &TestDependencies, job_id: Uuid) -> BatchJob {
    test.batch_store.job(job_id).expect("job exists")
}

fn item(test: &TestDependencies, job_id: Uuid, lead_id: Uuid) -> ItemJob {
    test.batch_store
        .item(&ItemJob::key_for(job_id, lead_id))
        .expect("item exists")
}

#[tokio::test]
async fn batch_with_prefilled_lead_completes_with_mixed_counts() {
    let test = TestDependencies::new();
    let (list_id, leads) = seed_list(
        &test,
        &[
            &[("name", "Acme"), ("notes", "met at expo"), ("summary", "already summarized")],
            &[("name", "Globex"), ("notes", "cold outreach")],
            &[("name", "Initech"), ("notes", "referral")],
        ],
    );

    let submitted = submit(&test, draft(list_id)).await;
    run_to_quiescence(&test).await;

    let job = job(&test, submitted.job_id);
    assert_eq!(job.status, BatchJobStatus::Completed);
    assert_eq!(job.total_leads, 3);
    assert_eq!(job.processed_count, 3);
    assert_eq!(job.newly_processed_count, 2);
    assert_eq!(job.already_processed_count, 1);
    assert_eq!(job.error_count, 0);
    assert_eq!(job.remaining_leads, 0);

    // The prefilled lead was skipped without touching the generation service.
    assert_eq!(item(&test, job.job_id, leads[0]).status, ItemJobStatus::Skipped);
    assert!(!test.generation.was_submitted_for(leads[0]));
    assert_eq!(test.lead_store.lead(leads[0]).unwrap().value_trimmed("summary"), "already summarized");

    // The empty leads got massaged.
    for &lead_id in &leads[1..] {
        assert_eq!(item(&test, job.job_id, lead_id).status, ItemJobStatus::Done);
        assert_eq!(
            test.lead_store.lead(lead_id).unwrap().value_trimmed("summary"),
            "massaged output"
        );
    }

    // The list schema gained the new column.
    let list = test.lead_store.list(list_id).unwrap();
    assert!(list.columns.iter().any(|c| c == "summary"));

    assert!(test.events.contains(&MassageEvent::BatchStarted {
        job_id: job.job_id,
        total_leads: 3,
    }));
}

#[tokio::test]
async fn invalid_submission_fails_without_creating_items() {
    let test = TestDependencies::new();
    let (list_id, _) = seed_list(&test, &[&[("name", "Acme")]]);

    let mut bad = draft(list_id);
    bad.new_column_name = None;
    let submitted = submit(&test, bad).await;
    run_to_quiescence(&test).await;

    let job = job(&test, submitted.job_id);
    assert_eq!(job.status, BatchJobStatus::Failed);
    assert!(job.message.as_deref().unwrap_or("").contains("newColumnName"));
    assert_eq!(test.batch_store.count_items(job.job_id).await.unwrap(), 0);
    assert!(test.generation.submissions().is_empty());
}

#[tokio::test]
async fn batch_stays_running_while_a_completion_is_outstanding() {
    let test = TestDependencies::new();
    let (list_id, leads) = seed_list(
        &test,
        &[&[("name", "Acme")], &[("name", "Globex")]],
    );
    test.generation.hold(leads[1]);

    let submitted = submit(&test, draft(list_id)).await;
    run_to_quiescence(&test).await;

    let job = job(&test, submitted.job_id);
    assert_eq!(job.status, BatchJobStatus::Running);
    assert_eq!(job.processed_count, 1);
    assert_eq!(job.remaining_leads, 1);
    assert_eq!(item(&test, job.job_id, leads[0]).status, ItemJobStatus::Done);
    assert_eq!(item(&test, job.job_id, leads[1]).status, ItemJobStatus::Processing);
}

#[tokio::test]
async fn duplicate_fan_out_creates_one_item_per_lead() {
    let test = TestDependencies::new();
    let (list_id, _) = seed_list(
        &test,
        &[&[("name", "Acme")], &[("name", "Globex")]],
    );

    let submitted = submit(&test, draft(list_id)).await;
    // A re-delivered start command sits in the queue alongside the original.
    test.queue
        .enqueue(MassageCommand::StartBatch {
            job_id: submitted.job_id,
        })
        .await
        .unwrap();
    run_to_quiescence(&test).await;

    let job = job(&test, submitted.job_id);
    assert_eq!(job.status, BatchJobStatus::Completed);
    assert_eq!(job.total_leads, 2);
    assert_eq!(job.processed_count, 2);
    assert_eq!(test.batch_store.count_items(job.job_id).await.unwrap(), 2);
    // Each lead was massaged exactly once despite the duplicate fan-out.
    assert_eq!(test.generation.submissions().len(), 2);
}

#[tokio::test]
async fn redelivered_completion_counts_once() {
    let test = TestDependencies::new();
    let (list_id, leads) = seed_list(&test, &[&[("name", "Acme")]]);

    let submitted = submit(&test, draft(list_id)).await;
    run_to_quiescence(&test).await;

    let request_id = test.generation.delivered()[0].request_id.clone();
    assert!(test
        .generation
        .redeliver(test.queue.as_ref(), &request_id)
        .await
        .unwrap());
    test.worker().run_until_idle().await.unwrap();

    let job = job(&test, submitted.job_id);
    assert_eq!(job.status, BatchJobStatus::Completed);
    assert_eq!(job.processed_count, 1);
    assert_eq!(job.newly_processed_count, 1);
    assert_eq!(job.remaining_leads, 0);
    assert_eq!(
        test.lead_store.lead(leads[0]).unwrap().value_trimmed("summary"),
        "massaged output"
    );
}

#[tokio::test]
async fn external_write_between_submission_and_completion_wins() {
    let test = TestDependencies::new();
    let (list_id, leads) = seed_list(&test, &[&[("name", "Acme")]]);

    let submitted = submit(&test, draft(list_id)).await;
    let worker = test.worker();
    worker.run_until_idle().await.unwrap();
    assert_eq!(item(&test, submitted.job_id, leads[0]).status, ItemJobStatus::Processing);

    // A human fills the column while the generation call is in flight.
    test.lead_store.set_value(leads[0], "summary", "manual note");
    test.deliver_completions().await.unwrap();
    worker.run_until_idle().await.unwrap();

    let job = job(&test, submitted.job_id);
    assert_eq!(job.status, BatchJobStatus::Completed);
    assert_eq!(job.already_processed_count, 1);
    assert_eq!(job.newly_processed_count, 0);

    let item = item(&test, submitted.job_id, leads[0]);
    assert_eq!(item.status, ItemJobStatus::Skipped);
    assert_eq!(
        test.lead_store.lead(leads[0]).unwrap().value_trimmed("summary"),
        "manual note"
    );
}

#[tokio::test]
async fn cancelled_batch_discards_late_completions() {
    let test = TestDependencies::new();
    let (list_id, leads) = seed_list(&test, &[&[("name", "Acme")]]);

    let submitted = submit(&test, draft(list_id)).await;
    let worker = test.worker();
    worker.run_until_idle().await.unwrap();

    test.batch_store
        .transition_job(
            submitted.job_id,
            &[BatchJobStatus::Running],
            BatchJobStatus::Cancelled,
            Some("cancelled by user"),
        )
        .await
        .unwrap()
        .expect("cancel wins");

    test.deliver_completions().await.unwrap();
    worker.run_until_idle().await.unwrap();

    let job = job(&test, submitted.job_id);
    assert_eq!(job.status, BatchJobStatus::Cancelled);
    assert_eq!(job.processed_count, 0);

    let item = item(&test, submitted.job_id, leads[0]);
    assert_eq!(item.status, ItemJobStatus::Cancelled);
    assert_eq!(item.message.as_deref(), Some("output not applied"));
    assert_eq!(
        test.lead_store.lead(leads[0]).unwrap().value_trimmed("summary"),
        ""
    );
}

#[tokio::test]
async fn empty_list_completes_immediately() {
    let test = TestDependencies::new();
    let (list_id, _) = seed_list(&test, &[]);

    let submitted = submit(&test, draft(list_id)).await;
    run_to_quiescence(&test).await;

    let job = job(&test, submitted.job_id);
    assert_eq!(job.status, BatchJobStatus::Completed);
    assert_eq!(job.total_leads, 0);
    assert_eq!(job.remaining_leads, 0);
    let list = test.lead_store.list(list_id).unwrap();
    assert!(list.columns.iter().any(|c| c == "summary"));
}

#[tokio::test]
async fn fully_prefilled_list_completes_without_generation() {
    let test = TestDependencies::new();
    let (list_id, _) = seed_list(
        &test,
        &[
            &[("name", "Acme"), ("summary", "a")],
            &[("name", "Globex"), ("summary", "b")],
        ],
    );

    let submitted = submit(&test, draft(list_id)).await;
    run_to_quiescence(&test).await;

    let job = job(&test, submitted.job_id);
    assert_eq!(job.status, BatchJobStatus::Completed);
    assert_eq!(job.already_processed_count, 2);
    assert_eq!(job.remaining_leads, 0);
    assert!(test.generation.submissions().is_empty());
}

#[tokio::test]
async fn vanished_lead_is_counted_as_error() {
    let test = TestDependencies::new();
    let (list_id, leads) = seed_list(&test, &[&[("name", "Acme")]]);

    let job_record = BatchJob::builder()
        .list_id(list_id)
        .source_columns(vec!["name".to_string()])
        .new_column_name("summary")
        .prompt("Summarize this lead")
        .build();
    let job_id = job_record.job_id;
    test.batch_store.insert_job(job_record).await.unwrap();

    // Fan out while the lead exists, then lose it before processing.
    activities::start_batch(job_id, &test.deps).await.unwrap();
    test.lead_store.remove_lead(leads[0]);
    run_to_quiescence(&test).await;

    let job = job(&test, job_id);
    assert_eq!(job.status, BatchJobStatus::Completed);
    assert_eq!(job.error_count, 1);
    assert_eq!(job.newly_processed_count, 0);
    assert_eq!(job.remaining_leads, 0);

    let item = item(&test, job_id, leads[0]);
    assert_eq!(item.status, ItemJobStatus::Error);
    assert_eq!(item.message.as_deref(), Some("lead not found"));
}

#[tokio::test]
async fn single_source_column_field_is_normalized() {
    let test = TestDependencies::new();
    let (list_id, leads) = seed_list(&test, &[&[("name", "Acme"), ("notes", "met at expo")]]);

    let submitted = submit(
        &test,
        NewBatchJob {
            list_id: Some(list_id),
            source_columns: vec![],
            source_column: Some("notes".to_string()),
            new_column_name: Some("summary".to_string()),
            prompt: Some("Summarize".to_string()),
        },
    )
    .await;
    run_to_quiescence(&test).await;

    assert_eq!(job(&test, submitted.job_id).status, BatchJobStatus::Completed);
    let prompts = test.generation.submissions();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].prompt.contains("notes: \"met at expo\""));
    assert!(!prompts[0].prompt.contains("name: \"Acme\""));
    assert_eq!(
        test.lead_store.lead(leads[0]).unwrap().value_trimmed("summary"),
        "massaged output"
    );
}

#[tokio::test]
async fn generation_output_is_trimmed_before_writing() {
    let generation = MockGeneration::new().with_default_output("  padded output \n");
    let test = TestDependencies::with_generation(generation);
    let (list_id, leads) = seed_list(&test, &[&[("name", "Acme")]]);

    let submitted = submit(&test, draft(list_id)).await;
    run_to_quiescence(&test).await;

    assert_eq!(job(&test, submitted.job_id).status, BatchJobStatus::Completed);
    assert_eq!(
        test.lead_store.lead(leads[0]).unwrap().value_trimmed("summary"),
        "padded output"
    );
    // The full raw data value is stored trimmed as well.
    let raw = test.lead_store.lead(leads[0]).unwrap();
    assert_eq!(raw.data.get("summary").map(String::as_str), Some("padded output"));
}
