//! In-memory store implementations.
//!
//! Back the test suite and the in-process runtime. Every mutation takes the
//! store mutex once, which gives the same isolation the Postgres stores get
//! from single-statement updates and row locks.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::domains::massage::models::{
    BatchJob, BatchJobStatus, ColumnStatus, ColumnWriteOutcome, ItemAdvance, ItemJob,
    ItemJobStatus, LeadList, LeadPage, LeadRecord, ProgressDelta,
};
use crate::kernel::traits::{BaseBatchStore, BaseLeadStore};

// =============================================================================
// Memory Lead Store
// =============================================================================

#[derive(Default)]
struct LeadState {
    lists: HashMap<Uuid, LeadList>,
    leads: HashMap<Uuid, LeadRecord>,
    /// Insertion order per list; pagination walks this.
    order: HashMap<Uuid, Vec<Uuid>>,
}

#[derive(Default)]
pub struct MemoryLeadStore {
    state: Mutex<LeadState>,
}

impl MemoryLeadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a lead list with the given columns.
    pub fn add_list(&self, list_id: Uuid, columns: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.lists.insert(
            list_id,
            LeadList {
                list_id,
                columns: columns.iter().map(|c| c.to_string()).collect(),
            },
        );
        state.order.entry(list_id).or_default();
    }

    /// Seed one lead row; returns its id.
    pub fn add_lead(&self, list_id: Uuid, data: &[(&str, &str)]) -> Uuid {
        let lead_item_id = Uuid::new_v4();
        let record = LeadRecord {
            lead_item_id,
            list_id,
            data: data
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            column_status: BTreeMap::new(),
        };
        let mut state = self.state.lock().unwrap();
        state.leads.insert(lead_item_id, record);
        state.order.entry(list_id).or_default().push(lead_item_id);
        lead_item_id
    }

    /// Remove a lead row (simulates the external owner deleting it).
    pub fn remove_lead(&self, lead_item_id: Uuid) {
        let mut state = self.state.lock().unwrap();
        if let Some(record) = state.leads.remove(&lead_item_id) {
            if let Some(order) = state.order.get_mut(&record.list_id) {
                order.retain(|id| *id != lead_item_id);
            }
        }
    }

    /// Overwrite a column value unconditionally (simulates an external
    /// human/editor writer racing the pipeline).
    pub fn set_value(&self, lead_item_id: Uuid, column: &str, value: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(record) = state.leads.get_mut(&lead_item_id) {
            record.data.insert(column.to_string(), value.to_string());
        }
    }

    /// Synchronous read for test assertions.
    pub fn lead(&self, lead_item_id: Uuid) -> Option<LeadRecord> {
        self.state.lock().unwrap().leads.get(&lead_item_id).cloned()
    }

    /// Synchronous read for test assertions.
    pub fn list(&self, list_id: Uuid) -> Option<LeadList> {
        self.state.lock().unwrap().lists.get(&list_id).cloned()
    }
}

#[async_trait]
impl BaseLeadStore for MemoryLeadStore {
    async fn list_leads(
        &self,
        list_id: Uuid,
        page_token: Option<String>,
        page_size: usize,
    ) -> Result<LeadPage> {
        let state = self.state.lock().unwrap();
        let order = state.order.get(&list_id).cloned().unwrap_or_default();
        let offset: usize = match page_token {
            Some(token) => token.parse()?,
            None => 0,
        };
        let records: Vec<LeadRecord> = order
            .iter()
            .skip(offset)
            .take(page_size)
            .filter_map(|id| state.leads.get(id).cloned())
            .collect();
        let consumed = offset + page_size;
        let next_page_token = (consumed < order.len()).then(|| consumed.to_string());
        Ok(LeadPage {
            records,
            next_page_token,
        })
    }

    async fn get_lead(&self, lead_item_id: Uuid) -> Result<Option<LeadRecord>> {
        Ok(self.state.lock().unwrap().leads.get(&lead_item_id).cloned())
    }

    async fn set_column_if_empty(
        &self,
        lead_item_id: Uuid,
        column: &str,
        value: &str,
        request_id: &str,
    ) -> Result<ColumnWriteOutcome> {
        let mut state = self.state.lock().unwrap();
        let Some(record) = state.leads.get_mut(&lead_item_id) else {
            return Ok(ColumnWriteOutcome::Missing);
        };
        let outcome = record.column_write_outcome(column, request_id);
        if outcome == ColumnWriteOutcome::Applied {
            record
                .data
                .insert(column.to_string(), value.trim().to_string());
            record
                .column_status
                .insert(column.to_string(), ColumnStatus::done(request_id));
        }
        Ok(outcome)
    }

    async fn get_list(&self, list_id: Uuid) -> Result<Option<LeadList>> {
        Ok(self.state.lock().unwrap().lists.get(&list_id).cloned())
    }

    async fn add_list_column(&self, list_id: Uuid, column: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(list) = state.lists.get_mut(&list_id) {
            if !list.columns.iter().any(|c| c == column) {
                list.columns.push(column.to_string());
            }
        }
        Ok(())
    }
}

// =============================================================================
// Memory Batch Store
// =============================================================================

#[derive(Default)]
struct BatchState {
    jobs: HashMap<Uuid, BatchJob>,
    items: HashMap<String, ItemJob>,
}

#[derive(Default)]
pub struct MemoryBatchStore {
    state: Mutex<BatchState>,
}

impl MemoryBatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous read for test assertions.
    pub fn job(&self, job_id: Uuid) -> Option<BatchJob> {
        self.state.lock().unwrap().jobs.get(&job_id).cloned()
    }

    /// Synchronous read for test assertions.
    pub fn item(&self, item_key: &str) -> Option<ItemJob> {
        self.state.lock().unwrap().items.get(item_key).cloned()
    }
}

#[async_trait]
impl BaseBatchStore for MemoryBatchStore {
    async fn insert_job(&self, job: BatchJob) -> Result<BatchJob> {
        let mut state = self.state.lock().unwrap();
        state.jobs.insert(job.job_id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<BatchJob>> {
        Ok(self.state.lock().unwrap().jobs.get(&job_id).cloned())
    }

    async fn transition_job(
        &self,
        job_id: Uuid,
        expected: &[BatchJobStatus],
        to: BatchJobStatus,
        message: Option<&str>,
    ) -> Result<Option<BatchJob>> {
        let mut state = self.state.lock().unwrap();
        let Some(job) = state.jobs.get_mut(&job_id) else {
            return Ok(None);
        };
        if !expected.contains(&job.status) {
            return Ok(None);
        }
        job.status = to;
        if let Some(message) = message {
            job.message = Some(message.to_string());
        }
        job.updated_at = Utc::now();
        Ok(Some(job.clone()))
    }

    async fn set_totals(&self, job_id: Uuid, total_leads: i64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(job) = state.jobs.get_mut(&job_id) {
            job.total_leads = total_leads;
            job.remaining_leads = total_leads - job.processed_count;
            job.fanned_out_at = Some(Utc::now());
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn apply_progress(&self, job_id: Uuid, delta: ProgressDelta) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(job) = state.jobs.get_mut(&job_id) {
            job.processed_count += delta.processed;
            job.newly_processed_count += delta.newly;
            job.already_processed_count += delta.already;
            job.error_count += delta.errors;
            job.remaining_leads += delta.remaining;
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn upsert_item(&self, item: ItemJob) -> Result<ItemJob> {
        let mut state = self.state.lock().unwrap();
        let existing = state
            .items
            .entry(item.item_key.clone())
            .or_insert(item)
            .clone();
        Ok(existing)
    }

    async fn get_item(&self, item_key: &str) -> Result<Option<ItemJob>> {
        Ok(self.state.lock().unwrap().items.get(item_key).cloned())
    }

    async fn advance_item(
        &self,
        item_key: &str,
        expected: &[ItemJobStatus],
        advance: ItemAdvance,
    ) -> Result<Option<ItemJob>> {
        let mut state = self.state.lock().unwrap();
        let Some(item) = state.items.get_mut(item_key) else {
            return Ok(None);
        };
        if !expected.contains(&item.status) {
            return Ok(None);
        }
        item.status = advance.status;
        if let Some(request_id) = advance.generation_request_id {
            item.generation_request_id = Some(request_id);
        }
        if let Some(output) = advance.output {
            item.output = Some(output);
        }
        if let Some(message) = advance.message {
            item.message = Some(message);
        }
        item.updated_at = Utc::now();
        Ok(Some(item.clone()))
    }

    async fn count_items(&self, job_id: Uuid) -> Result<i64> {
        let state = self.state.lock().unwrap();
        Ok(state
            .items
            .values()
            .filter(|item| item.job_id == job_id)
            .count() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> BatchJob {
        BatchJob::builder()
            .list_id(Uuid::new_v4())
            .source_columns(vec!["name".to_string()])
            .new_column_name("summary")
            .prompt("Summarize")
            .build()
    }

    #[tokio::test]
    async fn pagination_walks_insertion_order() {
        let store = MemoryLeadStore::new();
        let list_id = Uuid::new_v4();
        store.add_list(list_id, &["name"]);
        let ids: Vec<Uuid> = (0..5)
            .map(|i| store.add_lead(list_id, &[("name", &format!("lead-{i}"))]))
            .collect();

        let mut seen = Vec::new();
        let mut token = None;
        loop {
            let page = store.list_leads(list_id, token, 2).await.unwrap();
            seen.extend(page.records.iter().map(|r| r.lead_item_id));
            token = page.next_page_token;
            if token.is_none() {
                break;
            }
        }
        assert_eq!(seen, ids);
    }

    #[tokio::test]
    async fn conditional_write_does_not_overwrite() {
        let store = MemoryLeadStore::new();
        let list_id = Uuid::new_v4();
        store.add_list(list_id, &["name"]);
        let lead_id = store.add_lead(list_id, &[("name", "Acme")]);

        let first = store
            .set_column_if_empty(lead_id, "summary", "one", "genreq-1")
            .await
            .unwrap();
        assert_eq!(first, ColumnWriteOutcome::Applied);

        let second = store
            .set_column_if_empty(lead_id, "summary", "two", "genreq-2")
            .await
            .unwrap();
        assert_eq!(second, ColumnWriteOutcome::Filled);

        let lead = store.lead(lead_id).unwrap();
        assert_eq!(lead.value_trimmed("summary"), "one");
    }

    #[tokio::test]
    async fn conditional_write_recognizes_own_redelivery() {
        let store = MemoryLeadStore::new();
        let list_id = Uuid::new_v4();
        store.add_list(list_id, &["name"]);
        let lead_id = store.add_lead(list_id, &[("name", "Acme")]);

        store
            .set_column_if_empty(lead_id, "summary", "one", "genreq-1")
            .await
            .unwrap();
        let redelivered = store
            .set_column_if_empty(lead_id, "summary", "one", "genreq-1")
            .await
            .unwrap();
        assert_eq!(redelivered, ColumnWriteOutcome::AlreadyApplied);
    }

    #[tokio::test]
    async fn add_list_column_is_idempotent() {
        let store = MemoryLeadStore::new();
        let list_id = Uuid::new_v4();
        store.add_list(list_id, &["name"]);
        store.add_list_column(list_id, "summary").await.unwrap();
        store.add_list_column(list_id, "summary").await.unwrap();
        let list = store.list(list_id).unwrap();
        assert_eq!(list.columns, vec!["name", "summary"]);
    }

    #[tokio::test]
    async fn upsert_item_never_clobbers_existing() {
        let store = MemoryBatchStore::new();
        let job = sample_job();
        let lead_id = Uuid::new_v4();
        let item = ItemJob::for_lead(&job, lead_id);
        let key = item.item_key.clone();

        store.upsert_item(item.clone()).await.unwrap();
        store
            .advance_item(
                &key,
                &[ItemJobStatus::Queued],
                ItemAdvance::to(ItemJobStatus::Done).with_output("done"),
            )
            .await
            .unwrap();

        // Re-delivered fan-out must not reset the finished item.
        let merged = store.upsert_item(item).await.unwrap();
        assert_eq!(merged.status, ItemJobStatus::Done);
        assert_eq!(store.count_items(job.job_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn advance_item_guard_loses_on_terminal_status() {
        let store = MemoryBatchStore::new();
        let job = sample_job();
        let item = ItemJob::for_lead(&job, Uuid::new_v4());
        let key = item.item_key.clone();
        store.upsert_item(item).await.unwrap();

        let won = store
            .advance_item(
                &key,
                &[ItemJobStatus::Queued],
                ItemAdvance::to(ItemJobStatus::Skipped).with_message("already filled"),
            )
            .await
            .unwrap();
        assert!(won.is_some());

        let lost = store
            .advance_item(
                &key,
                &[ItemJobStatus::Queued, ItemJobStatus::Processing],
                ItemAdvance::to(ItemJobStatus::Done),
            )
            .await
            .unwrap();
        assert!(lost.is_none());
        assert_eq!(store.item(&key).unwrap().status, ItemJobStatus::Skipped);
    }

    #[tokio::test]
    async fn set_totals_accounts_for_already_processed_items() {
        let store = MemoryBatchStore::new();
        let job = sample_job();
        let job_id = job.job_id;
        store.insert_job(job).await.unwrap();

        // An item finished while fan-out was still enumerating.
        store
            .apply_progress(job_id, ProgressDelta::already_filled())
            .await
            .unwrap();
        store.set_totals(job_id, 3).await.unwrap();

        let job = store.job(job_id).unwrap();
        assert_eq!(job.total_leads, 3);
        assert_eq!(job.remaining_leads, 2);
        assert!(job.fanned_out_at.is_some());
    }

    #[tokio::test]
    async fn transition_job_guard() {
        let store = MemoryBatchStore::new();
        let job = sample_job();
        let job_id = job.job_id;
        store.insert_job(job).await.unwrap();

        let moved = store
            .transition_job(
                job_id,
                &[BatchJobStatus::Pending],
                BatchJobStatus::Running,
                None,
            )
            .await
            .unwrap();
        assert!(moved.is_some());

        let lost = store
            .transition_job(
                job_id,
                &[BatchJobStatus::Pending],
                BatchJobStatus::Running,
                None,
            )
            .await
            .unwrap();
        assert!(lost.is_none());
    }
}
