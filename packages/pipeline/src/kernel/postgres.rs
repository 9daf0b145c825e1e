//! PostgreSQL-backed store implementations.
//!
//! Counter updates are single `SET count = count + $n` statements and status
//! transitions are conditional updates, so every guarantee the pipeline
//! needs comes from row-level atomicity rather than application locking.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domains::massage::models::{
    BatchJob, BatchJobStatus, ColumnStatus, ColumnWriteOutcome, ItemAdvance, ItemJob,
    ItemJobStatus, LeadList, LeadPage, LeadRecord, ProgressDelta,
};
use crate::kernel::traits::{BaseBatchStore, BaseLeadStore};

/// Run the pipeline's schema migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("failed to run pipeline migrations")?;
    Ok(())
}

const JOB_COLUMNS: &str = "job_id, list_id, source_columns, new_column_name, prompt, status, \
     total_leads, processed_count, newly_processed_count, already_processed_count, \
     error_count, remaining_leads, fanned_out_at, message, created_at, updated_at";

const ITEM_COLUMNS: &str = "item_key, job_id, list_id, lead_item_id, source_columns, \
     new_column_name, prompt, status, generation_request_id, output, message, \
     created_at, updated_at";

fn status_names(statuses: &[BatchJobStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

fn item_status_names(statuses: &[ItemJobStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

// =============================================================================
// Batch Store
// =============================================================================

pub struct PostgresBatchStore {
    pool: PgPool,
}

impl PostgresBatchStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaseBatchStore for PostgresBatchStore {
    async fn insert_job(&self, job: BatchJob) -> Result<BatchJob> {
        let inserted = sqlx::query_as::<_, BatchJob>(&format!(
            r#"
            INSERT INTO massage_jobs ({JOB_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job.job_id)
        .bind(job.list_id)
        .bind(&job.source_columns)
        .bind(&job.new_column_name)
        .bind(&job.prompt)
        .bind(job.status)
        .bind(job.total_leads)
        .bind(job.processed_count)
        .bind(job.newly_processed_count)
        .bind(job.already_processed_count)
        .bind(job.error_count)
        .bind(job.remaining_leads)
        .bind(job.fanned_out_at)
        .bind(&job.message)
        .bind(job.created_at)
        .bind(job.updated_at)
        .fetch_one(&self.pool)
        .await
        .context("failed to insert batch job")?;

        Ok(inserted)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<BatchJob>> {
        let job = sqlx::query_as::<_, BatchJob>(&format!(
            "SELECT {JOB_COLUMNS} FROM massage_jobs WHERE job_id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    async fn transition_job(
        &self,
        job_id: Uuid,
        expected: &[BatchJobStatus],
        to: BatchJobStatus,
        message: Option<&str>,
    ) -> Result<Option<BatchJob>> {
        let job = sqlx::query_as::<_, BatchJob>(&format!(
            r#"
            UPDATE massage_jobs
            SET status = $2,
                message = COALESCE($3, message),
                updated_at = NOW()
            WHERE job_id = $1 AND status::text = ANY($4)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_id)
        .bind(to)
        .bind(message)
        .bind(status_names(expected))
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    async fn set_totals(&self, job_id: Uuid, total_leads: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE massage_jobs
            SET total_leads = $2,
                remaining_leads = $2 - processed_count,
                fanned_out_at = NOW(),
                updated_at = NOW()
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .bind(total_leads)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn apply_progress(&self, job_id: Uuid, delta: ProgressDelta) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE massage_jobs
            SET processed_count = processed_count + $2,
                newly_processed_count = newly_processed_count + $3,
                already_processed_count = already_processed_count + $4,
                error_count = error_count + $5,
                remaining_leads = remaining_leads + $6,
                updated_at = NOW()
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .bind(delta.processed)
        .bind(delta.newly)
        .bind(delta.already)
        .bind(delta.errors)
        .bind(delta.remaining)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_item(&self, item: ItemJob) -> Result<ItemJob> {
        // The no-op DO UPDATE makes RETURNING yield the existing row, so a
        // re-delivered fan-out never clobbers status, output or request id.
        let merged = sqlx::query_as::<_, ItemJob>(&format!(
            r#"
            INSERT INTO massage_items ({ITEM_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (item_key) DO UPDATE SET updated_at = massage_items.updated_at
            RETURNING {ITEM_COLUMNS}
            "#
        ))
        .bind(&item.item_key)
        .bind(item.job_id)
        .bind(item.list_id)
        .bind(item.lead_item_id)
        .bind(&item.source_columns)
        .bind(&item.new_column_name)
        .bind(&item.prompt)
        .bind(item.status)
        .bind(&item.generation_request_id)
        .bind(&item.output)
        .bind(&item.message)
        .bind(item.created_at)
        .bind(item.updated_at)
        .fetch_one(&self.pool)
        .await
        .context("failed to upsert item job")?;

        Ok(merged)
    }

    async fn get_item(&self, item_key: &str) -> Result<Option<ItemJob>> {
        let item = sqlx::query_as::<_, ItemJob>(&format!(
            "SELECT {ITEM_COLUMNS} FROM massage_items WHERE item_key = $1"
        ))
        .bind(item_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(item)
    }

    async fn advance_item(
        &self,
        item_key: &str,
        expected: &[ItemJobStatus],
        advance: ItemAdvance,
    ) -> Result<Option<ItemJob>> {
        let item = sqlx::query_as::<_, ItemJob>(&format!(
            r#"
            UPDATE massage_items
            SET status = $2,
                generation_request_id = COALESCE($3, generation_request_id),
                output = COALESCE($4, output),
                message = COALESCE($5, message),
                updated_at = NOW()
            WHERE item_key = $1 AND status::text = ANY($6)
            RETURNING {ITEM_COLUMNS}
            "#
        ))
        .bind(item_key)
        .bind(advance.status)
        .bind(&advance.generation_request_id)
        .bind(&advance.output)
        .bind(&advance.message)
        .bind(item_status_names(expected))
        .fetch_optional(&self.pool)
        .await?;

        Ok(item)
    }

    async fn count_items(&self, job_id: Uuid) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM massage_items WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

// =============================================================================
// Lead Store
// =============================================================================

#[derive(sqlx::FromRow)]
struct LeadRow {
    lead_item_id: Uuid,
    list_id: Uuid,
    position: i64,
    data: Json<BTreeMap<String, String>>,
    column_status: Json<BTreeMap<String, ColumnStatus>>,
}

impl From<LeadRow> for LeadRecord {
    fn from(row: LeadRow) -> Self {
        Self {
            lead_item_id: row.lead_item_id,
            list_id: row.list_id,
            data: row.data.0,
            column_status: row.column_status.0,
        }
    }
}

const LEAD_COLUMNS: &str = "lead_item_id, list_id, position, data, column_status";

pub struct PostgresLeadStore {
    pool: PgPool,
}

impl PostgresLeadStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaseLeadStore for PostgresLeadStore {
    async fn list_leads(
        &self,
        list_id: Uuid,
        page_token: Option<String>,
        page_size: usize,
    ) -> Result<LeadPage> {
        let after: i64 = match page_token {
            Some(token) => token.parse().context("invalid page token")?,
            None => 0,
        };
        let rows = sqlx::query_as::<_, LeadRow>(&format!(
            r#"
            SELECT {LEAD_COLUMNS}
            FROM leads
            WHERE list_id = $1 AND position > $2
            ORDER BY position ASC
            LIMIT $3
            "#
        ))
        .bind(list_id)
        .bind(after)
        .bind(page_size as i64)
        .fetch_all(&self.pool)
        .await?;

        let next_page_token = (rows.len() == page_size)
            .then(|| rows.last().map(|r| r.position.to_string()))
            .flatten();
        let records = rows.into_iter().map(LeadRecord::from).collect();
        Ok(LeadPage {
            records,
            next_page_token,
        })
    }

    async fn get_lead(&self, lead_item_id: Uuid) -> Result<Option<LeadRecord>> {
        let row = sqlx::query_as::<_, LeadRow>(&format!(
            "SELECT {LEAD_COLUMNS} FROM leads WHERE lead_item_id = $1"
        ))
        .bind(lead_item_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(LeadRecord::from))
    }

    async fn set_column_if_empty(
        &self,
        lead_item_id: Uuid,
        column: &str,
        value: &str,
        request_id: &str,
    ) -> Result<ColumnWriteOutcome> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, LeadRow>(&format!(
            "SELECT {LEAD_COLUMNS} FROM leads WHERE lead_item_id = $1 FOR UPDATE"
        ))
        .bind(lead_item_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(ColumnWriteOutcome::Missing);
        };
        let record = LeadRecord::from(row);
        let outcome = record.column_write_outcome(column, request_id);
        if outcome == ColumnWriteOutcome::Applied {
            let mut data = record.data;
            data.insert(column.to_string(), value.trim().to_string());
            let mut column_status = record.column_status;
            column_status.insert(column.to_string(), ColumnStatus::done(request_id));

            sqlx::query("UPDATE leads SET data = $2, column_status = $3 WHERE lead_item_id = $1")
                .bind(lead_item_id)
                .bind(Json(data))
                .bind(Json(column_status))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(outcome)
    }

    async fn get_list(&self, list_id: Uuid) -> Result<Option<LeadList>> {
        let list = sqlx::query_as::<_, LeadList>(
            "SELECT list_id, columns FROM lead_lists WHERE list_id = $1",
        )
        .bind(list_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(list)
    }

    async fn add_list_column(&self, list_id: Uuid, column: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE lead_lists
            SET columns = array_append(columns, $2),
                updated_at = NOW()
            WHERE list_id = $1 AND NOT ($2 = ANY(columns))
            "#,
        )
        .bind(list_id)
        .bind(column)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
