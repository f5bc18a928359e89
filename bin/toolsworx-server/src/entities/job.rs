use std::future::Future;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use toolsworx_core::{ConversionOptions, JobKind, JobStatus, Tool};
use tracing::warn;

use super::SqliteStore;

/// A row in the `jobs` table.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: String,
    pub kind: JobKind,
    pub tool: Tool,
    pub status: JobStatus,
    /// 0..=100.
    pub progress: u8,
    /// Original upload name, used for the download file name.
    pub input_name: String,
    pub input_path: String,
    /// Set once the job completed.
    pub output_path: Option<String>,
    pub target_format: String,
    pub options: ConversionOptions,
    pub error_msg: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub trait JobStore: Send + Sync + 'static {
    fn insert_job(&self, record: JobRecord) -> impl Future<Output = Result<(), sqlx::Error>> + Send;

    /// Insert `record` unless `limit` jobs are already queued or processing.
    /// The count and the insert are one statement. Returns whether it was
    /// inserted.
    fn insert_job_within(
        &self,
        record: JobRecord,
        limit: i64,
    ) -> impl Future<Output = Result<bool, sqlx::Error>> + Send;

    fn get_job(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<JobRecord>, sqlx::Error>> + Send;

    /// Newest first, optionally restricted to one family.
    fn list_jobs(
        &self,
        kind: Option<JobKind>,
    ) -> impl Future<Output = Result<Vec<JobRecord>, sqlx::Error>> + Send;

    /// `queued → processing`. Returns `false` if the job was not queued.
    fn mark_processing(&self, id: &str) -> impl Future<Output = Result<bool, sqlx::Error>> + Send;

    /// Raise progress while processing; never lowers it.
    fn update_progress(
        &self,
        id: &str,
        progress: u8,
    ) -> impl Future<Output = Result<bool, sqlx::Error>> + Send;

    /// `processing → completed`.
    fn complete_job(
        &self,
        id: &str,
        output_path: &str,
    ) -> impl Future<Output = Result<bool, sqlx::Error>> + Send;

    /// `queued | processing → failed`. Terminal jobs are left alone.
    fn fail_job(
        &self,
        id: &str,
        error_msg: &str,
    ) -> impl Future<Output = Result<bool, sqlx::Error>> + Send;

    /// `queued | processing → cancelled`. Returns whether it applied.
    fn cancel_job(&self, id: &str) -> impl Future<Output = Result<bool, sqlx::Error>> + Send;

    fn delete_job(&self, id: &str) -> impl Future<Output = Result<bool, sqlx::Error>> + Send;

    /// Jobs in a terminal state last touched before `cutoff`.
    fn list_expired(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<JobRecord>, sqlx::Error>> + Send;

    /// Number of queued or processing jobs.
    fn count_unfinished(&self) -> impl Future<Output = Result<i64, sqlx::Error>> + Send;

    /// Fail every job left queued or processing by a previous process.
    fn interrupt_unfinished_jobs(&self) -> impl Future<Output = Result<u64, sqlx::Error>> + Send;
}

type JobRow = (
    String,
    String,
    String,
    String,
    i64,
    String,
    String,
    Option<String>,
    String,
    Option<String>,
    Option<String>,
    String,
    String,
);

const JOB_COLUMNS: &str = "id, kind, tool, status, progress, input_name, input_path, \
     output_path, target_format, options, error_msg, created_at, updated_at";

/// Sortable RFC 3339 timestamp; fixed precision keeps string order equal to
/// time order.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_err(column: &str, raw: &str) -> sqlx::Error {
    sqlx::Error::Decode(format!("invalid {column} value '{raw}'").into())
}

fn parse_time(column: &str, raw: &str) -> DateTime<Utc> {
    raw.parse().unwrap_or_else(|e: chrono::ParseError| {
        warn!(column, raw, error = %e, "failed to parse job timestamp; using now");
        Utc::now()
    })
}

fn from_row(row: JobRow) -> Result<JobRecord, sqlx::Error> {
    let (
        id,
        kind,
        tool,
        status,
        progress,
        input_name,
        input_path,
        output_path,
        target_format,
        options,
        error_msg,
        created_at,
        updated_at,
    ) = row;

    let options = match options.as_deref() {
        Some(json) => serde_json::from_str(json).unwrap_or_else(|e| {
            warn!(job_id = %id, error = %e, "unreadable stored options; using defaults");
            ConversionOptions::default()
        }),
        None => ConversionOptions::default(),
    };

    Ok(JobRecord {
        kind: JobKind::from_str(&kind).map_err(|_| decode_err("kind", &kind))?,
        tool: Tool::from_str(&tool).map_err(|_| decode_err("tool", &tool))?,
        status: JobStatus::from_str(&status).map_err(|_| decode_err("status", &status))?,
        progress: progress.clamp(0, 100) as u8,
        input_name,
        input_path,
        output_path,
        target_format,
        options,
        error_msg,
        created_at: parse_time("created_at", &created_at),
        updated_at: parse_time("updated_at", &updated_at),
        id,
    })
}

impl JobStore for SqliteStore {
    async fn insert_job(&self, record: JobRecord) -> Result<(), sqlx::Error> {
        self.insert_job_within(record, i64::MAX).await.map(drop)
    }

    async fn insert_job_within(&self, record: JobRecord, limit: i64) -> Result<bool, sqlx::Error> {
        let options = serde_json::to_string(&record.options)
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
        let result = sqlx::query(
            "INSERT INTO jobs (id, kind, tool, status, progress, input_name, input_path, \
             output_path, target_format, options, error_msg, created_at, updated_at) \
             SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13 \
             WHERE (SELECT COUNT(*) FROM jobs WHERE status IN ('queued', 'processing')) < ?14",
        )
        .bind(&record.id)
        .bind(record.kind.as_ref())
        .bind(record.tool.as_ref())
        .bind(record.status.as_ref())
        .bind(i64::from(record.progress))
        .bind(&record.input_name)
        .bind(&record.input_path)
        .bind(&record.output_path)
        .bind(&record.target_format)
        .bind(&options)
        .bind(&record.error_msg)
        .bind(timestamp(record.created_at))
        .bind(timestamp(record.updated_at))
        .bind(limit)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_job(&self, id: &str) -> Result<Option<JobRecord>, sqlx::Error> {
        let row: Option<JobRow> =
            sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"))
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
        row.map(from_row).transpose()
    }

    async fn list_jobs(&self, kind: Option<JobKind>) -> Result<Vec<JobRecord>, sqlx::Error> {
        let rows: Vec<JobRow> = if let Some(kind) = kind {
            sqlx::query_as(&format!(
                "SELECT {JOB_COLUMNS} FROM jobs WHERE kind = ?1 ORDER BY created_at DESC"
            ))
            .bind(kind.as_ref())
            .fetch_all(self.pool())
            .await?
        } else {
            sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC"))
                .fetch_all(self.pool())
                .await?
        };
        rows.into_iter().map(from_row).collect()
    }

    async fn mark_processing(&self, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'processing', updated_at = ?1 \
             WHERE id = ?2 AND status = 'queued'",
        )
        .bind(timestamp(Utc::now()))
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_progress(&self, id: &str, progress: u8) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs SET progress = ?1, updated_at = ?2 \
             WHERE id = ?3 AND status = 'processing' AND progress < ?1",
        )
        .bind(i64::from(progress.min(100)))
        .bind(timestamp(Utc::now()))
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn complete_job(&self, id: &str, output_path: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'completed', progress = 100, output_path = ?1, \
             error_msg = NULL, updated_at = ?2 \
             WHERE id = ?3 AND status = 'processing'",
        )
        .bind(output_path)
        .bind(timestamp(Utc::now()))
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn fail_job(&self, id: &str, error_msg: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'failed', error_msg = ?1, updated_at = ?2 \
             WHERE id = ?3 AND status IN ('queued', 'processing')",
        )
        .bind(error_msg)
        .bind(timestamp(Utc::now()))
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn cancel_job(&self, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'cancelled', updated_at = ?1 \
             WHERE id = ?2 AND status IN ('queued', 'processing')",
        )
        .bind(timestamp(Utc::now()))
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_job(&self, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?1")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<JobRecord>, sqlx::Error> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE status IN ('completed', 'failed', 'cancelled') AND updated_at < ?1 \
             ORDER BY updated_at"
        ))
        .bind(timestamp(cutoff))
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(from_row).collect()
    }

    async fn count_unfinished(&self) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM jobs WHERE status IN ('queued', 'processing')")
                .fetch_one(self.pool())
                .await?;
        Ok(count)
    }

    async fn interrupt_unfinished_jobs(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'failed', error_msg = 'interrupted by server restart', \
             updated_at = ?1 WHERE status IN ('queued', 'processing')",
        )
        .bind(timestamp(Utc::now()))
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }
}
