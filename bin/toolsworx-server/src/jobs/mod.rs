//! Job lifecycle: submission, the per-job run task, cancellation and deletion.
//!
//! Each submitted job gets one tokio task. The task waits for an admission
//! permit for its tool (this wait is the queue), flips the record to
//! `processing`, runs the converter while a side task persists progress, and
//! finally records `completed` or `failed`. Cancelling aborts the task, which
//! drops the converter future and kills any child process with it.

pub mod cleanup;

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::oneshot;
use toolsworx_core::{progress_channel, JobSpec, JobStatus, ToolError};
use tracing::{debug, info, warn, Instrument};

use crate::entities::{JobRecord, JobStore};
use crate::error::ServerError;
use crate::state::AppState;

/// A planned job plus the name the file was uploaded under.
#[derive(Debug, Clone)]
pub struct Submission {
    pub spec: JobSpec,
    pub input_name: String,
}

fn pending_limit(state: &AppState) -> i64 {
    i64::try_from(state.config.max_pending_jobs).unwrap_or(i64::MAX)
}

fn queue_full() -> ServerError {
    ServerError::QueueFull("too many conversions in progress; try again shortly".into())
}

/// Early refusal before an upload is read. [`submit`] re-checks atomically.
pub async fn ensure_capacity(state: &AppState) -> Result<(), ServerError> {
    let unfinished = state.store.count_unfinished().await?;
    if unfinished >= pending_limit(state) {
        warn!(unfinished, limit = state.config.max_pending_jobs, "job queue full");
        return Err(queue_full());
    }
    Ok(())
}

/// Persist a queued record for `submission` and start its run task.
///
/// Refused with [`ServerError::QueueFull`] once `max_pending_jobs` jobs are
/// queued or processing.
pub async fn submit(state: &Arc<AppState>, submission: Submission) -> Result<JobRecord, ServerError> {
    let Submission { spec, input_name } = submission;
    let now = Utc::now();
    let record = JobRecord {
        id: spec.id.clone(),
        kind: spec.kind,
        tool: spec.tool,
        status: JobStatus::Queued,
        progress: 0,
        input_name,
        input_path: spec.input.to_string_lossy().into_owned(),
        output_path: None,
        target_format: spec.target_format.clone(),
        options: spec.options.clone(),
        error_msg: None,
        created_at: now,
        updated_at: now,
    };
    if !state.store.insert_job_within(record.clone(), pending_limit(state)).await? {
        warn!(job_id = %record.id, limit = state.config.max_pending_jobs, "job queue full");
        return Err(queue_full());
    }

    // Hold the task until its abort handle is registered, so a fast job
    // cannot remove the handle before it exists.
    let (registered_tx, registered_rx) = oneshot::channel::<()>();
    let task_state = Arc::clone(state);
    let job_id = spec.id.clone();
    let span = tracing::info_span!("job", job_id = %job_id, kind = %spec.kind, tool = %spec.tool);
    let join = tokio::spawn(
        async move {
            let _ = registered_rx.await;
            run(&task_state, spec).await;
            task_state.task_manager.remove(&job_id);
        }
        .instrument(span),
    );
    state.task_manager.insert(record.id.clone(), join);
    let _ = registered_tx.send(());

    info!(
        job_id = %record.id,
        kind = %record.kind,
        tool = %record.tool,
        target = %record.target_format,
        "job queued"
    );
    Ok(record)
}

enum Outcome {
    Completed,
    /// The job left `queued` before a slot freed up (cancelled or deleted).
    Skipped,
    /// The store refused the `processing` transition.
    NotStarted(String),
}

async fn run(state: &AppState, spec: JobSpec) {
    match execute(state, &spec).await {
        Ok(Outcome::Completed) => {
            let output = spec.output.to_string_lossy();
            match state.store.complete_job(&spec.id, &output).await {
                Ok(true) => info!(output = %output, "job completed"),
                Ok(false) => debug!("job finished after leaving processing; result discarded"),
                Err(e) => warn!(error = %e, "failed to record job completion"),
            }
        }
        Ok(Outcome::Skipped) => debug!("job no longer queued; skipping"),
        Ok(Outcome::NotStarted(reason)) => record_failure(state, &spec.id, &reason).await,
        Err(e) => {
            warn!(error = %e, "job failed");
            record_failure(state, &spec.id, &e.to_string()).await;
        }
    }
}

async fn record_failure(state: &AppState, id: &str, message: &str) {
    if let Err(e) = state.store.fail_job(id, message).await {
        warn!(error = %e, "failed to record job failure");
    }
}

async fn execute(state: &AppState, spec: &JobSpec) -> Result<Outcome, ToolError> {
    let _permit = state.resources.acquire(spec.tool).await?;

    match state.store.mark_processing(&spec.id).await {
        Ok(true) => {}
        Ok(false) => return Ok(Outcome::Skipped),
        Err(e) => {
            warn!(error = %e, "failed to mark job processing");
            return Ok(Outcome::NotStarted(format!("could not start job: {e}")));
        }
    }
    debug!("job processing");

    let converter = state.toolbox.converter(spec.tool)?;
    let (reporter, mut watcher) = progress_channel();

    let store = Arc::clone(&state.store);
    let job_id = spec.id.clone();
    let persist = tokio::spawn(async move {
        while let Some(pct) = watcher.changed().await {
            // 100 is written together with the output path.
            if pct >= 100 {
                continue;
            }
            if let Err(e) = store.update_progress(&job_id, pct).await {
                warn!(job_id = %job_id, error = %e, "failed to persist progress");
            }
        }
    });

    let result = converter.run(spec, &reporter).await;
    drop(reporter);
    let _ = persist.await;
    result?;

    let produced = tokio::fs::metadata(&spec.output)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false);
    if !produced {
        return Err(ToolError::MissingOutput { tool: spec.tool });
    }
    Ok(Outcome::Completed)
}

/// Cancel a queued or processing job.
pub async fn cancel(state: &AppState, id: &str) -> Result<JobRecord, ServerError> {
    let record = state
        .store
        .get_job(id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("job {id} not found")))?;

    if record.status.is_terminal() {
        return Err(ServerError::Conflict(format!(
            "job {id} is already {}",
            record.status
        )));
    }
    // Record the cancellation first so a finishing task cannot overwrite it.
    if !state.store.cancel_job(id).await? {
        return Err(ServerError::Conflict(format!("job {id} finished before it could be cancelled")));
    }
    state.task_manager.cancel(id);
    info!(job_id = %id, "job cancelled");

    state
        .store
        .get_job(id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("job {id} not found")))
}

/// Cancel if needed, then remove the job's files and record.
pub async fn delete(state: &AppState, id: &str) -> Result<(), ServerError> {
    // Validates the id before anything touches the filesystem.
    state.workspace.job_dir(id)?;

    let record = state
        .store
        .get_job(id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("job {id} not found")))?;

    if !record.status.is_terminal() {
        state.store.cancel_job(id).await?;
    }
    if let Some(task) = state.task_manager.cancel(id) {
        // The converter must be gone before its directory is removed.
        let _ = task.await;
    }

    let removed_files = state.workspace.remove_job(id).await?;
    state.store.delete_job(id).await?;
    info!(job_id = %id, removed_files, "job deleted");
    Ok(())
}
