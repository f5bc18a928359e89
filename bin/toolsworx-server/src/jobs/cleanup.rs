//! Periodic removal of expired job records and their staging directories.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::entities::JobStore;
use crate::error::ServerError;
use crate::state::AppState;

#[derive(Debug, Default, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Terminal job records deleted.
    pub jobs_removed: usize,
    /// Staging directories deleted, including orphans with no record.
    pub directories_removed: usize,
}

/// Run [`run_sweep`] now and then every `cleanup_interval`.
pub fn spawn_sweeper(state: Arc<AppState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(state.config.cleanup_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = run_sweep(&state).await {
                warn!(error = %e, "cleanup sweep failed");
            }
        }
    })
}

/// Delete terminal jobs older than `job_max_age`, then any staging directory
/// of that age that no longer belongs to a job. Jobs with a live task are
/// never touched.
pub async fn run_sweep(state: &AppState) -> Result<SweepReport, ServerError> {
    let max_age = state.config.job_max_age();
    let cutoff = Utc::now()
        - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::zero());
    let active = state.task_manager.active_ids();
    let mut report = SweepReport::default();

    for job in state.store.list_expired(cutoff).await? {
        if active.contains(&job.id) {
            continue;
        }
        match state.workspace.remove_job(&job.id).await {
            Ok(true) => report.directories_removed += 1,
            Ok(false) => {}
            Err(e) => warn!(job_id = %job.id, error = %e, "failed to remove job directory"),
        }
        if state.store.delete_job(&job.id).await? {
            report.jobs_removed += 1;
            debug!(job_id = %job.id, status = %job.status, "expired job removed");
        }
    }

    let mut keep: HashSet<String> = state
        .store
        .list_jobs(None)
        .await?
        .into_iter()
        .map(|job| job.id)
        .collect();
    keep.extend(active);

    let orphans = state
        .workspace
        .sweep(max_age, |id| keep.contains(id))
        .await?;
    report.directories_removed += orphans.len();

    if report.jobs_removed > 0 || report.directories_removed > 0 {
        info!(
            jobs_removed = report.jobs_removed,
            directories_removed = report.directories_removed,
            "cleanup sweep finished"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use toolsworx_core::{ConversionOptions, JobKind, JobStatus, Tool};

    use super::*;
    use crate::entities::JobRecord;
    use crate::state::testing::test_state;
    use tracing_test::traced_test;

    fn record(id: &str, status: JobStatus) -> JobRecord {
        let now = Utc::now();
        JobRecord {
            id: id.into(),
            kind: JobKind::File,
            tool: Tool::LibreOffice,
            status,
            progress: 0,
            input_name: "memo.docx".into(),
            input_path: format!("/tmp/{id}/input/memo.docx"),
            output_path: None,
            target_format: "pdf".into(),
            options: ConversionOptions::default(),
            error_msg: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn sweep_removes_expired_jobs_and_orphans_only() {
        let test = test_state(|config| config.job_max_age_secs = 0).await;
        let state = &test.state;

        for (id, status) in [("done", JobStatus::Completed), ("waiting", JobStatus::Queued)] {
            state.store.insert_job(record(id, status)).await.unwrap();
            state.workspace.create_job(id).await.unwrap();
        }
        state.workspace.create_job("orphan").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let report = run_sweep(state).await.unwrap();
        assert_eq!(report.jobs_removed, 1);
        assert_eq!(report.directories_removed, 2);

        let root = state.workspace.root();
        assert!(!root.join("done").exists());
        assert!(!root.join("orphan").exists());
        assert!(root.join("waiting").exists());
        assert!(state.store.get_job("done").await.unwrap().is_none());
        assert!(state.store.get_job("waiting").await.unwrap().is_some());
        assert!(logs_contain("cleanup sweep finished"));
    }

    #[tokio::test]
    async fn fresh_jobs_survive_the_sweep() {
        let test = test_state(|config| config.job_max_age_secs = 3600).await;
        let state = &test.state;
        state.store.insert_job(record("recent", JobStatus::Failed)).await.unwrap();
        state.workspace.create_job("recent").await.unwrap();

        let report = run_sweep(state).await.unwrap();
        assert_eq!(report.jobs_removed, 0);
        assert_eq!(report.directories_removed, 0);
        assert!(state.workspace.root().join("recent").exists());
    }
}
