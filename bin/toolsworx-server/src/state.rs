//! Shared application state injected into every Axum handler.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use toolsworx_core::{ResourceManager, Tool, Toolbox, Workspace};

use crate::config::Config;
use crate::entities::SqliteStore;

/// Tracks in-flight job tasks, keyed by job ID.
pub struct TaskManager {
    handles: std::sync::Mutex<HashMap<String, JoinHandle<()>>>,
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.handles.lock().map(|h| h.len()).unwrap_or(0);
        write!(f, "TaskManager({count} handles)")
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskManager {
    pub fn new() -> Self {
        Self {
            handles: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, id: impl Into<String>, handle: JoinHandle<()>) {
        if let Ok(mut map) = self.handles.lock() {
            map.insert(id.into(), handle);
        }
    }

    /// Abort and forget a task. The handle is returned so the caller can
    /// wait for the task to actually stop.
    pub fn cancel(&self, id: &str) -> Option<JoinHandle<()>> {
        let handle = self.handles.lock().ok()?.remove(id)?;
        handle.abort();
        Some(handle)
    }

    pub fn remove(&self, id: &str) {
        if let Ok(mut map) = self.handles.lock() {
            map.remove(id);
        }
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.handles
            .lock()
            .map(|map| map.contains_key(id))
            .unwrap_or(false)
    }

    /// Snapshot of the ids with a live task.
    pub fn active_ids(&self) -> HashSet<String> {
        self.handles
            .lock()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// State shared across all HTTP handlers and background tasks.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Job records.
    pub store: Arc<SqliteStore>,
    /// Abort handles of running jobs.
    pub task_manager: Arc<TaskManager>,
    /// Per-job staging directories.
    pub workspace: Workspace,
    pub toolbox: Toolbox,
    /// Per-tool concurrency slots.
    pub resources: ResourceManager,
    /// Client used by the upstream proxy.
    pub http: reqwest::Client,
}

impl AppState {
    /// Assemble the state: converters, per-tool admission slots and the
    /// proxy client all derive from `config`.
    pub fn new(config: Config, store: SqliteStore, workspace: Workspace) -> anyhow::Result<Self> {
        let toolbox = Toolbox::new(config.toolbox_config());

        let mut resources = ResourceManager::new();
        resources.register(Tool::Ffmpeg, config.ffmpeg_concurrency);
        resources.register(Tool::LibreOffice, config.libreoffice_concurrency);
        resources.register(Tool::Image, config.image_concurrency);
        resources.register(Tool::Mock, config.image_concurrency);

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(8)
            .build()?;

        Ok(Self {
            config: Arc::new(config),
            store: Arc::new(store),
            task_manager: Arc::new(TaskManager::new()),
            workspace,
            toolbox,
            resources,
            http,
        })
    }
}

/// In-memory state with mock converters for handler and runner tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use tempfile::TempDir;

    pub struct TestState {
        pub state: Arc<AppState>,
        // Removed on drop.
        _work_dir: TempDir,
    }

    pub async fn test_state(configure: impl FnOnce(&mut Config)) -> TestState {
        let work_dir = TempDir::new().unwrap();
        let mut config = Config::from_lookup(|_| None);
        config.database_url = "sqlite::memory:".into();
        config.work_dir = work_dir.path().to_path_buf();
        config.mock_tools = true;
        config.mock_delay_ms = 50;
        config.enable_docs = true;
        configure(&mut config);

        let store = SqliteStore::connect(&config.database_url).await.unwrap();
        let workspace = Workspace::open(&config.work_dir).await.unwrap();
        let state = AppState::new(config, store, workspace).unwrap();
        TestState {
            state: Arc::new(state),
            _work_dir: work_dir,
        }
    }
}
