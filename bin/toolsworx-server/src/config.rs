//! Server configuration, loaded from environment variables at startup.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use toolsworx_core::{JobKind, ToolboxConfig};

/// Runtime configuration for toolsworx-server.
///
/// Every field has a sensible default so the server works out-of-the-box
/// without any environment variables set.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:8080"`).
    pub bind_address: String,

    /// sqlx SQLite URL (default: `"sqlite::memory:"`, lost on restart).
    pub database_url: String,

    /// Root of the per-job staging directories.
    pub work_dir: PathBuf,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// When set, logs are also written to a daily-rolling file in this directory.
    pub log_dir: Option<PathBuf>,

    pub max_upload_size_mb: usize,

    /// Unfinished jobs allowed before submissions are refused with 503.
    pub max_pending_jobs: usize,

    pub ffmpeg_concurrency: usize,
    pub libreoffice_concurrency: usize,
    pub image_concurrency: usize,

    pub ffmpeg_path: Option<PathBuf>,
    pub libreoffice_path: Option<PathBuf>,
    pub tool_timeout_secs: u64,

    /// Replace every external tool with the mock converter.
    pub mock_tools: bool,
    pub mock_delay_ms: u64,

    pub cleanup_interval_secs: u64,
    pub job_max_age_secs: u64,

    /// Per-family upstream base URLs; a family with one is proxied.
    pub upstreams: Upstreams,
    pub upstream_timeout_secs: u64,

    /// Comma-separated allowed origins; unset means any origin.
    pub cors_allowed_origins: Option<String>,

    /// Bearer token for `/admin` routes; unset leaves them open.
    pub admin_token: Option<String>,

    /// Serve `/api-docs/openapi.json`.
    pub enable_docs: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Upstreams {
    pub file: Option<String>,
    pub media: Option<String>,
    pub filter: Option<String>,
}

impl Upstreams {
    pub fn for_kind(&self, kind: JobKind) -> Option<&str> {
        match kind {
            JobKind::File => self.file.as_deref(),
            JobKind::Media => self.media.as_deref(),
            JobKind::Filter => self.filter.as_deref(),
        }
    }
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build [`Config`] from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let fallback = env.non_empty("BACKEND_URL");
        let upstream = |key: &str| {
            env.non_empty(key)
                .or_else(|| fallback.clone())
                .map(|url| url.trim_end_matches('/').to_owned())
        };

        Self {
            bind_address: env.or("TOOLSWORX_BIND", "0.0.0.0:8080"),
            database_url: env.or("TOOLSWORX_DATABASE_URL", "sqlite::memory:"),
            work_dir: env
                .non_empty("TOOLSWORX_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("toolsworx")),
            log_level: env.or("TOOLSWORX_LOG", "info"),
            log_json: env.flag("TOOLSWORX_LOG_JSON", false),
            log_dir: env.non_empty("TOOLSWORX_LOG_DIR").map(PathBuf::from),
            max_upload_size_mb: env.parse("TOOLSWORX_MAX_UPLOAD_SIZE_MB", 100),
            max_pending_jobs: env.parse("TOOLSWORX_MAX_PENDING_JOBS", 64),
            ffmpeg_concurrency: env.parse("TOOLSWORX_FFMPEG_CONCURRENCY", 2),
            libreoffice_concurrency: env.parse("TOOLSWORX_LIBREOFFICE_CONCURRENCY", 1),
            image_concurrency: env.parse("TOOLSWORX_IMAGE_CONCURRENCY", 4),
            ffmpeg_path: env.non_empty("TOOLSWORX_FFMPEG_PATH").map(PathBuf::from),
            libreoffice_path: env.non_empty("TOOLSWORX_LIBREOFFICE_PATH").map(PathBuf::from),
            tool_timeout_secs: env.parse("TOOLSWORX_TOOL_TIMEOUT_SECS", 600),
            mock_tools: env.flag("TOOLSWORX_MOCK_TOOLS", false),
            mock_delay_ms: env.parse("TOOLSWORX_MOCK_DELAY_MS", 1500),
            cleanup_interval_secs: env.parse("TOOLSWORX_CLEANUP_INTERVAL_SECS", 120),
            job_max_age_secs: env.parse("TOOLSWORX_JOB_MAX_AGE_SECS", 300),
            upstreams: Upstreams {
                file: upstream("FILE_SERVICE_URL"),
                media: upstream("MEDIA_SERVICE_URL"),
                filter: upstream("FILTER_SERVICE_URL"),
            },
            upstream_timeout_secs: env.parse("TOOLSWORX_UPSTREAM_TIMEOUT_SECS", 120),
            cors_allowed_origins: env.non_empty("TOOLSWORX_CORS_ORIGINS"),
            admin_token: env.non_empty("TOOLSWORX_ADMIN_TOKEN"),
            enable_docs: env.flag("TOOLSWORX_ENABLE_DOCS", true),
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    pub fn job_max_age(&self) -> Duration {
        Duration::from_secs(self.job_max_age_secs)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs.max(1))
    }

    pub fn toolbox_config(&self) -> ToolboxConfig {
        ToolboxConfig {
            ffmpeg_path: self.ffmpeg_path.clone(),
            libreoffice_path: self.libreoffice_path.clone(),
            timeout: Duration::from_secs(self.tool_timeout_secs.max(1)),
            mock_delay: self
                .mock_tools
                .then(|| Duration::from_millis(self.mock_delay_ms)),
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn or(&self, key: &str, default: &str) -> String {
        (self.0)(key).unwrap_or_else(|| default.to_owned())
    }

    fn non_empty(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> T {
        (self.0)(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        match (self.0)(key) {
            Some(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
            None => default,
        }
    }
}
