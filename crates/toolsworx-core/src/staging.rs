//! Per-job temp-directory staging.
//!
//! Layout under the workspace root:
//!
//! ```text
//! <root>/<job_id>/input/<sanitized upload name>
//! <root>/<job_id>/output/<stem>.<target format>
//! ```
//!
//! A job's files live exactly as long as its directory; [`Workspace::sweep`]
//! is the only thing that deletes directories the request path did not.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use crate::error::ToolError;

const MAX_FILE_NAME_LEN: usize = 128;
const FALLBACK_STEM: &str = "upload";

/// Root directory holding one sub-directory per job.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Create the root directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory handle for `id` without touching the filesystem.
    pub fn job_dir(&self, id: &str) -> Result<JobDir, ToolError> {
        validate_job_id(id)?;
        Ok(JobDir {
            path: self.root.join(id),
        })
    }

    /// Create `<root>/<id>/input` and `<root>/<id>/output`.
    pub async fn create_job(&self, id: &str) -> Result<JobDir, ToolError> {
        let dir = self.job_dir(id)?;
        tokio::fs::create_dir_all(dir.input_dir()).await?;
        tokio::fs::create_dir_all(dir.output_dir()).await?;
        debug!(job_id = %id, path = %dir.path.display(), "job directory created");
        Ok(dir)
    }

    /// Delete a job directory. Returns `false` when it was already gone.
    pub async fn remove_job(&self, id: &str) -> Result<bool, ToolError> {
        let dir = self.job_dir(id)?;
        match tokio::fs::remove_dir_all(&dir.path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete every job directory last modified at least `max_age` ago,
    /// skipping ids for which `keep` returns `true`.
    ///
    /// Returns the ids that were removed. Individual removal failures are
    /// logged and skipped so one stuck directory cannot stall the sweep.
    pub async fn sweep<F>(&self, max_age: Duration, keep: F) -> Result<Vec<String>, ToolError>
    where
        F: Fn(&str) -> bool,
    {
        let now = SystemTime::now();
        let mut removed = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if validate_job_id(&name).is_err() {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(m) if m.is_dir() => m,
                Ok(_) => continue,
                Err(e) => {
                    warn!(job_id = %name, error = %e, "cannot stat job directory");
                    continue;
                }
            };
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or(Duration::ZERO);
            if age < max_age || keep(&name) {
                continue;
            }
            match tokio::fs::remove_dir_all(entry.path()).await {
                Ok(()) => {
                    debug!(job_id = %name, age_secs = age.as_secs(), "swept job directory");
                    removed.push(name);
                }
                Err(e) => warn!(job_id = %name, error = %e, "failed to sweep job directory"),
            }
        }

        if !removed.is_empty() {
            info!(count = removed.len(), "swept expired job directories");
        }
        Ok(removed)
    }
}

/// Paths belonging to one job.
#[derive(Debug, Clone)]
pub struct JobDir {
    path: PathBuf,
}

impl JobDir {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn input_dir(&self) -> PathBuf {
        self.path.join("input")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.path.join("output")
    }

    /// Where the upload named `file_name` is written.
    pub fn input_path(&self, file_name: &str) -> PathBuf {
        self.input_dir().join(sanitize_filename(file_name))
    }

    /// Where the converted result of `input_name` in `format` is written.
    pub fn output_path(&self, input_name: &str, format: &str) -> PathBuf {
        self.output_dir().join(output_file_name(input_name, format))
    }
}

/// Replace everything but `[A-Za-z0-9._-]` with `_`, drop leading dots and
/// cap the length. Never returns an empty string.
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    let capped: String = if trimmed.len() > MAX_FILE_NAME_LEN {
        // Keep the extension when truncating.
        match trimmed.rsplit_once('.') {
            Some((stem, ext)) if ext.len() < 16 => {
                let keep = MAX_FILE_NAME_LEN - ext.len() - 1;
                format!("{}.{}", &stem[..keep.min(stem.len())], ext)
            }
            _ => trimmed[..MAX_FILE_NAME_LEN].to_owned(),
        }
    } else {
        trimmed.to_owned()
    };
    if capped.is_empty() || capped.chars().all(|c| c == '_') {
        FALLBACK_STEM.to_owned()
    } else {
        capped
    }
}

/// `<sanitized stem of input_name>.<format>`, used both on disk and as the
/// download name.
pub fn output_file_name(input_name: &str, format: &str) -> String {
    let sanitized = sanitize_filename(input_name);
    let stem = Path::new(&sanitized)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or(FALLBACK_STEM);
    format!("{stem}.{format}")
}

/// Job ids come from URLs; only `[A-Za-z0-9-]` may reach a path.
pub fn validate_job_id(id: &str) -> Result<(), ToolError> {
    let valid = !id.is_empty()
        && id.len() <= 64
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ToolError::InvalidJobId(id.to_owned()))
    }
}
