//! Office document conversion through headless LibreOffice.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::ToolError;
use crate::runtime::progress::ProgressReporter;
use crate::services::process::run_tool;
use crate::services::Converter;
use crate::types::{JobSpec, Tool};

#[derive(Debug, Clone)]
pub struct LibreOfficeConverter {
    binary: PathBuf,
    timeout: Duration,
}

impl LibreOfficeConverter {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Converter for LibreOfficeConverter {
    fn tool(&self) -> Tool {
        Tool::LibreOffice
    }

    async fn run(&self, job: &JobSpec, progress: &ProgressReporter) -> Result<(), ToolError> {
        let job_root = job_root(job)?;
        // soffice refuses to run twice against one user profile, so every job
        // gets its own.
        let profile = job_root.join("lo-profile");
        let scratch = job_root.join("lo-out");
        tokio::fs::create_dir_all(&scratch).await?;

        let mut command = Command::new(&self.binary);
        command
            .arg("--headless")
            .arg("--norestore")
            .arg("--nolockcheck")
            .arg(format!("-env:UserInstallation={}", file_url(&profile)))
            .arg("--convert-to")
            .arg(convert_filter(&job.target_format))
            .arg("--outdir")
            .arg(&scratch)
            .arg(&job.input);

        progress.report(10.0);
        run_tool(Tool::LibreOffice, command, self.timeout, |_, line| {
            debug!(job_id = %job.id, line, "soffice");
        })
        .await?;

        let produced = scratch.join(produced_name(&job.input, &job.target_format));
        if !tokio::fs::try_exists(&produced).await? {
            return Err(ToolError::MissingOutput {
                tool: Tool::LibreOffice,
            });
        }
        tokio::fs::rename(&produced, &job.output).await?;

        // Profiles are tens of megabytes; drop them with the scratch dir.
        let _ = tokio::fs::remove_dir_all(&scratch).await;
        let _ = tokio::fs::remove_dir_all(&profile).await;

        progress.finish();
        info!(job_id = %job.id, output = %job.output.display(), "document converted");
        Ok(())
    }
}

/// `--convert-to` argument for a normalized target format.
pub fn convert_filter(format: &str) -> String {
    match format {
        "txt" => "txt:Text (encoded):UTF8".to_owned(),
        "csv" => "csv:Text - txt - csv (StarCalc):44,34,76".to_owned(),
        other => other.to_owned(),
    }
}

/// File soffice writes for `input`: the input's stem with the target extension.
fn produced_name(input: &Path, format: &str) -> String {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("upload");
    format!("{stem}.{format}")
}

/// `<job>/output/<file>` → `<job>`.
fn job_root(job: &JobSpec) -> Result<PathBuf, ToolError> {
    job.output
        .parent()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .ok_or_else(|| {
            ToolError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "output path has no job directory",
            ))
        })
}

fn file_url(path: &Path) -> String {
    let raw = path.to_string_lossy().replace('\\', "/");
    if raw.starts_with('/') {
        format!("file://{raw}")
    } else {
        format!("file:///{raw}")
    }
}
