use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::error::ToolError;
use crate::runtime::progress::ProgressReporter;
use crate::services::Converter;
use crate::types::{JobSpec, Tool};

const STEPS: u32 = 10;

/// Stand-in for every external tool, used for demos and tests.
///
/// Waits `delay` while stepping progress, then copies the input verbatim to
/// the output path.
#[derive(Debug, Clone)]
pub struct MockConverter {
    delay: Duration,
}

impl MockConverter {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Converter for MockConverter {
    fn tool(&self) -> Tool {
        Tool::Mock
    }

    async fn run(&self, job: &JobSpec, progress: &ProgressReporter) -> Result<(), ToolError> {
        let step = self.delay / STEPS;
        for i in 1..STEPS {
            tokio::time::sleep(step).await;
            progress.report(f64::from(i * 100 / STEPS));
        }
        tokio::time::sleep(step).await;

        let bytes = tokio::fs::copy(&job.input, &job.output).await?;
        progress.finish();
        info!(job_id = %job.id, bytes, target = %job.target_format, "mock conversion finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::progress::progress_channel;
    use crate::types::{ConversionOptions, JobKind};

    fn job(dir: &std::path::Path) -> JobSpec {
        JobSpec {
            id: "mock-1".into(),
            kind: JobKind::Media,
            tool: Tool::Ffmpeg,
            input: dir.join("in.wav"),
            output: dir.join("in.mp3"),
            target_format: "mp3".into(),
            filter: None,
            options: ConversionOptions::default(),
        }
    }

    #[tokio::test]
    async fn copies_input_after_delay() {
        let tmp = tempfile::tempdir().unwrap();
        let job = job(tmp.path());
        std::fs::write(&job.input, b"RIFF....WAVE").unwrap();

        let (reporter, mut watcher) = progress_channel();
        let converter = MockConverter::new(Duration::from_millis(200));
        let run = tokio::spawn(async move {
            let result = converter.run(&job, &reporter).await;
            (result, job)
        });

        let first = watcher.changed().await.unwrap();
        assert!(first > 0, "got {first}");

        let (result, job) = run.await.unwrap();
        result.unwrap();
        assert_eq!(std::fs::read(&job.output).unwrap(), b"RIFF....WAVE");
        assert_eq!(watcher.latest(), 100);
    }

    #[tokio::test]
    async fn missing_input_is_an_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = MockConverter::new(Duration::ZERO)
            .run(&job(tmp.path()), &ProgressReporter::noop())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Io(_)));
    }
}
