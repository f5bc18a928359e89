pub mod ffmpeg;
pub mod image;
pub mod libreoffice;
pub mod mock;
pub mod process;

use std::collections::HashMap;
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use strum::IntoEnumIterator;
use tracing::info;

use crate::error::ToolError;
use crate::runtime::progress::ProgressReporter;
use crate::types::{JobSpec, Tool};

pub use self::ffmpeg::FfmpegConverter;
pub use self::image::ImageConverter;
pub use self::libreoffice::LibreOfficeConverter;
pub use self::mock::MockConverter;

const DEFAULT_FFMPEG: &str = "ffmpeg";
const DEFAULT_SOFFICE: &str = "soffice";

/// Executes a planned job.
///
/// Implementations read `job.input`, write `job.output` and report progress as
/// they go. Dropping the returned future must stop the work (external
/// processes are spawned with `kill_on_drop`).
#[async_trait]
pub trait Converter: Send + Sync + Debug {
    fn tool(&self) -> Tool;

    async fn run(&self, job: &JobSpec, progress: &ProgressReporter) -> Result<(), ToolError>;
}

/// Reject options `job.tool` would refuse, without running anything.
///
/// Uses the same checks the converters apply, so a job that passes here only
/// fails later on its input, never on its options. Dispatches on the planned
/// tool, so mock mode validates like the real tools.
pub fn validate(job: &JobSpec) -> Result<(), ToolError> {
    match job.tool {
        Tool::Ffmpeg => ffmpeg::build_args(job).map(drop),
        Tool::Image => self::image::validate(job),
        Tool::LibreOffice | Tool::Mock => Ok(()),
    }
}

#[derive(Debug, Clone)]
pub struct ToolboxConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub libreoffice_path: Option<PathBuf>,
    /// Wall-clock limit for one external process.
    pub timeout: Duration,
    /// When set, every tool is replaced by [`MockConverter`] with this delay.
    pub mock_delay: Option<Duration>,
}

impl Default for ToolboxConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            libreoffice_path: None,
            timeout: Duration::from_secs(600),
            mock_delay: None,
        }
    }
}

/// Converter registry keyed by [`Tool`].
#[derive(Debug, Clone)]
pub struct Toolbox {
    converters: HashMap<Tool, Arc<dyn Converter>>,
    mock: bool,
}

impl Toolbox {
    pub fn new(config: ToolboxConfig) -> Self {
        let converters: HashMap<Tool, Arc<dyn Converter>> = match config.mock_delay {
            Some(delay) => {
                let mock: Arc<dyn Converter> = Arc::new(MockConverter::new(delay));
                Tool::iter().map(|tool| (tool, Arc::clone(&mock))).collect()
            }
            None => {
                let ffmpeg = config
                    .ffmpeg_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_FFMPEG));
                let soffice = config
                    .libreoffice_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_SOFFICE));
                let ffmpeg: Arc<dyn Converter> =
                    Arc::new(FfmpegConverter::new(ffmpeg, config.timeout));
                let soffice: Arc<dyn Converter> =
                    Arc::new(LibreOfficeConverter::new(soffice, config.timeout));
                let image: Arc<dyn Converter> = Arc::new(ImageConverter);
                let mock: Arc<dyn Converter> = Arc::new(MockConverter::new(Duration::ZERO));
                HashMap::from([
                    (Tool::Ffmpeg, ffmpeg),
                    (Tool::LibreOffice, soffice),
                    (Tool::Image, image),
                    (Tool::Mock, mock),
                ])
            }
        };

        let mock = config.mock_delay.is_some();
        info!(mock, tools = converters.len(), "toolbox ready");
        Self { converters, mock }
    }

    /// Converter responsible for `tool`.
    pub fn converter(&self, tool: Tool) -> Result<Arc<dyn Converter>, ToolError> {
        self.converters
            .get(&tool)
            .cloned()
            .ok_or(ToolError::NotRegistered { tool })
    }

    pub fn is_mock(&self) -> bool {
        self.mock
    }
}
