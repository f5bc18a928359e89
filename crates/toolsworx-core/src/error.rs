use thiserror::Error;

use crate::types::Tool;

/// Errors produced while planning or executing a conversion.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The requested (or detected) format is not in the catalogue.
    #[error("unsupported format '{format}'")]
    UnsupportedFormat { format: String },

    /// Both formats are known but no tool converts one into the other.
    #[error("cannot convert {from} to {to}")]
    IncompatibleFormats { from: String, to: String },

    /// A conversion option is out of range or does not apply.
    #[error("invalid option '{name}': {reason}")]
    InvalidOption { name: &'static str, reason: String },

    /// The filter endpoint was called without a (known) filter.
    #[error("unknown filter '{0}'")]
    UnknownFilter(String),

    /// The job id contains characters that could escape the work directory.
    #[error("invalid job id '{0}'")]
    InvalidJobId(String),

    /// The external binary could not be started.
    #[error("{tool} is not available: {source}")]
    ToolUnavailable {
        tool: Tool,
        #[source]
        source: std::io::Error,
    },

    /// The external binary exited with a non-zero status.
    #[error("{tool} exited with status {}: {stderr}", exit_label(.code))]
    ProcessFailed {
        tool: Tool,
        code: Option<i32>,
        stderr: String,
    },

    /// The external binary ran longer than the configured limit.
    #[error("{tool} timed out after {secs}s")]
    Timeout { tool: Tool, secs: u64 },

    /// The tool reported success but left no usable output behind.
    #[error("{tool} produced no output")]
    MissingOutput { tool: Tool },

    /// Every admission slot for the tool is taken.
    #[error("{tool} is busy")]
    Busy { tool: Tool },

    /// No converter is registered for the tool.
    #[error("no converter registered for {tool}")]
    NotRegistered { tool: Tool },

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

fn exit_label(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "signal".to_owned())
}

impl ToolError {
    /// Returns `true` when the caller sent something we can never convert, as
    /// opposed to a failure on our side.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ToolError::UnsupportedFormat { .. }
                | ToolError::IncompatibleFormats { .. }
                | ToolError::InvalidOption { .. }
                | ToolError::UnknownFilter(_)
                | ToolError::InvalidJobId(_)
        )
    }
}
