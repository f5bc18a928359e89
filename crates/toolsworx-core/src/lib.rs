//! Conversion engine behind the ToolsWorx server: format planning, per-job
//! staging directories, tool admission, and the converters that drive
//! ffmpeg, LibreOffice and the `image` crate.

pub mod error;
pub mod formats;
pub mod runtime;
pub mod services;
pub mod staging;
pub mod types;

pub use error::ToolError;
pub use formats::{mime_type, normalize_format, plan, Plan};
pub use runtime::admission::{Permit, ResourceManager};
pub use runtime::progress::{progress_channel, ProgressReporter, ProgressWatcher};
pub use services::{validate, Converter, Toolbox, ToolboxConfig};
pub use staging::{JobDir, Workspace};
pub use types::{ConversionOptions, ImageFilter, JobKind, JobSpec, JobStatus, Tool};
