use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Public tool family a job was submitted through.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobKind {
    /// Generic file conversion (`/api/convert`).
    File,
    /// Audio/video conversion (`/api/media/convert`).
    Media,
    /// Image filter application (`/api/filter/apply`).
    Filter,
}

/// Lifecycle of a conversion job.
///
/// `Queued → Processing → Completed | Failed`, with `Cancelled` reachable from
/// either non-terminal state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Returns `true` once the job can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Backend that executes a job.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Tool {
    Ffmpeg,
    LibreOffice,
    Image,
    Mock,
}

/// Pixel filters offered by `/api/filter/apply`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum ImageFilter {
    Grayscale,
    Invert,
    /// Gaussian blur; intensity is the sigma (default 2.0).
    Blur,
    /// Unsharp mask; intensity is the sigma (default 1.5).
    Sharpen,
    /// Intensity is the amount added to each channel (default 30).
    Brighten,
    /// Intensity is the amount removed from each channel (default 30).
    Darken,
    /// Intensity is the contrast percentage change (default 20).
    Contrast,
    /// Intensity is the blend factor 0..=1 (default 1.0).
    Sepia,
    /// Intensity is the rotation in degrees (default 90).
    HueRotate,
    FlipHorizontal,
    FlipVertical,
    #[strum(serialize = "rotate-90")]
    #[serde(rename = "rotate-90")]
    Rotate90,
    #[strum(serialize = "rotate-180")]
    #[serde(rename = "rotate-180")]
    Rotate180,
    #[strum(serialize = "rotate-270")]
    #[serde(rename = "rotate-270")]
    Rotate270,
}

/// Tuning knobs accepted by the conversion endpoints.
///
/// Every field is optional; converters ignore the ones that do not apply to
/// their tool. Values are range-checked before they reach a command line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_bitrate_kbps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_bitrate_kbps: Option<u32>,
    /// 1 (smallest) ..= 100 (best).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intensity: Option<f32>,
}

/// A fully planned job, ready to hand to a [`crate::Converter`].
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub id: String,
    pub kind: JobKind,
    pub tool: Tool,
    pub input: PathBuf,
    pub output: PathBuf,
    /// Normalized output format (file extension without the dot).
    pub target_format: String,
    pub filter: Option<ImageFilter>,
    pub options: ConversionOptions,
}
