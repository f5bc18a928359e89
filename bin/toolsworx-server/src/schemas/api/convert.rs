use serde::{Deserialize, Serialize};
use toolsworx_core::ConversionOptions;
use tracing::debug;
use utoipa::ToSchema;
use validator::Validate;

use crate::error::ServerError;

/// Text fields of a conversion upload, collected from the multipart form.
#[derive(Debug, Clone, Default, Validate)]
pub struct ConversionForm {
    #[validate(length(min = 1, max = 16))]
    pub format: Option<String>,
    #[validate(length(min = 1, max = 32))]
    pub filter: Option<String>,
    #[validate(range(min = 32, max = 512))]
    pub audio_bitrate_kbps: Option<u32>,
    #[validate(range(min = 100, max = 50_000))]
    pub video_bitrate_kbps: Option<u32>,
    #[validate(range(min = 1, max = 100))]
    pub quality: Option<u8>,
    #[validate(range(min = 1, max = 8192))]
    pub width: Option<u32>,
    #[validate(range(min = 1, max = 8192))]
    pub height: Option<u32>,
    #[validate(range(min = 1, max = 120))]
    pub fps: Option<u32>,
    #[validate(range(min = 0.0, max = 86_400.0))]
    pub start_secs: Option<f64>,
    #[validate(range(exclusive_min = 0.0, max = 86_400.0))]
    pub duration_secs: Option<f64>,
    #[validate(range(min = 8_000, max = 96_000))]
    pub sample_rate: Option<u32>,
    #[validate(range(min = 1, max = 2))]
    pub channels: Option<u8>,
    #[validate(range(min = -360.0, max = 360.0))]
    pub intensity: Option<f32>,
}

impl ConversionForm {
    /// Record one multipart text field. Unknown field names are ignored so
    /// older clients sending extra fields keep working.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), ServerError> {
        let value = value.trim();
        if value.is_empty() {
            return Ok(());
        }
        match name {
            "format" | "targetFormat" | "outputFormat" => self.format = Some(value.to_owned()),
            "filter" => self.filter = Some(value.to_owned()),
            "audioBitrateKbps" | "audioBitrate" | "bitrate" => {
                self.audio_bitrate_kbps = Some(number(name, value.trim_end_matches(['k', 'K']))?)
            }
            "videoBitrateKbps" | "videoBitrate" => {
                self.video_bitrate_kbps = Some(number(name, value.trim_end_matches(['k', 'K']))?)
            }
            "quality" => self.quality = Some(number(name, value)?),
            "width" => self.width = Some(number(name, value)?),
            "height" => self.height = Some(number(name, value)?),
            "fps" | "frameRate" => self.fps = Some(number(name, value)?),
            "startSecs" | "start" => self.start_secs = Some(number(name, value)?),
            "durationSecs" | "duration" => self.duration_secs = Some(number(name, value)?),
            "sampleRate" => self.sample_rate = Some(number(name, value)?),
            "channels" => self.channels = Some(number(name, value)?),
            "intensity" => self.intensity = Some(number(name, value)?),
            other => debug!(field = other, "ignoring unknown form field"),
        }
        Ok(())
    }

    /// Validate the numeric ranges and build the engine's option set.
    pub fn to_options(&self) -> Result<ConversionOptions, ServerError> {
        self.validate()
            .map_err(|e| ServerError::BadRequest(format!("invalid options: {e}")))?;
        Ok(ConversionOptions {
            audio_bitrate_kbps: self.audio_bitrate_kbps,
            video_bitrate_kbps: self.video_bitrate_kbps,
            quality: self.quality,
            width: self.width,
            height: self.height,
            fps: self.fps,
            start_secs: self.start_secs,
            duration_secs: self.duration_secs,
            sample_rate: self.sample_rate,
            channels: self.channels,
            intensity: self.intensity,
        })
    }
}

fn number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ServerError> {
    value
        .parse()
        .map_err(|_| ServerError::BadRequest(format!("field '{name}' must be a number, got '{value}'")))
}

/// Returned by every submit endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub success: bool,
    pub job_id: String,
    pub status_url: String,
    pub download_url: String,
}

/// Documentation-only shape of the multipart upload.
#[allow(dead_code)]
#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConvertUpload {
    /// The file to convert.
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
    /// Target format, e.g. `mp3`, `pdf`, `webp`. `targetFormat` is accepted too.
    pub format: Option<String>,
    /// Image filter name (`/api/filter/apply` only), e.g. `grayscale`, `rotate-90`.
    pub filter: Option<String>,
    pub audio_bitrate_kbps: Option<u32>,
    pub video_bitrate_kbps: Option<u32>,
    /// 1 (smallest) to 100 (best).
    pub quality: Option<u8>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
    pub start_secs: Option<f64>,
    pub duration_secs: Option<f64>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
    /// Filter strength; meaning depends on the filter.
    pub intensity: Option<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_aliases_and_numbers() {
        let mut form = ConversionForm::default();
        form.set("targetFormat", "MP3").unwrap();
        form.set("bitrate", "192k").unwrap();
        form.set("channels", "1").unwrap();
        form.set("utm_source", "newsletter").unwrap();

        let options = form.to_options().unwrap();
        assert_eq!(form.format.as_deref(), Some("MP3"));
        assert_eq!(options.audio_bitrate_kbps, Some(192));
        assert_eq!(options.channels, Some(1));
    }

    #[test]
    fn non_numeric_values_are_bad_requests() {
        let mut form = ConversionForm::default();
        let err = form.set("quality", "high").unwrap_err();
        assert!(matches!(err, ServerError::BadRequest(m) if m.contains("quality")));
    }

    #[test]
    fn ranges_are_validated() {
        let mut form = ConversionForm::default();
        form.set("quality", "0").unwrap();
        assert!(matches!(form.to_options(), Err(ServerError::BadRequest(_))));

        let mut form = ConversionForm::default();
        form.set("duration", "0").unwrap();
        assert!(form.to_options().is_err());

        let mut form = ConversionForm::default();
        form.set("width", "640").unwrap();
        form.set("start", "2.5").unwrap();
        assert!(form.to_options().is_ok());
    }
}
