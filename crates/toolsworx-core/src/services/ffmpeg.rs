//! FFmpeg-backed audio/video conversion.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::ToolError;
use crate::formats::{family_of, FormatFamily};
use crate::runtime::progress::ProgressReporter;
use crate::services::process::{run_tool, Stream};
use crate::services::Converter;
use crate::types::{ConversionOptions, JobSpec, Tool};

const MAX_DIMENSION: u32 = 8192;
const ALLOWED_SAMPLE_RATES: &[u32] = &[8000, 11025, 16000, 22050, 32000, 44100, 48000, 96000];

#[derive(Debug, Clone)]
pub struct FfmpegConverter {
    binary: PathBuf,
    timeout: Duration,
}

impl FfmpegConverter {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Converter for FfmpegConverter {
    fn tool(&self) -> Tool {
        Tool::Ffmpeg
    }

    async fn run(&self, job: &JobSpec, progress: &ProgressReporter) -> Result<(), ToolError> {
        let args = build_args(job)?;
        let mut command = Command::new(&self.binary);
        command.args(&args);

        let mut tracker = ProgressTracker::for_options(&job.options);
        run_tool(Tool::Ffmpeg, command, self.timeout, |stream, line| {
            if let Some(percent) = tracker.observe(stream, line) {
                progress.report(percent);
            }
        })
        .await?;

        progress.finish();
        info!(
            job_id = %job.id,
            output = %job.output.display(),
            "ffmpeg conversion finished"
        );
        Ok(())
    }
}

/// Build the ffmpeg argv for `job`.
///
/// The target format has already been normalized against the catalogue and
/// every option is range-checked here, so nothing from the request reaches the
/// command line unvalidated.
pub fn build_args(job: &JobSpec) -> Result<Vec<String>, ToolError> {
    let options = &job.options;
    let format = job.target_format.as_str();
    let family = family_of(format).ok_or_else(|| ToolError::UnsupportedFormat {
        format: format.to_owned(),
    })?;

    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-nostdin".into(),
        "-y".into(),
        "-i".into(),
        job.input.to_string_lossy().into_owned(),
    ];

    if let Some(start) = options.start_secs {
        args.push("-ss".into());
        args.push(seconds_arg("start", start)?);
    }
    if let Some(duration) = options.duration_secs {
        if duration <= 0.0 {
            return Err(invalid("duration", "must be greater than zero"));
        }
        args.push("-t".into());
        args.push(seconds_arg("duration", duration)?);
    }

    match family {
        FormatFamily::Audio => push_audio_args(&mut args, format, options)?,
        FormatFamily::Video => push_video_args(&mut args, format, options)?,
        FormatFamily::Image if format == "gif" => push_gif_args(&mut args, options)?,
        _ => {
            return Err(ToolError::IncompatibleFormats {
                from: "media".into(),
                to: format.to_owned(),
            });
        }
    }

    args.extend(["-progress".into(), "pipe:1".into(), "-nostats".into()]);
    args.push(job.output.to_string_lossy().into_owned());

    debug!(job_id = %job.id, ?args, "ffmpeg arguments");
    Ok(args)
}

fn push_audio_args(
    args: &mut Vec<String>,
    format: &str,
    options: &ConversionOptions,
) -> Result<(), ToolError> {
    let codec = match format {
        "mp3" => "libmp3lame",
        "wav" => "pcm_s16le",
        "flac" => "flac",
        "ogg" => "libvorbis",
        "opus" => "libopus",
        "aac" | "m4a" => "aac",
        other => {
            return Err(ToolError::UnsupportedFormat {
                format: other.to_owned(),
            });
        }
    };
    args.extend(["-vn".into(), "-c:a".into(), codec.into()]);

    let lossless = matches!(format, "wav" | "flac");
    if let Some(kbps) = options.audio_bitrate_kbps {
        if lossless {
            return Err(invalid("audioBitrateKbps", "not applicable to lossless formats"));
        }
        args.extend(["-b:a".into(), audio_bitrate(kbps)?]);
    }
    push_audio_stream_args(args, options)
}

fn push_video_args(
    args: &mut Vec<String>,
    format: &str,
    options: &ConversionOptions,
) -> Result<(), ToolError> {
    let (video_codec, audio_codec, crf_range) = match format {
        "mp4" | "m4v" | "mov" | "mkv" => ("libx264", "aac", Some((18u32, 51u32))),
        "webm" => ("libvpx-vp9", "libopus", Some((15, 63))),
        "avi" => ("mpeg4", "libmp3lame", None),
        other => {
            return Err(ToolError::UnsupportedFormat {
                format: other.to_owned(),
            });
        }
    };
    args.extend(["-c:v".into(), video_codec.into()]);
    if video_codec == "libx264" {
        args.extend(["-pix_fmt".into(), "yuv420p".into()]);
    }

    if let Some(quality) = options.quality {
        let quality = quality_value(quality)?;
        match crf_range {
            Some((best, worst)) => {
                let crf = best + (worst - best) * (100 - quality) / 100;
                args.extend(["-crf".into(), crf.to_string()]);
                if video_codec == "libvpx-vp9" {
                    // vp9 only honours -crf in constant-quality mode.
                    args.extend(["-b:v".into(), "0".into()]);
                }
            }
            None => {
                // mpeg4 q scale: 2 (best) ..= 31 (worst).
                let q = 2 + 29 * (100 - quality) / 100;
                args.extend(["-q:v".into(), q.to_string()]);
            }
        }
    }
    if let Some(kbps) = options.video_bitrate_kbps {
        if !(100..=50_000).contains(&kbps) {
            return Err(invalid("videoBitrateKbps", "must be between 100 and 50000"));
        }
        if options.quality.is_some() && video_codec == "libvpx-vp9" {
            return Err(invalid("videoBitrateKbps", "cannot be combined with quality for webm"));
        }
        args.extend(["-b:v".into(), format!("{kbps}k")]);
    }

    if let Some(filter) = scale_filter(options)? {
        args.extend(["-vf".into(), filter]);
    }
    if let Some(fps) = options.fps {
        args.extend(["-r".into(), fps_value(fps)?.to_string()]);
    }

    args.extend(["-c:a".into(), audio_codec.into()]);
    if let Some(kbps) = options.audio_bitrate_kbps {
        args.extend(["-b:a".into(), audio_bitrate(kbps)?]);
    }
    push_audio_stream_args(args, options)?;

    if matches!(format, "mp4" | "m4v" | "mov") {
        args.extend(["-movflags".into(), "+faststart".into()]);
    }
    Ok(())
}

fn push_gif_args(args: &mut Vec<String>, options: &ConversionOptions) -> Result<(), ToolError> {
    let fps = fps_value(options.fps.unwrap_or(10))?;
    let mut filter = format!("fps={fps}");
    if let Some(scale) = scale_filter(options)? {
        filter.push(',');
        filter.push_str(&scale);
    }
    args.extend(["-vf".into(), filter, "-an".into(), "-loop".into(), "0".into()]);
    Ok(())
}

fn push_audio_stream_args(
    args: &mut Vec<String>,
    options: &ConversionOptions,
) -> Result<(), ToolError> {
    if let Some(rate) = options.sample_rate {
        if !ALLOWED_SAMPLE_RATES.contains(&rate) {
            return Err(invalid("sampleRate", "unsupported sample rate"));
        }
        args.extend(["-ar".into(), rate.to_string()]);
    }
    if let Some(channels) = options.channels {
        if !(1..=2).contains(&channels) {
            return Err(invalid("channels", "must be 1 or 2"));
        }
        args.extend(["-ac".into(), channels.to_string()]);
    }
    Ok(())
}

/// `scale=W:H`, using `-2` for a missing side so ffmpeg keeps the aspect
/// ratio with an even dimension.
fn scale_filter(options: &ConversionOptions) -> Result<Option<String>, ToolError> {
    let width = options.width.map(|w| dimension("width", w)).transpose()?;
    let height = options.height.map(|h| dimension("height", h)).transpose()?;
    Ok(match (width, height) {
        (None, None) => None,
        (Some(w), None) => Some(format!("scale={w}:-2")),
        (None, Some(h)) => Some(format!("scale=-2:{h}")),
        (Some(w), Some(h)) => Some(format!("scale={w}:{h}")),
    })
}

fn dimension(name: &'static str, value: u32) -> Result<u32, ToolError> {
    if (1..=MAX_DIMENSION).contains(&value) {
        Ok(value)
    } else {
        Err(invalid(name, "must be between 1 and 8192"))
    }
}

fn fps_value(fps: u32) -> Result<u32, ToolError> {
    if (1..=120).contains(&fps) {
        Ok(fps)
    } else {
        Err(invalid("fps", "must be between 1 and 120"))
    }
}

fn quality_value(quality: u8) -> Result<u32, ToolError> {
    if (1..=100).contains(&quality) {
        Ok(u32::from(quality))
    } else {
        Err(invalid("quality", "must be between 1 and 100"))
    }
}

fn audio_bitrate(kbps: u32) -> Result<String, ToolError> {
    if (32..=512).contains(&kbps) {
        Ok(format!("{kbps}k"))
    } else {
        Err(invalid("audioBitrateKbps", "must be between 32 and 512"))
    }
}

fn seconds_arg(name: &'static str, secs: f64) -> Result<String, ToolError> {
    if (0.0..=86_400.0).contains(&secs) {
        Ok(format!("{secs:.3}"))
    } else {
        Err(invalid(name, "must be between 0 and 86400 seconds"))
    }
}

fn invalid(name: &'static str, reason: &str) -> ToolError {
    ToolError::InvalidOption {
        name,
        reason: reason.to_owned(),
    }
}

// ── Progress parsing ──────────────────────────────────────────────────────────

/// A line emitted by `-progress pipe:1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressEvent {
    /// Output timestamp reached, in seconds.
    OutTime(f64),
    End,
}

/// Turns ffmpeg's stderr banner and `-progress` key/value stream into a
/// percentage.
///
/// `out_time` counts output time, so the total is the input duration after
/// `-ss`, capped by `-t`.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    duration: Option<f64>,
    start: f64,
    limit: Option<f64>,
}

impl ProgressTracker {
    pub fn for_options(options: &ConversionOptions) -> Self {
        Self {
            duration: None,
            start: options.start_secs.filter(|s| s.is_finite()).unwrap_or(0.0).max(0.0),
            limit: options.duration_secs.filter(|d| d.is_finite() && *d > 0.0),
        }
    }

    /// Seconds of output the run will produce, once known.
    fn total(&self) -> Option<f64> {
        let remaining = self.duration.map(|d| (d - self.start).max(0.0));
        let total = match (remaining, self.limit) {
            (Some(remaining), Some(limit)) => remaining.min(limit),
            (Some(remaining), None) => remaining,
            (None, limit) => limit?,
        };
        (total > 0.0).then_some(total)
    }

    /// Feed one output line; returns a new percentage when one is known.
    ///
    /// Running progress is capped at 99 so that 100 means the process exited.
    pub fn observe(&mut self, stream: Stream, line: &str) -> Option<f64> {
        match stream {
            Stream::Stderr => {
                if self.duration.is_none() {
                    self.duration = parse_duration_line(line);
                }
                None
            }
            Stream::Stdout => match parse_progress_line(line)? {
                ProgressEvent::End => Some(100.0),
                ProgressEvent::OutTime(out) => {
                    let total = self.total()?;
                    Some((out / total * 100.0).min(99.0))
                }
            },
        }
    }
}

/// Parse `HH:MM:SS(.frac)` into seconds.
pub fn parse_timestamp(raw: &str) -> Option<f64> {
    let mut parts = raw.trim().splitn(3, ':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if hours < 0.0 || minutes < 0.0 || seconds < 0.0 {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Extract the input duration from ffmpeg's `  Duration: 00:01:02.50, start: ...`
/// banner line. `N/A` durations yield `None`.
pub fn parse_duration_line(line: &str) -> Option<f64> {
    let rest = line.trim_start().strip_prefix("Duration:")?;
    let value = rest.split(',').next()?.trim();
    parse_timestamp(value)
}

/// Parse one `key=value` line of `-progress` output.
///
/// `out_time_ms` is reported in microseconds by ffmpeg despite its name.
pub fn parse_progress_line(line: &str) -> Option<ProgressEvent> {
    let (key, value) = line.trim().split_once('=')?;
    match key {
        "out_time_us" | "out_time_ms" => {
            let micros: i64 = value.trim().parse().ok()?;
            Some(ProgressEvent::OutTime(micros.max(0) as f64 / 1_000_000.0))
        }
        "out_time" => parse_timestamp(value).map(ProgressEvent::OutTime),
        "progress" if value.trim() == "end" => Some(ProgressEvent::End),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobKind;

    fn job(target: &str, options: ConversionOptions) -> JobSpec {
        JobSpec {
            id: "job-1".into(),
            kind: JobKind::Media,
            tool: Tool::Ffmpeg,
            input: PathBuf::from("/work/job-1/input/in.mov"),
            output: PathBuf::from(format!("/work/job-1/output/in.{target}")),
            target_format: target.into(),
            filter: None,
            options,
        }
    }

    fn window<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn audio_target_drops_video_and_sets_bitrate() {
        let args = build_args(&job(
            "mp3",
            ConversionOptions {
                audio_bitrate_kbps: Some(192),
                sample_rate: Some(44100),
                channels: Some(2),
                ..Default::default()
            },
        ))
        .unwrap();

        assert!(args.contains(&"-vn".to_owned()));
        assert_eq!(window(&args, "-c:a"), Some("libmp3lame"));
        assert_eq!(window(&args, "-b:a"), Some("192k"));
        assert_eq!(window(&args, "-ar"), Some("44100"));
        assert_eq!(window(&args, "-ac"), Some("2"));
        assert_eq!(window(&args, "-progress"), Some("pipe:1"));
        assert_eq!(args.last().map(String::as_str), Some("/work/job-1/output/in.mp3"));
        assert_eq!(window(&args, "-i"), Some("/work/job-1/input/in.mov"));
    }

    #[test]
    fn lossless_audio_rejects_bitrate() {
        let err = build_args(&job(
            "flac",
            ConversionOptions {
                audio_bitrate_kbps: Some(320),
                ..Default::default()
            },
        ))
        .unwrap_err();
        assert!(matches!(err, ToolError::InvalidOption { name: "audioBitrateKbps", .. }));
    }

    #[test]
    fn mp4_maps_quality_to_crf_and_scales() {
        let args = build_args(&job(
            "mp4",
            ConversionOptions {
                quality: Some(100),
                width: Some(1280),
                fps: Some(30),
                ..Default::default()
            },
        ))
        .unwrap();

        assert_eq!(window(&args, "-c:v"), Some("libx264"));
        assert_eq!(window(&args, "-crf"), Some("18"));
        assert_eq!(window(&args, "-vf"), Some("scale=1280:-2"));
        assert_eq!(window(&args, "-r"), Some("30"));
        assert_eq!(window(&args, "-movflags"), Some("+faststart"));
    }

    #[test]
    fn webm_uses_constant_quality_mode() {
        let args = build_args(&job(
            "webm",
            ConversionOptions {
                quality: Some(1),
                ..Default::default()
            },
        ))
        .unwrap();
        assert_eq!(window(&args, "-c:v"), Some("libvpx-vp9"));
        assert_eq!(window(&args, "-crf"), Some("62"));
        assert_eq!(window(&args, "-b:v"), Some("0"));
        assert!(!args.contains(&"-movflags".to_owned()));
    }

    #[test]
    fn trimming_is_formatted_and_validated() {
        let args = build_args(&job(
            "wav",
            ConversionOptions {
                start_secs: Some(1.5),
                duration_secs: Some(10.0),
                ..Default::default()
            },
        ))
        .unwrap();
        assert_eq!(window(&args, "-ss"), Some("1.500"));
        assert_eq!(window(&args, "-t"), Some("10.000"));

        let err = build_args(&job(
            "wav",
            ConversionOptions {
                start_secs: Some(f64::INFINITY),
                ..Default::default()
            },
        ))
        .unwrap_err();
        assert!(matches!(err, ToolError::InvalidOption { name: "start", .. }));
    }

    #[test]
    fn out_of_range_options_are_rejected() {
        for options in [
            ConversionOptions { width: Some(0), ..Default::default() },
            ConversionOptions { fps: Some(500), ..Default::default() },
            ConversionOptions { quality: Some(0), ..Default::default() },
            ConversionOptions { sample_rate: Some(12345), ..Default::default() },
            ConversionOptions { channels: Some(6), ..Default::default() },
        ] {
            assert!(
                build_args(&job("mp4", options.clone())).is_err(),
                "{options:?} should be rejected"
            );
        }
    }

    #[test]
    fn gif_output_uses_palette_free_filter_chain() {
        let args = build_args(&job(
            "gif",
            ConversionOptions {
                height: Some(240),
                ..Default::default()
            },
        ))
        .unwrap();
        assert_eq!(window(&args, "-vf"), Some("fps=10,scale=-2:240"));
        assert!(args.contains(&"-an".to_owned()));
    }

    #[test]
    fn documents_are_not_ffmpeg_targets() {
        let err = build_args(&job("pdf", ConversionOptions::default())).unwrap_err();
        assert!(matches!(err, ToolError::IncompatibleFormats { .. }));
    }

    #[test]
    fn parses_timestamps_and_duration_banner() {
        assert_eq!(parse_timestamp("00:01:02.50"), Some(62.5));
        assert_eq!(parse_timestamp("01:00:00"), Some(3600.0));
        assert_eq!(parse_timestamp("garbage"), None);
        assert_eq!(
            parse_duration_line("  Duration: 00:00:10.00, start: 0.000000, bitrate: 128 kb/s"),
            Some(10.0)
        );
        assert_eq!(parse_duration_line("  Duration: N/A, bitrate: N/A"), None);
        assert_eq!(parse_duration_line("Stream #0:0: Audio: mp3"), None);
    }

    #[test]
    fn parses_progress_lines() {
        assert_eq!(parse_progress_line("out_time_us=2500000"), Some(ProgressEvent::OutTime(2.5)));
        assert_eq!(parse_progress_line("out_time_ms=-5"), Some(ProgressEvent::OutTime(0.0)));
        assert_eq!(
            parse_progress_line("out_time=00:00:01.000000"),
            Some(ProgressEvent::OutTime(1.0))
        );
        assert_eq!(parse_progress_line("progress=end"), Some(ProgressEvent::End));
        assert_eq!(parse_progress_line("progress=continue"), None);
        assert_eq!(parse_progress_line("bitrate=128.0kbits/s"), None);
        assert_eq!(parse_progress_line("out_time_us=N/A"), None);
    }

    #[test]
    fn tracker_needs_duration_before_reporting() {
        let mut tracker = ProgressTracker::for_options(&ConversionOptions::default());
        assert_eq!(tracker.observe(Stream::Stdout, "out_time_us=1000000"), None);

        tracker.observe(Stream::Stderr, "  Duration: 00:00:04.00, start: 0.0");
        assert_eq!(tracker.observe(Stream::Stdout, "out_time_us=1000000"), Some(25.0));
        assert_eq!(tracker.observe(Stream::Stdout, "out_time_us=9000000"), Some(99.0));
        assert_eq!(tracker.observe(Stream::Stdout, "progress=end"), Some(100.0));
    }

    #[test]
    fn tracker_measures_against_the_trimmed_window() {
        let mut tracker = ProgressTracker::for_options(&ConversionOptions {
            start_secs: Some(60.0),
            duration_secs: Some(10.0),
            ..Default::default()
        });
        tracker.observe(Stream::Stderr, "  Duration: 00:02:00.00, start: 0.0");
        assert_eq!(tracker.observe(Stream::Stdout, "out_time_us=5000000"), Some(50.0));

        // Trimming past the end leaves only the tail of the input.
        let mut tail = ProgressTracker::for_options(&ConversionOptions {
            start_secs: Some(110.0),
            duration_secs: Some(30.0),
            ..Default::default()
        });
        tail.observe(Stream::Stderr, "  Duration: 00:02:00.00, start: 0.0");
        assert_eq!(tail.observe(Stream::Stdout, "out_time_us=5000000"), Some(50.0));

        // Without a banner the requested duration is still a usable total.
        let mut blind = ProgressTracker::for_options(&ConversionOptions {
            duration_secs: Some(4.0),
            ..Default::default()
        });
        assert_eq!(blind.observe(Stream::Stdout, "out_time_us=1000000"), Some(25.0));
    }
}
