//! Format catalogue and job planning.
//!
//! Every format that can reach a command line goes through
//! [`normalize_format`] first, so only allowlisted extensions are ever passed
//! to an external tool.

use std::path::Path;

use crate::error::ToolError;
use crate::types::{ImageFilter, JobKind, Tool};

/// Broad grouping used to decide which tool handles a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatFamily {
    Audio,
    Video,
    Image,
    Document,
    Spreadsheet,
    Presentation,
}

pub const AUDIO_FORMATS: &[&str] = &["mp3", "wav", "flac", "ogg", "opus", "aac", "m4a", "wma"];
pub const VIDEO_FORMATS: &[&str] = &["mp4", "webm", "mkv", "mov", "avi", "m4v", "flv", "wmv"];
pub const IMAGE_FORMATS: &[&str] = &["png", "jpg", "gif", "bmp", "tiff", "webp", "ico"];
pub const DOCUMENT_FORMATS: &[&str] = &["pdf", "docx", "doc", "odt", "rtf", "txt", "html"];
pub const SPREADSHEET_FORMATS: &[&str] = &["xlsx", "xls", "ods", "csv"];
pub const PRESENTATION_FORMATS: &[&str] = &["pptx", "ppt", "odp"];

/// Formats ffmpeg may only read; they are never offered as targets.
const INPUT_ONLY_FORMATS: &[&str] = &["wma", "wmv", "flv"];

/// Lowercase, strip a leading dot and fold common aliases.
///
/// Returns `UnsupportedFormat` for anything outside the catalogue.
pub fn normalize_format(raw: &str) -> Result<String, ToolError> {
    let trimmed = raw.trim().trim_start_matches('.').to_ascii_lowercase();
    let folded = match trimmed.as_str() {
        "jpeg" | "jpe" => "jpg",
        "tif" => "tiff",
        "htm" => "html",
        "oga" => "ogg",
        "text" => "txt",
        other => other,
    };
    if family_of(folded).is_some() {
        Ok(folded.to_owned())
    } else {
        Err(ToolError::UnsupportedFormat {
            format: raw.trim().to_owned(),
        })
    }
}

/// Family of an already-normalized format.
pub fn family_of(format: &str) -> Option<FormatFamily> {
    let families: [(&[&str], FormatFamily); 6] = [
        (AUDIO_FORMATS, FormatFamily::Audio),
        (VIDEO_FORMATS, FormatFamily::Video),
        (IMAGE_FORMATS, FormatFamily::Image),
        (DOCUMENT_FORMATS, FormatFamily::Document),
        (SPREADSHEET_FORMATS, FormatFamily::Spreadsheet),
        (PRESENTATION_FORMATS, FormatFamily::Presentation),
    ];
    families
        .iter()
        .find(|(formats, _)| formats.contains(&format))
        .map(|(_, family)| *family)
}

/// Normalized format of a file name, taken from its extension.
pub fn format_of_file(name: &str) -> Result<String, ToolError> {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| ToolError::UnsupportedFormat {
            format: name.to_owned(),
        })?;
    normalize_format(ext)
}

/// `Content-Type` for a normalized format.
pub fn mime_type(format: &str) -> &'static str {
    match format {
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "ogg" => "audio/ogg",
        "opus" => "audio/opus",
        "aac" => "audio/aac",
        "m4a" => "audio/mp4",
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "png" => "image/png",
        "jpg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "tiff" => "image/tiff",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "doc" => "application/msword",
        "odt" => "application/vnd.oasis.opendocument.text",
        "rtf" => "application/rtf",
        "txt" => "text/plain; charset=utf-8",
        "html" => "text/html; charset=utf-8",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "xls" => "application/vnd.ms-excel",
        "ods" => "application/vnd.oasis.opendocument.spreadsheet",
        "csv" => "text/csv; charset=utf-8",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "ppt" => "application/vnd.ms-powerpoint",
        "odp" => "application/vnd.oasis.opendocument.presentation",
        _ => "application/octet-stream",
    }
}

/// Outcome of [`plan`]: which tool runs the job and what it produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub tool: Tool,
    pub target_format: String,
}

/// Decide which tool converts `input_name` for a job of `kind`.
///
/// `target` is the requested output format; filter jobs may omit it to keep
/// the input's format.
pub fn plan(
    kind: JobKind,
    input_name: &str,
    target: Option<&str>,
    filter: Option<ImageFilter>,
) -> Result<Plan, ToolError> {
    match kind {
        JobKind::Filter => plan_filter(input_name, target, filter),
        JobKind::Media => {
            let target = require_target(target)?;
            let input = format_of_file(input_name).ok();
            if let Some(input) = &input {
                if !matches!(
                    family_of(input),
                    Some(FormatFamily::Audio | FormatFamily::Video)
                ) {
                    return Err(incompatible(input, &target));
                }
            }
            match family_of(&target) {
                Some(FormatFamily::Audio | FormatFamily::Video) => {}
                Some(FormatFamily::Image) if target == "gif" => {}
                _ => return Err(incompatible(input.as_deref().unwrap_or("media"), &target)),
            }
            Ok(Plan {
                tool: Tool::Ffmpeg,
                target_format: target,
            })
        }
        JobKind::File => {
            let target = require_target(target)?;
            let input = format_of_file(input_name)?;
            let tool = file_tool(&input, &target)?;
            Ok(Plan {
                tool,
                target_format: target,
            })
        }
    }
}

fn plan_filter(
    input_name: &str,
    target: Option<&str>,
    filter: Option<ImageFilter>,
) -> Result<Plan, ToolError> {
    if filter.is_none() {
        return Err(ToolError::InvalidOption {
            name: "filter",
            reason: "a filter is required".into(),
        });
    }
    let input = format_of_file(input_name)?;
    if family_of(&input) != Some(FormatFamily::Image) {
        return Err(ToolError::IncompatibleFormats {
            from: input,
            to: "image filter".into(),
        });
    }
    let target_format = match target {
        Some(t) if !t.trim().is_empty() => normalize_format(t)?,
        _ => input.clone(),
    };
    if family_of(&target_format) != Some(FormatFamily::Image) {
        return Err(incompatible(&input, &target_format));
    }
    Ok(Plan {
        tool: Tool::Image,
        target_format,
    })
}

fn file_tool(input: &str, target: &str) -> Result<Tool, ToolError> {
    use FormatFamily::*;

    let (Some(from), Some(to)) = (family_of(input), family_of(target)) else {
        return Err(incompatible(input, target));
    };
    let tool = match (from, to) {
        (Image, Image) => Tool::Image,
        (Audio | Video, Audio | Video) => Tool::Ffmpeg,
        (Video, Image) if target == "gif" => Tool::Ffmpeg,
        (Document | Spreadsheet | Presentation | Image, Document) if target == "pdf" => {
            Tool::LibreOffice
        }
        (Document, Document) => Tool::LibreOffice,
        (Spreadsheet, Spreadsheet) => Tool::LibreOffice,
        (Presentation, Presentation) => Tool::LibreOffice,
        _ => return Err(incompatible(input, target)),
    };
    Ok(tool)
}

fn require_target(target: Option<&str>) -> Result<String, ToolError> {
    let raw = target
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(ToolError::InvalidOption {
            name: "format",
            reason: "a target format is required".into(),
        })?;
    let format = normalize_format(raw)?;
    if INPUT_ONLY_FORMATS.contains(&format.as_str()) {
        return Err(ToolError::UnsupportedFormat { format });
    }
    Ok(format)
}

fn incompatible(from: &str, to: &str) -> ToolError {
    ToolError::IncompatibleFormats {
        from: from.to_owned(),
        to: to.to_owned(),
    }
}
