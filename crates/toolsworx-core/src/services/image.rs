//! Raster conversion and filters, done in-process with the `image` crate.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use async_trait::async_trait;
use ::image::codecs::jpeg::JpegEncoder;
use ::image::imageops::FilterType;
use ::image::{DynamicImage, ImageFormat, ImageReader, Rgba, RgbaImage};
use tracing::info;

use crate::error::ToolError;
use crate::runtime::progress::ProgressReporter;
use crate::services::Converter;
use crate::types::{ConversionOptions, ImageFilter, JobSpec, Tool};

const DEFAULT_JPEG_QUALITY: u8 = 85;
const MAX_DIMENSION: u32 = 8192;
const MAX_ICO_SIDE: u32 = 256;

#[derive(Debug, Clone, Copy, Default)]
pub struct ImageConverter;

#[async_trait]
impl Converter for ImageConverter {
    fn tool(&self) -> Tool {
        Tool::Image
    }

    async fn run(&self, job: &JobSpec, progress: &ProgressReporter) -> Result<(), ToolError> {
        let input = job.input.clone();
        let img = tokio::task::spawn_blocking(move || decode(&input)).await??;
        progress.report(30.0);

        let options = job.options.clone();
        let filter = job.filter;
        let img = tokio::task::spawn_blocking(move || -> Result<DynamicImage, ToolError> {
            let img = resize(img, &options)?;
            match filter {
                Some(filter) => apply_filter(img, filter, options.intensity),
                None => Ok(img),
            }
        })
        .await??;
        progress.report(70.0);

        let output = job.output.clone();
        let format = job.target_format.clone();
        let quality = job.options.quality;
        let (width, height) = (img.width(), img.height());
        tokio::task::spawn_blocking(move || encode(img, &output, &format, quality)).await??;

        progress.finish();
        info!(
            job_id = %job.id,
            filter = ?job.filter,
            width,
            height,
            format = %job.target_format,
            "image written"
        );
        Ok(())
    }
}

/// Check every option an image job will use, before any pixel is touched.
pub fn validate(job: &JobSpec) -> Result<(), ToolError> {
    check_dimensions(&job.options)?;
    if let Some(filter) = job.filter {
        filter_strength(filter, job.options.intensity)?;
    }
    if ImageFormat::from_extension(&job.target_format) == Some(ImageFormat::Jpeg) {
        jpeg_quality(job.options.quality)?;
    }
    Ok(())
}

fn check_dimensions(options: &ConversionOptions) -> Result<(), ToolError> {
    for (name, value) in [("width", options.width), ("height", options.height)] {
        if let Some(value) = value {
            if !(1..=MAX_DIMENSION).contains(&value) {
                return Err(ToolError::InvalidOption {
                    name,
                    reason: format!("must be between 1 and {MAX_DIMENSION}"),
                });
            }
        }
    }
    Ok(())
}

fn jpeg_quality(quality: Option<u8>) -> Result<u8, ToolError> {
    let quality = quality.unwrap_or(DEFAULT_JPEG_QUALITY);
    if (1..=100).contains(&quality) {
        Ok(quality)
    } else {
        Err(ToolError::InvalidOption {
            name: "quality",
            reason: "must be between 1 and 100".into(),
        })
    }
}

fn decode(path: &Path) -> Result<DynamicImage, ToolError> {
    Ok(ImageReader::open(path)?.with_guessed_format()?.decode()?)
}

/// Scale into the requested box, keeping the aspect ratio. A single
/// dimension scales the other proportionally.
pub fn resize(img: DynamicImage, options: &ConversionOptions) -> Result<DynamicImage, ToolError> {
    check_dimensions(options)?;
    let (w, h) = (img.width().max(1), img.height().max(1));
    let target = match (options.width, options.height) {
        (None, None) => return Ok(img),
        (Some(tw), Some(th)) => (tw, th),
        (Some(tw), None) => (tw, scaled(h, tw, w)),
        (None, Some(th)) => (scaled(w, th, h), th),
    };
    Ok(img.resize(target.0, target.1, FilterType::Lanczos3))
}

fn scaled(side: u32, numerator: u32, denominator: u32) -> u32 {
    let value = u64::from(side) * u64::from(numerator) / u64::from(denominator);
    value.clamp(1, u64::from(MAX_DIMENSION)) as u32
}

/// Apply `filter`, with `intensity` overriding the filter's default strength.
pub fn apply_filter(
    img: DynamicImage,
    filter: ImageFilter,
    intensity: Option<f32>,
) -> Result<DynamicImage, ToolError> {
    let amount = filter_strength(filter, intensity)?.unwrap_or_default();
    let out = match filter {
        ImageFilter::Grayscale => img.grayscale(),
        ImageFilter::Invert => {
            let mut img = img;
            img.invert();
            img
        }
        ImageFilter::Blur => img.blur(amount),
        ImageFilter::Sharpen => img.unsharpen(amount, 1),
        ImageFilter::Brighten => img.brighten(amount as i32),
        ImageFilter::Darken => img.brighten(-(amount as i32)),
        ImageFilter::Contrast => img.adjust_contrast(amount),
        ImageFilter::Sepia => sepia(&img, amount),
        ImageFilter::HueRotate => img.huerotate(amount as i32),
        ImageFilter::FlipHorizontal => img.fliph(),
        ImageFilter::FlipVertical => img.flipv(),
        ImageFilter::Rotate90 => img.rotate90(),
        ImageFilter::Rotate180 => img.rotate180(),
        ImageFilter::Rotate270 => img.rotate270(),
    };
    Ok(out)
}

/// Strength `filter` runs at: `intensity`, or the filter's default, checked
/// against the filter's range. `None` for filters without a strength.
pub fn filter_strength(filter: ImageFilter, intensity: Option<f32>) -> Result<Option<f32>, ToolError> {
    let (default, min, max) = match filter {
        ImageFilter::Blur => (2.0, 0.1, 50.0),
        ImageFilter::Sharpen => (1.5, 0.1, 20.0),
        ImageFilter::Brighten | ImageFilter::Darken => (30.0, 0.0, 255.0),
        ImageFilter::Contrast => (20.0, -100.0, 100.0),
        ImageFilter::Sepia => (1.0, 0.0, 1.0),
        ImageFilter::HueRotate => (90.0, -360.0, 360.0),
        _ => return Ok(None),
    };
    let value = intensity.unwrap_or(default);
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(Some(value))
    } else {
        Err(ToolError::InvalidOption {
            name: "intensity",
            reason: format!("must be between {min} and {max} for this filter"),
        })
    }
}

/// Classic sepia matrix, blended with the original by `amount` (0..=1).
fn sepia(img: &DynamicImage, amount: f32) -> DynamicImage {
    let mut rgba = img.to_rgba8();
    for Rgba([r, g, b, _]) in rgba.pixels_mut() {
        let (fr, fg, fb) = (f32::from(*r), f32::from(*g), f32::from(*b));
        let tones = [
            0.393 * fr + 0.769 * fg + 0.189 * fb,
            0.349 * fr + 0.686 * fg + 0.168 * fb,
            0.272 * fr + 0.534 * fg + 0.131 * fb,
        ];
        for (channel, (orig, tone)) in [r, g, b].into_iter().zip([fr, fg, fb].into_iter().zip(tones)) {
            *channel = (orig + (tone - orig) * amount).round().clamp(0.0, 255.0) as u8;
        }
    }
    DynamicImage::ImageRgba8(rgba)
}

/// Composite onto white; JPEG has no alpha channel.
fn flatten(img: &DynamicImage) -> DynamicImage {
    if !img.color().has_alpha() {
        return DynamicImage::ImageRgb8(img.to_rgb8());
    }
    let rgba: RgbaImage = img.to_rgba8();
    let rgb = ::image::ImageBuffer::from_fn(rgba.width(), rgba.height(), |x, y| {
        let Rgba([r, g, b, a]) = *rgba.get_pixel(x, y);
        let alpha = f32::from(a) / 255.0;
        let blend = |c: u8| (f32::from(c) * alpha + 255.0 * (1.0 - alpha)).round() as u8;
        ::image::Rgb([blend(r), blend(g), blend(b)])
    });
    DynamicImage::ImageRgb8(rgb)
}

fn encode(
    img: DynamicImage,
    output: &Path,
    format: &str,
    quality: Option<u8>,
) -> Result<(), ToolError> {
    let image_format = ImageFormat::from_extension(format).ok_or_else(|| {
        ToolError::UnsupportedFormat {
            format: format.to_owned(),
        }
    })?;

    match image_format {
        ImageFormat::Jpeg => {
            let quality = jpeg_quality(quality)?;
            let writer = BufWriter::new(File::create(output)?);
            let encoder = JpegEncoder::new_with_quality(writer, quality);
            flatten(&img).write_with_encoder(encoder)?;
        }
        ImageFormat::Png | ImageFormat::Tiff => img.save_with_format(output, image_format)?,
        ImageFormat::Ico => {
            let img = if img.width() > MAX_ICO_SIDE || img.height() > MAX_ICO_SIDE {
                img.resize(MAX_ICO_SIDE, MAX_ICO_SIDE, FilterType::Lanczos3)
            } else {
                img
            };
            DynamicImage::ImageRgba8(img.to_rgba8()).save_with_format(output, image_format)?;
        }
        // gif, bmp and webp encoders want 8-bit RGBA.
        _ => DynamicImage::ImageRgba8(img.to_rgba8()).save_with_format(output, image_format)?,
    }
    Ok(())
}
