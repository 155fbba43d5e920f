//! Image transforms: decode → operate → re-encode.
//!
//! ## Why spawn_blocking?
//!
//! Decoding and re-encoding a 24-megapixel photo takes hundreds of
//! milliseconds of pure CPU. Running it on a Tokio worker would freeze every
//! other task on that worker (progress reporting included), so the whole
//! decode/encode step moves to the blocking pool. Only one item is in flight
//! at a time, so at most one decoded bitmap is alive.

use super::{Transform, TransformInput, TransformOutput};
use crate::config::{OutputFormat, Rotation, TransformParams};
use crate::error::TransformError;
use crate::pipeline::naming::{split_extension, with_extension};
use futures::future::{BoxFuture, FutureExt};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::DynamicImage;
use std::io::Cursor;
use std::sync::Arc;
use tracing::debug;

/// The operation an [`ImageTransform`] performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOp {
    Rotate,
    Grayscale,
    Compress,
    Convert,
    Resize,
}

impl ImageOp {
    pub fn name(self) -> &'static str {
        match self {
            ImageOp::Rotate => "rotate",
            ImageOp::Grayscale => "grayscale",
            ImageOp::Compress => "compress",
            ImageOp::Convert => "convert",
            ImageOp::Resize => "resize",
        }
    }
}

/// A [`Transform`] backed by the `image` crate.
#[derive(Debug, Clone, Copy)]
pub struct ImageTransform {
    op: ImageOp,
}

impl ImageTransform {
    pub fn new(op: ImageOp) -> Self {
        Self { op }
    }

    pub fn rotate() -> Self {
        Self::new(ImageOp::Rotate)
    }

    pub fn grayscale() -> Self {
        Self::new(ImageOp::Grayscale)
    }

    pub fn compress() -> Self {
        Self::new(ImageOp::Compress)
    }

    pub fn convert() -> Self {
        Self::new(ImageOp::Convert)
    }

    pub fn resize() -> Self {
        Self::new(ImageOp::Resize)
    }

    pub fn op(&self) -> ImageOp {
        self.op
    }
}

impl Transform for ImageTransform {
    fn name(&self) -> &str {
        self.op.name()
    }

    fn apply<'a>(
        &'a self,
        input: TransformInput<'a>,
    ) -> BoxFuture<'a, Result<TransformOutput, TransformError>> {
        let op = self.op;
        let payload = &input.item.payload;
        let name = payload.name.clone();
        let media_type = payload.media_type.clone();
        let data = Arc::clone(&payload.data);
        let params = input.params.clone();

        async move {
            tokio::task::spawn_blocking(move || {
                apply_blocking(op, &name, &media_type, &data, &params)
            })
            .await
            .map_err(|e| TransformError::other(format!("image task failed: {e}")))?
        }
        .boxed()
    }
}

/// Blocking implementation of one image operation.
pub fn apply_blocking(
    op: ImageOp,
    name: &str,
    media_type: &str,
    data: &[u8],
    params: &TransformParams,
) -> Result<TransformOutput, TransformError> {
    let input_format = image::guess_format(data).map_err(|_| TransformError::Unsupported {
        media_type: media_type.to_string(),
    })?;
    let img = image::load_from_memory_with_format(data, input_format)?;
    let native = OutputFormat::from_image_format(input_format);

    let (img, target) = match op {
        ImageOp::Rotate => (rotate(img, params.rotation), params.format.or(native)),
        ImageOp::Grayscale => (img.grayscale(), params.format.or(native)),
        ImageOp::Compress => (img, Some(params.format.unwrap_or(OutputFormat::Jpeg))),
        ImageOp::Convert => {
            let target = params.format.ok_or_else(|| {
                TransformError::InvalidParams("convert needs a target format".into())
            })?;
            (img, Some(target))
        }
        ImageOp::Resize => (resize(&img, params)?, params.format.or(native)),
    };
    // Inputs we can decode but not encode (GIF, TIFF, …) come out as PNG.
    let target = target.unwrap_or(OutputFormat::Png);

    let bytes = encode_image(&img, target, params.quality)?;
    debug!(
        "{} '{}': {}x{} {:?} → {} bytes",
        op.name(),
        name,
        img.width(),
        img.height(),
        target,
        bytes.len()
    );

    Ok(TransformOutput::new(bytes).with_file_name(output_name(name, target)))
}

fn rotate(img: DynamicImage, rotation: Rotation) -> DynamicImage {
    match rotation {
        Rotation::Deg90 => img.rotate90(),
        Rotation::Deg180 => img.rotate180(),
        Rotation::Deg270 => img.rotate270(),
    }
}

/// Fit within the requested bounds, preserving aspect ratio.
fn resize(img: &DynamicImage, params: &TransformParams) -> Result<DynamicImage, TransformError> {
    let (w, h) = (img.width(), img.height());
    let (tw, th) = match (params.width, params.height) {
        (None, None) => {
            return Err(TransformError::InvalidParams(
                "resize needs a target width or height".into(),
            ))
        }
        (Some(tw), Some(th)) => (tw, th),
        (Some(tw), None) => (tw, scale(h, tw, w)),
        (None, Some(th)) => (scale(w, th, h), th),
    };
    Ok(img.resize(tw, th, FilterType::Lanczos3))
}

/// `other * target / dim`, rounded, at least 1.
fn scale(other: u32, target: u32, dim: u32) -> u32 {
    let dim = u64::from(dim.max(1));
    let v = (u64::from(other) * u64::from(target) + dim / 2) / dim;
    v.clamp(1, u64::from(u32::MAX)) as u32
}

/// Keep the original name when its extension already fits `format`.
fn output_name(name: &str, format: OutputFormat) -> String {
    match split_extension(name) {
        (_, Some(ext)) if format.matches_extension(ext) => name.to_string(),
        _ => with_extension(name, format.extension()),
    }
}

/// Encode `img` as `format`; `quality` applies to JPEG only.
///
/// Pixel layouts the target encoder rejects are converted first (JPEG has
/// no alpha, the WebP encoder only takes 8-bit RGB(A)).
pub fn encode_image(
    img: &DynamicImage,
    format: OutputFormat,
    quality: u8,
) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    match format {
        OutputFormat::Jpeg => {
            let flat = if img.color().has_color() {
                DynamicImage::ImageRgb8(img.to_rgb8())
            } else {
                DynamicImage::ImageLuma8(img.to_luma8())
            };
            flat.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100)))?;
        }
        OutputFormat::Png => {
            img.write_with_encoder(PngEncoder::new_with_quality(
                &mut buf,
                CompressionType::Best,
                PngFilter::Adaptive,
            ))?;
        }
        OutputFormat::WebP => {
            let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
            rgba.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::WebP)?;
        }
        OutputFormat::Bmp => {
            let flat = if img.color().has_alpha() {
                DynamicImage::ImageRgba8(img.to_rgba8())
            } else {
                DynamicImage::ImageRgb8(img.to_rgb8())
            };
            flat.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Bmp)?;
        }
    }
    Ok(buf)
}
