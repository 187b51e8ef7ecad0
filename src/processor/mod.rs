//! Display image processing
//!
//! Pure bytes-in, bytes-out transform:
//! - Decode whatever the generation service returned
//! - Fit to the display resolution (center crop or letterbox)
//! - Contrast, saturation and sharpness adjustments
//! - Re-encode as JPEG

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ImageReader, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ProcessError;

/// How a source image is fitted to the target aspect ratio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    /// Center-crop to the target aspect ratio, then scale
    #[default]
    Crop,
    /// Scale to fit, then pad with black bars
    Letterbox,
}

/// Processor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorSettings {
    /// Target width in pixels
    pub width: u32,
    /// Target height in pixels
    pub height: u32,
    pub fit: FitMode,
    /// Contrast multiplier (1.0 = unchanged)
    pub contrast: f32,
    /// Saturation multiplier (1.0 = unchanged)
    pub saturation: f32,
    /// Sharpness multiplier (1.0 = unchanged)
    pub sharpness: f32,
    /// JPEG quality, 1-100
    pub quality: u8,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            width: 3840,
            height: 2160,
            fit: FitMode::Crop,
            contrast: 1.05,
            saturation: 1.1,
            sharpness: 1.5,
            quality: 95,
        }
    }
}

/// Encoded image ready for upload
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Image processor for a fixed display resolution
#[derive(Debug, Clone)]
pub struct ImageProcessor {
    settings: ProcessorSettings,
}

impl ImageProcessor {
    pub fn new(settings: ProcessorSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    /// Decode, fit, enhance and re-encode
    pub fn process(&self, data: &[u8]) -> Result<ProcessedImage, ProcessError> {
        let s = &self.settings;
        if s.width == 0 || s.height == 0 {
            return Err(ProcessError::Encode(format!(
                "invalid target resolution {}x{}",
                s.width, s.height
            )));
        }

        let img = image::load_from_memory(data)
            .map_err(|e| ProcessError::Decode(e.to_string()))?
            .to_rgb8();

        debug!(
            from_width = img.width(),
            from_height = img.height(),
            to_width = s.width,
            to_height = s.height,
            "processing image"
        );

        let img = match s.fit {
            FitMode::Crop => fill_and_crop(&img, s.width, s.height),
            FitMode::Letterbox => letterbox(&img, s.width, s.height),
        };

        let img = adjust_contrast(img, s.contrast);
        let img = adjust_saturation(img, s.saturation);
        let img = adjust_sharpness(img, s.sharpness);

        let bytes = encode_jpeg(&img, s.quality)?;
        Ok(ProcessedImage {
            bytes,
            width: img.width(),
            height: img.height(),
        })
    }
}

/// Read dimensions without decoding pixel data
pub fn dimensions(data: &[u8]) -> Result<(u32, u32), ProcessError> {
    ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| ProcessError::Decode(e.to_string()))?
        .into_dimensions()
        .map_err(|e| ProcessError::Decode(e.to_string()))
}

fn is_identity(factor: f32) -> bool {
    (factor - 1.0).abs() < f32::EPSILON
}

/// Centered region of the source with the target aspect ratio, in source
/// pixels. Never empty.
fn crop_region(w: u32, h: u32, width: u32, height: u32) -> (u32, u32, u32, u32) {
    let target = width as f64 / height as f64;
    let (crop_w, crop_h) = if w as f64 / h as f64 > target {
        (((h as f64 * target).round() as u32).clamp(1, w), h)
    } else {
        (w, ((w as f64 / target).round() as u32).clamp(1, h))
    };
    ((w - crop_w) / 2, (h - crop_h) / 2, crop_w, crop_h)
}

fn fill_and_crop(img: &RgbImage, width: u32, height: u32) -> RgbImage {
    let (w, h) = img.dimensions();
    if (w, h) == (width, height) {
        return img.clone();
    }

    let (left, top, crop_w, crop_h) = crop_region(w, h, width, height);
    let region = imageops::crop_imm(img, left, top, crop_w, crop_h).to_image();
    imageops::resize(&region, width, height, FilterType::Lanczos3)
}

fn letterbox(img: &RgbImage, width: u32, height: u32) -> RgbImage {
    let (w, h) = img.dimensions();
    if (w, h) == (width, height) {
        return img.clone();
    }

    // Fitted size never exceeds the canvas
    let scale = (width as f64 / w as f64).min(height as f64 / h as f64);
    let new_w = ((w as f64 * scale).round() as u32).clamp(1, width);
    let new_h = ((h as f64 * scale).round() as u32).clamp(1, height);

    let resized = imageops::resize(img, new_w, new_h, FilterType::Lanczos3);
    let mut canvas = RgbImage::from_pixel(width, height, Rgb([0, 0, 0]));
    let x = (width - new_w) / 2;
    let y = (height - new_h) / 2;
    imageops::overlay(&mut canvas, &resized, x as i64, y as i64);
    canvas
}

fn luma(p: &Rgb<u8>) -> f32 {
    0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32
}

fn blend(base: f32, value: f32, factor: f32) -> u8 {
    (base + factor * (value - base)).round().clamp(0.0, 255.0) as u8
}

/// Blend each channel away from the mean luminance
fn adjust_contrast(mut img: RgbImage, factor: f32) -> RgbImage {
    if is_identity(factor) {
        return img;
    }
    let count = (img.width() as f64 * img.height() as f64).max(1.0);
    let mean = (img.pixels().map(|p| luma(p) as f64).sum::<f64>() / count) as f32;
    for p in img.pixels_mut() {
        for c in 0..3 {
            p[c] = blend(mean, p[c] as f32, factor);
        }
    }
    img
}

/// Blend each pixel away from its own grey value
fn adjust_saturation(mut img: RgbImage, factor: f32) -> RgbImage {
    if is_identity(factor) {
        return img;
    }
    for p in img.pixels_mut() {
        let grey = luma(p);
        for c in 0..3 {
            p[c] = blend(grey, p[c] as f32, factor);
        }
    }
    img
}

/// Blend away from a slightly blurred copy
fn adjust_sharpness(img: RgbImage, factor: f32) -> RgbImage {
    if is_identity(factor) {
        return img;
    }
    let blurred = imageops::blur(&img, 1.0);
    let mut out = img;
    for (p, b) in out.pixels_mut().zip(blurred.pixels()) {
        for c in 0..3 {
            p[c] = blend(b[c] as f32, p[c] as f32, factor);
        }
    }
    out
}

fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>, ProcessError> {
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100));
    encoder
        .encode_image(img)
        .map_err(|e| ProcessError::Encode(e.to_string()))?;
    Ok(bytes)
}
