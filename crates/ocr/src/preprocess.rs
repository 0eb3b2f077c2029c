use image::{DynamicImage, GrayImage, ImageBuffer, ImageFormat, Luma};
use std::io::Cursor;
use thiserror::Error;

/// Images larger than this on either side are scaled down before recognition.
const MAX_SIDE: u32 = 2800;
/// Narrow phone snapshots are scaled up to at least this width.
const MIN_WIDTH: u32 = 1000;
/// Fixed cut-off for the light binarization variant (faded thermal paper).
const LIGHT_THRESHOLD: u8 = 180;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Failed to encode processed image: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferVariant {
    /// Grayscale with a full-range contrast stretch.
    Contrast,
    /// Binarized at the Otsu threshold of the stretched image.
    Otsu,
    /// Binarized at a high fixed threshold so faint print survives.
    Light,
}

impl std::fmt::Display for BufferVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BufferVariant::Contrast => write!(f, "contrast"),
            BufferVariant::Otsu => write!(f, "otsu"),
            BufferVariant::Light => write!(f, "light"),
        }
    }
}

/// One recognizer-ready rendition of the source image, PNG encoded.
#[derive(Debug, Clone)]
pub struct PreprocessedBuffer {
    pub variant: BufferVariant,
    pub png: Vec<u8>,
}

/// Decode raw image bytes (JPEG / PNG / WEBP / …) and produce every buffer
/// variant, in the fixed order `Contrast, Otsu, Light`.
pub fn prepare_variants(data: &[u8]) -> Result<Vec<PreprocessedBuffer>, PreprocessError> {
    let img = image::load_from_memory(data)?;
    let gray = normalize(img);
    let otsu = otsu_threshold(&gray);

    [
        (BufferVariant::Contrast, gray.clone()),
        (BufferVariant::Otsu, binarize(&gray, otsu)),
        (BufferVariant::Light, binarize(&gray, LIGHT_THRESHOLD)),
    ]
    .into_iter()
    .map(|(variant, buf)| -> Result<PreprocessedBuffer, PreprocessError> {
        Ok(PreprocessedBuffer { variant, png: encode_as_png(DynamicImage::ImageLuma8(buf))? })
    })
    .collect()
}

/// Detect the container format without decoding the full image.
pub fn sniff_format(data: &[u8]) -> Result<ImageFormat, PreprocessError> {
    Ok(image::guess_format(data)?)
}

/// Rescale into the recognizer's comfortable range, grayscale, contrast stretch.
fn normalize(img: DynamicImage) -> GrayImage {
    let img = if img.width() > MAX_SIDE || img.height() > MAX_SIDE {
        img.resize(MAX_SIDE, MAX_SIDE, image::imageops::FilterType::Lanczos3)
    } else if img.width() < MIN_WIDTH && img.width() > 0 {
        let scale = MIN_WIDTH as f32 / img.width() as f32;
        let height = ((img.height() as f32 * scale).round() as u32).clamp(1, MAX_SIDE);
        img.resize_exact(MIN_WIDTH, height, image::imageops::FilterType::CatmullRom)
    } else {
        img
    };

    let gray: GrayImage = img.to_luma8();

    let (min_px, max_px) = gray
        .pixels()
        .fold((255u8, 0u8), |(mn, mx), p| (mn.min(p[0]), mx.max(p[0])));

    if max_px <= min_px {
        return gray;
    }

    let range = (max_px - min_px) as u32;
    ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
        let p = gray.get_pixel(x, y)[0];
        Luma([((p - min_px) as u32 * 255 / range) as u8])
    })
}

/// Threshold maximizing between-class variance of the luma histogram.
fn otsu_threshold(gray: &GrayImage) -> u8 {
    let mut histogram = [0u64; 256];
    for p in gray.pixels() {
        histogram[p[0] as usize] += 1;
    }

    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return 128;
    }
    let weighted_sum: f64 = histogram
        .iter()
        .enumerate()
        .map(|(level, &count)| level as f64 * count as f64)
        .sum();

    let (mut best, mut best_variance) = (0u8, -1.0f64);
    let (mut background, mut background_sum) = (0u64, 0.0f64);
    for level in 0..256usize {
        background += histogram[level];
        if background == 0 {
            continue;
        }
        let foreground = total - background;
        if foreground == 0 {
            break;
        }
        background_sum += level as f64 * histogram[level] as f64;
        let mean_bg = background_sum / background as f64;
        let mean_fg = (weighted_sum - background_sum) / foreground as f64;
        let variance = background as f64 * foreground as f64 * (mean_bg - mean_fg).powi(2);
        if variance > best_variance {
            best_variance = variance;
            best = level as u8;
        }
    }
    best
}

fn binarize(gray: &GrayImage, threshold: u8) -> GrayImage {
    ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
        if gray.get_pixel(x, y)[0] > threshold {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    })
}

fn encode_as_png(img: DynamicImage) -> Result<Vec<u8>, PreprocessError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| PreprocessError::Encode(e.to_string()))?;
    Ok(buf)
}
