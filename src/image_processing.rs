//! Photo compression pipeline.
//!
//! Photos picked by the user are downscaled and re-encoded as JPEG before
//! they leave the device, to keep upload sizes and backend costs sane. The
//! pipeline fails open: compression is an optimisation, never a gate, so any
//! decode or encode problem (or blowing the time budget) hands the original
//! bytes through untouched with `fell_back` set.

use std::time::{Duration, Instant};

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageReader, Limits};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Decoder guard: refuse absurd dimensions before allocating.
const MAX_SOURCE_DIMENSION: u32 = 8_192;

/// Decoder guard: cap decoder allocations.
const MAX_DECODE_ALLOC_BYTES: u64 = 256 * 1024 * 1024;

/// Tuning for the pipeline. Shell-adjustable, with conservative defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionConfig {
    /// Longest output edge, aspect ratio preserved.
    pub max_dimension: u32,
    /// JPEG quality, 1..=100.
    pub jpeg_quality: u8,
    /// Hard wall-clock budget; exceeded means fall back to the original.
    pub time_budget: Duration,
    /// Inputs above this size are passed through without a decode attempt.
    pub max_input_bytes: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            max_dimension: 1_280,
            jpeg_quality: 85,
            time_budget: Duration::from_secs(3),
            max_input_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Error)]
enum CompressError {
    #[error("empty input")]
    EmptyInput,
    #[error("input of {0} bytes exceeds the configured maximum")]
    InputTooLarge(usize),
    #[error("decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("format sniffing failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("time budget exhausted during {0}")]
    Deadline(&'static str),
}

/// A photo ready for upload or inlining.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressedPhoto {
    pub data: Vec<u8>,
    pub mime_type: String,
    /// Output dimensions; zero when the pipeline fell back and never decoded.
    pub width: u32,
    pub height: u32,
    /// True when the original bytes were passed through unmodified.
    pub fell_back: bool,
}

/// Raw bytes of one draft photo slot as handed over by the shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoSlot {
    pub data: Vec<u8>,
    pub mime_type: String,
}

/// Compresses one photo, falling back to the original bytes on any failure.
#[must_use]
pub fn compress(config: &CompressionConfig, data: &[u8], mime_type: &str) -> CompressedPhoto {
    let deadline = Instant::now() + config.time_budget;
    match try_compress(config, data, deadline) {
        Ok(photo) => {
            debug!(
                input_bytes = data.len(),
                output_bytes = photo.data.len(),
                width = photo.width,
                height = photo.height,
                "photo compressed"
            );
            photo
        }
        Err(e) => {
            warn!(error = %e, input_bytes = data.len(), "compression fell back to original bytes");
            CompressedPhoto {
                data: data.to_vec(),
                mime_type: mime_type.to_owned(),
                width: 0,
                height: 0,
                fell_back: true,
            }
        }
    }
}

fn try_compress(
    config: &CompressionConfig,
    data: &[u8],
    deadline: Instant,
) -> Result<CompressedPhoto, CompressError> {
    if data.is_empty() {
        return Err(CompressError::EmptyInput);
    }
    if data.len() > config.max_input_bytes {
        return Err(CompressError::InputTooLarge(data.len()));
    }

    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_SOURCE_DIMENSION);
    limits.max_image_height = Some(MAX_SOURCE_DIMENSION);
    limits.max_alloc = Some(MAX_DECODE_ALLOC_BYTES);

    let mut reader = ImageReader::new(std::io::Cursor::new(data)).with_guessed_format()?;
    reader.limits(limits);
    let decoded = reader.decode()?;
    if Instant::now() > deadline {
        return Err(CompressError::Deadline("decode"));
    }

    let resized =
        if decoded.width() > config.max_dimension || decoded.height() > config.max_dimension {
            decoded.resize(
                config.max_dimension,
                config.max_dimension,
                image::imageops::FilterType::Triangle,
            )
        } else {
            decoded
        };
    if Instant::now() > deadline {
        return Err(CompressError::Deadline("resize"));
    }

    // JPEG has no alpha channel, flatten unconditionally.
    let rgb = resized.to_rgb8();
    let (width, height) = rgb.dimensions();
    let mut output = Vec::new();
    JpegEncoder::new_with_quality(&mut output, config.jpeg_quality).write_image(
        rgb.as_raw(),
        width,
        height,
        ExtendedColorType::Rgb8,
    )?;
    if Instant::now() > deadline {
        return Err(CompressError::Deadline("encode"));
    }

    Ok(CompressedPhoto {
        data: output,
        mime_type: "image/jpeg".to_owned(),
        width,
        height,
        fell_back: false,
    })
}

/// Compresses every filled slot, compacting empties while preserving order.
#[must_use]
pub fn compress_slots(
    config: &CompressionConfig,
    slots: &[Option<PhotoSlot>],
) -> Vec<CompressedPhoto> {
    slots
        .iter()
        .flatten()
        .map(|slot| compress(config, &slot.data, &slot.mime_type))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, RgbaImage};
    use proptest::prelude::*;

    fn test_png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_fn(width, height, |x, y| {
            image::Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
        }));
        let mut bytes = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Png)
            .expect("encode test png");
        bytes
    }

    #[test]
    fn compresses_and_downscales_a_large_image() {
        let config = CompressionConfig {
            max_dimension: 64,
            ..CompressionConfig::default()
        };
        let photo = compress(&config, &test_png(256, 128), "image/png");
        assert!(!photo.fell_back);
        assert_eq!(photo.mime_type, "image/jpeg");
        assert_eq!(photo.width, 64);
        assert_eq!(photo.height, 32);
    }

    #[test]
    fn small_images_keep_their_dimensions() {
        let photo = compress(&CompressionConfig::default(), &test_png(40, 30), "image/png");
        assert!(!photo.fell_back);
        assert_eq!((photo.width, photo.height), (40, 30));
    }

    #[test]
    fn garbage_input_falls_back_to_original_bytes() {
        let garbage = b"definitely not an image".to_vec();
        let photo = compress(&CompressionConfig::default(), &garbage, "image/heic");
        assert!(photo.fell_back);
        assert_eq!(photo.data, garbage);
        assert_eq!(photo.mime_type, "image/heic");
    }

    #[test]
    fn empty_input_falls_back() {
        let photo = compress(&CompressionConfig::default(), &[], "image/png");
        assert!(photo.fell_back);
        assert!(photo.data.is_empty());
    }

    #[test]
    fn oversized_input_is_passed_through_without_decoding() {
        let config = CompressionConfig {
            max_input_bytes: 16,
            ..CompressionConfig::default()
        };
        let bytes = test_png(32, 32);
        let photo = compress(&config, &bytes, "image/png");
        assert!(photo.fell_back);
        assert_eq!(photo.data, bytes);
    }

    #[test]
    fn exhausted_time_budget_falls_back() {
        let config = CompressionConfig {
            time_budget: Duration::ZERO,
            ..CompressionConfig::default()
        };
        let bytes = test_png(128, 128);
        let photo = compress(&config, &bytes, "image/png");
        assert!(photo.fell_back);
        assert_eq!(photo.data, bytes);
    }

    #[test]
    fn slot_compaction_preserves_order() {
        let slot = |tag: u8| {
            Some(PhotoSlot {
                data: vec![tag; 4],
                mime_type: "image/jpeg".into(),
            })
        };
        let slots = [slot(b'A'), None, slot(b'B'), slot(b'C')];
        let photos = compress_slots(&CompressionConfig::default(), &slots);
        assert_eq!(photos.len(), 3);
        // Tiny tagged buffers are not decodable, so each falls back and the
        // original bytes identify the slot.
        assert_eq!(photos[0].data, vec![b'A'; 4]);
        assert_eq!(photos[1].data, vec![b'B'; 4]);
        assert_eq!(photos[2].data, vec![b'C'; 4]);
        assert!(photos.iter().all(|p| p.fell_back));
    }

    #[test]
    fn all_empty_slots_compress_to_nothing() {
        let slots: [Option<PhotoSlot>; 3] = [None, None, None];
        assert!(compress_slots(&CompressionConfig::default(), &slots).is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn arbitrary_bytes_never_panic_and_always_yield_output(
            data in proptest::collection::vec(any::<u8>(), 0..512)
        ) {
            let photo = compress(&CompressionConfig::default(), &data, "application/octet-stream");
            prop_assert_eq!(photo.data.is_empty(), data.is_empty());
        }

        #[test]
        fn output_never_exceeds_max_dimension(edge in 1u32..200) {
            let config = CompressionConfig { max_dimension: 48, ..CompressionConfig::default() };
            let photo = compress(&config, &test_png(edge, edge), "image/png");
            prop_assert!(photo.fell_back || (photo.width <= 48 && photo.height <= 48));
        }
    }
}
