//! Upload normalization: type and size checks, HEIF transcode, downscale and
//! JPEG re-encode.

use crate::error::{RecolorError, Result};
use crate::image::types::{EncodedImage, ImageFormat, RawUpload, UploadedImage};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageReader, Rgb, RgbImage};
use std::io::Cursor;

/// Raw upload ceiling: 10 MiB.
pub const DEFAULT_MAX_BYTES: u64 = 10 * 1024 * 1024;

/// Longest edge after normalization, in pixels.
pub const DEFAULT_MAX_DIMENSION: u32 = 1024;

/// JPEG quality used for the re-encoded upload.
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Limits applied by a [`Normalizer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeOptions {
    /// Maximum raw upload size in bytes.
    pub max_bytes: u64,
    /// Maximum length of the longer edge in pixels.
    pub max_dimension: u32,
    /// JPEG quality factor (1-100).
    pub jpeg_quality: u8,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            max_dimension: DEFAULT_MAX_DIMENSION,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Builder for [`Normalizer`].
#[derive(Debug, Clone, Default)]
pub struct NormalizerBuilder {
    options: NormalizeOptions,
}

impl NormalizerBuilder {
    /// Creates a new builder with default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the raw upload ceiling in bytes.
    pub fn max_bytes(mut self, max_bytes: u64) -> Self {
        self.options.max_bytes = max_bytes;
        self
    }

    /// Sets the maximum length of the longer edge.
    pub fn max_dimension(mut self, max_dimension: u32) -> Self {
        self.options.max_dimension = max_dimension;
        self
    }

    /// Sets the JPEG quality factor.
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.options.jpeg_quality = quality;
        self
    }

    /// Builds the normalizer, validating the limits.
    pub fn build(self) -> Result<Normalizer> {
        let options = self.options;
        if options.max_dimension == 0 {
            return Err(RecolorError::Config(
                "max dimension must be at least 1 pixel".into(),
            ));
        }
        if !(1..=100).contains(&options.jpeg_quality) {
            return Err(RecolorError::Config(format!(
                "JPEG quality must be between 1 and 100, got {}",
                options.jpeg_quality
            )));
        }
        Ok(Normalizer { options })
    }
}

/// Turns raw uploads into compact JPEG payloads.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    options: NormalizeOptions,
}

impl Normalizer {
    /// Creates a normalizer with default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new `NormalizerBuilder`.
    pub fn builder() -> NormalizerBuilder {
        NormalizerBuilder::new()
    }

    /// Returns the active limits.
    pub fn options(&self) -> &NormalizeOptions {
        &self.options
    }

    /// Validates, decodes, downsizes and re-encodes an upload.
    pub fn normalize(&self, upload: &RawUpload) -> Result<UploadedImage> {
        let source_format = detect_format(upload)?;

        let size = upload.size();
        if size > self.options.max_bytes {
            return Err(RecolorError::FileTooLarge {
                size,
                limit: self.options.max_bytes,
            });
        }

        let decoded = decode(&upload.bytes, source_format)?;
        let (src_w, src_h) = (decoded.width(), decoded.height());
        let (width, height) = fit_within(src_w, src_h, self.options.max_dimension);

        let resized = if (width, height) == (src_w, src_h) {
            decoded
        } else {
            decoded.resize_exact(width, height, FilterType::Lanczos3)
        };

        let rgb = flatten_onto_white(resized);
        let jpeg = encode_jpeg(&rgb, self.options.jpeg_quality)?;

        tracing::debug!(
            source = %source_format,
            src_width = src_w,
            src_height = src_h,
            width,
            height,
            bytes_in = size,
            bytes_out = jpeg.len(),
            "normalized upload"
        );

        Ok(UploadedImage {
            image: EncodedImage::from_bytes(&jpeg, ImageFormat::Jpeg.mime_type()),
            width,
            height,
            source_format,
        })
    }
}

/// Resolves the upload's format from its magic bytes, falling back to the
/// declared MIME type.
pub fn detect_format(upload: &RawUpload) -> Result<ImageFormat> {
    if let Some(format) = ImageFormat::from_magic_bytes(&upload.bytes) {
        return Ok(format);
    }

    match upload.declared_type.as_deref() {
        Some(declared) => ImageFormat::from_mime_type(declared)
            .ok_or_else(|| RecolorError::InvalidFormat(declared.to_string())),
        None => Err(RecolorError::InvalidFormat("unrecognized file contents".into())),
    }
}

/// Scales `(width, height)` so the longer edge is at most `max`.
///
/// Both branches round half up, neither edge drops to zero, and dimensions
/// already within the limit are returned unchanged.
pub fn fit_within(width: u32, height: u32, max: u32) -> (u32, u32) {
    if width <= max && height <= max {
        return (width, height);
    }

    let scale = |edge: u32, long: u32| -> u32 {
        let long = u64::from(long);
        let scaled = (u64::from(edge) * u64::from(max) + long / 2) / long;
        (scaled as u32).max(1)
    };

    if width >= height {
        (max, scale(height, width))
    } else {
        (scale(width, height), max)
    }
}

/// Decodes the upload upright: any EXIF orientation is applied to the pixels.
fn decode(bytes: &[u8], format: ImageFormat) -> Result<DynamicImage> {
    let Some(codec) = format.codec() else {
        return crate::image::heif::decode_heif(bytes);
    };
    let read_failed = |e: image::ImageError| RecolorError::ReadFailed(e.to_string());

    let mut decoder = ImageReader::with_format(Cursor::new(bytes), codec)
        .into_decoder()
        .map_err(read_failed)?;
    let orientation = decoder.orientation().unwrap_or_else(|e| {
        tracing::debug!(error = %e, "ignoring unreadable EXIF orientation");
        Orientation::NoTransforms
    });

    let mut img = DynamicImage::from_decoder(decoder).map_err(read_failed)?;
    img.apply_orientation(orientation);
    Ok(img)
}

/// Drops the alpha channel by compositing onto white.
fn flatten_onto_white(img: DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.into_rgb8();
    }

    let rgba = img.into_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (src, dst) in rgba.pixels().zip(out.pixels_mut()) {
        let [r, g, b, a] = src.0;
        let a = u16::from(a);
        let blend = |c: u8| ((u16::from(c) * a + 255 * (255 - a) + 127) / 255) as u8;
        *dst = Rgb([blend(r), blend(g), blend(b)]);
    }
    out
}

fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    encoder
        .encode_image(img)
        .map_err(|e| RecolorError::ReadFailed(format!("JPEG encode failed: {e}")))?;
    Ok(buf)
}
