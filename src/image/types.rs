//! Core image types shared by the normalizer, the recolor client and the session.

use crate::error::{RecolorError, Result};
use crate::image::normalize::DEFAULT_MAX_BYTES;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;

/// Image formats accepted for upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// PNG format (lossless).
    Png,
    /// JPEG format (lossy).
    Jpeg,
    /// WebP format.
    WebP,
    /// HEIC/HEIF container (phone cameras).
    Heic,
}

/// ISO-BMFF brands that identify a HEIF still image.
const HEIF_BRANDS: [&[u8; 4]; 9] = [
    b"heic", b"heix", b"hevc", b"hevx", b"heim", b"heis", b"mif1", b"msf1", b"heif",
];

impl ImageFormat {
    /// Returns the file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::WebP => "webp",
            Self::Heic => "heic",
        }
    }

    /// Returns the MIME type for this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::WebP => "image/webp",
            Self::Heic => "image/heic",
        }
    }

    /// Parses a declared MIME type, ignoring parameters and case.
    pub fn from_mime_type(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or_default().trim();
        match essence.to_ascii_lowercase().as_str() {
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(Self::Jpeg),
            "image/webp" => Some(Self::WebP),
            "image/heic" | "image/heif" | "image/heic-sequence" | "image/heif-sequence" => {
                Some(Self::Heic)
            }
            _ => None,
        }
    }

    /// Attempts to detect format from file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "webp" => Some(Self::WebP),
            "heic" | "heif" => Some(Self::Heic),
            _ => None,
        }
    }

    /// Detects image format from magic bytes.
    pub fn from_magic_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 12 {
            return None;
        }

        // PNG: 89 50 4E 47 0D 0A 1A 0A
        if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
            return Some(Self::Png);
        }

        // JPEG: FF D8 FF
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Some(Self::Jpeg);
        }

        // WebP: RIFF....WEBP
        if data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
            return Some(Self::WebP);
        }

        // HEIF: ....ftyp<brand>
        if &data[4..8] == b"ftyp" && HEIF_BRANDS.iter().any(|b| &data[8..12] == *b) {
            return Some(Self::Heic);
        }

        None
    }

    /// Maps to the `image` crate's codec, if it can decode this format natively.
    pub fn codec(&self) -> Option<image::ImageFormat> {
        match self {
            Self::Png => Some(image::ImageFormat::Png),
            Self::Jpeg => Some(image::ImageFormat::Jpeg),
            Self::WebP => Some(image::ImageFormat::WebP),
            Self::Heic => None,
        }
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// Decodes a base64 string that may carry a data URL prefix, whitespace or
/// missing padding.
fn decode_base64_lenient(input: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    let b64 = match input.find(";base64,") {
        Some(pos) => &input[pos + 8..],
        None => input,
    };

    let cleaned: String = b64.chars().filter(|c| !c.is_ascii_whitespace()).collect();

    if let Ok(data) = base64::engine::general_purpose::STANDARD.decode(&cleaned) {
        return Ok(data);
    }

    base64::engine::general_purpose::STANDARD_NO_PAD.decode(&cleaned)
}

/// Binary image data held as base64 together with its MIME type.
///
/// Renders as a self-describing data URL (`data:<mime>;base64,<payload>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    mime_type: String,
    base64: String,
}

impl EncodedImage {
    /// Encodes raw bytes.
    pub fn from_bytes(data: &[u8], mime_type: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            base64: base64::engine::general_purpose::STANDARD.encode(data),
        }
    }

    /// Wraps an already base64-encoded payload.
    pub fn from_base64(base64: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            base64: base64.into(),
        }
    }

    /// Parses a `data:<mime>;base64,<payload>` URL.
    pub fn from_data_url(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("data:")
            .ok_or_else(|| RecolorError::Decode("not a data URL".into()))?;
        let (mime_type, payload) = rest
            .split_once(";base64,")
            .ok_or_else(|| RecolorError::Decode("data URL is not base64 encoded".into()))?;
        Ok(Self::from_base64(payload, mime_type))
    }

    /// MIME type of the payload.
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// The bare base64 payload, without the data URL prefix.
    pub fn base64(&self) -> &str {
        &self.base64
    }

    /// Returns the payload as a data URL.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64)
    }

    /// Decodes the payload back to raw bytes.
    pub fn decode(&self) -> Result<Vec<u8>> {
        decode_base64_lenient(&self.base64).map_err(|e| RecolorError::Decode(e.to_string()))
    }
}

/// A file as delivered by the upload boundary, before normalization.
#[derive(Debug, Clone)]
pub struct RawUpload {
    /// File contents.
    pub bytes: Vec<u8>,
    /// MIME type declared by the picker or inferred from the file name.
    pub declared_type: Option<String>,
    /// Original file name, if known.
    pub name: Option<String>,
}

impl RawUpload {
    /// Creates an upload from raw bytes with no declared type.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            declared_type: None,
            name: None,
        }
    }

    /// Sets the declared MIME type.
    pub fn with_declared_type(mut self, mime: impl Into<String>) -> Self {
        self.declared_type = Some(mime.into());
        self
    }

    /// Sets the original file name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Reads a file, declaring its type from the extension.
    ///
    /// Files over [`DEFAULT_MAX_BYTES`] are rejected without being buffered.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_path_limited(path, DEFAULT_MAX_BYTES)
    }

    /// Like [`from_path`](Self::from_path), with an explicit size ceiling.
    pub fn from_path_limited(path: impl AsRef<Path>, limit: u64) -> Result<Self> {
        let path = path.as_ref();
        let read_failed =
            |e: std::io::Error| RecolorError::ReadFailed(format!("{}: {e}", path.display()));

        let file = std::fs::File::open(path).map_err(read_failed)?;
        let size = file.metadata().map_err(read_failed)?.len();
        if size > limit {
            return Err(RecolorError::FileTooLarge { size, limit });
        }

        // The file may grow after the metadata check.
        let mut bytes = Vec::with_capacity(size as usize);
        file.take(limit.saturating_add(1))
            .read_to_end(&mut bytes)
            .map_err(read_failed)?;
        if bytes.len() as u64 > limit {
            return Err(RecolorError::FileTooLarge {
                size: bytes.len() as u64,
                limit,
            });
        }

        let mut upload = Self::new(bytes);
        if let Some(format) = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(ImageFormat::from_extension)
        {
            upload = upload.with_declared_type(format.mime_type());
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            upload = upload.with_name(name);
        }
        Ok(upload)
    }

    /// Size of the upload in bytes.
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// A normalized image ready to be sent for recoloring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedImage {
    /// Encoded pixels.
    pub image: EncodedImage,
    /// Width in pixels after normalization.
    pub width: u32,
    /// Height in pixels after normalization.
    pub height: u32,
    /// Format of the file the user supplied.
    pub source_format: ImageFormat,
}

impl UploadedImage {
    /// MIME type of the encoded payload.
    pub fn content_type(&self) -> &str {
        self.image.mime_type()
    }

    /// Returns the image as a data URL.
    pub fn to_data_url(&self) -> String {
        self.image.to_data_url()
    }
}

/// A restyled image returned by the recolor service.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "recolor result should be saved or displayed"]
pub struct RecolorResult {
    /// Encoded image as returned by the service.
    pub image: EncodedImage,
    /// Model that produced the image.
    pub model: Option<String>,
    /// Round-trip duration in milliseconds.
    pub duration_ms: Option<u64>,
}

impl RecolorResult {
    /// Creates a result with no metadata.
    pub fn new(image: EncodedImage) -> Self {
        Self {
            image,
            model: None,
            duration_ms: None,
        }
    }

    /// Returns the image as a data URL.
    pub fn to_data_url(&self) -> String {
        self.image.to_data_url()
    }

    /// Decodes the image to raw bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.image.decode()
    }

    /// File extension matching the returned MIME type.
    pub fn extension(&self) -> &'static str {
        ImageFormat::from_mime_type(self.image.mime_type())
            .map(|f| f.extension())
            .unwrap_or("png")
    }

    /// Saves the decoded image to the specified path.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: [u8; 12] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
    const JPEG_MAGIC: [u8; 12] = [0xFF, 0xD8, 0xFF, 0xE0, 0, 0, 0, 0, 0, 0, 0, 0];
    const WEBP_MAGIC: [u8; 12] = *b"RIFF\x00\x00\x00\x00WEBP";
    const HEIC_MAGIC: [u8; 12] = *b"\x00\x00\x00\x18ftypheic";

    #[test]
    fn test_format_from_magic_bytes() {
        assert_eq!(
            ImageFormat::from_magic_bytes(&PNG_MAGIC),
            Some(ImageFormat::Png)
        );
        assert_eq!(
            ImageFormat::from_magic_bytes(&JPEG_MAGIC),
            Some(ImageFormat::Jpeg)
        );
        assert_eq!(
            ImageFormat::from_magic_bytes(&WEBP_MAGIC),
            Some(ImageFormat::WebP)
        );
        assert_eq!(
            ImageFormat::from_magic_bytes(&HEIC_MAGIC),
            Some(ImageFormat::Heic)
        );
        assert_eq!(ImageFormat::from_magic_bytes(b"GIF89a\x00\x00\x00\x00\x00\x00"), None);
        assert_eq!(ImageFormat::from_magic_bytes(&[0xFF, 0xD8]), None);
    }

    #[test]
    fn test_format_from_mime_type() {
        assert_eq!(
            ImageFormat::from_mime_type("image/JPEG"),
            Some(ImageFormat::Jpeg)
        );
        assert_eq!(
            ImageFormat::from_mime_type("image/heif; q=1"),
            Some(ImageFormat::Heic)
        );
        assert_eq!(ImageFormat::from_mime_type("image/gif"), None);
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ImageFormat::from_extension("PNG"), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::from_extension("jpeg"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_extension("heif"), Some(ImageFormat::Heic));
        assert_eq!(ImageFormat::from_extension("bmp"), None);
    }

    #[test]
    fn test_data_url_parse_and_render() {
        let url = "data:image/png;base64,iVBORw0KGgo=";
        let encoded = EncodedImage::from_data_url(url).unwrap();
        assert_eq!(encoded.mime_type(), "image/png");
        assert_eq!(encoded.base64(), "iVBORw0KGgo=");
        assert_eq!(encoded.to_data_url(), url);
        assert_eq!(encoded.decode().unwrap(), PNG_MAGIC[..8].to_vec());

        assert!(EncodedImage::from_data_url("iVBORw0KGgo=").is_err());
        assert!(EncodedImage::from_data_url("data:image/png,raw").is_err());
    }

    #[test]
    fn test_decode_tolerates_missing_padding_and_whitespace() {
        let encoded = EncodedImage::from_base64("iVBO\nRw0KGgo", "image/png");
        assert_eq!(encoded.decode().unwrap(), PNG_MAGIC[..8].to_vec());
    }

    #[test]
    fn test_result_extension_follows_mime() {
        let result = RecolorResult::new(EncodedImage::from_bytes(&[1, 2, 3], "image/jpeg"));
        assert_eq!(result.extension(), "jpg");
        let result = RecolorResult::new(EncodedImage::from_bytes(&[1, 2, 3], "image/avif"));
        assert_eq!(result.extension(), "png");
    }

    #[test]
    fn test_from_path_rejects_oversized_file_before_reading() {
        let dir = std::env::temp_dir().join(format!("portrait-recolor-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("large.png");
        let mut bytes = PNG_MAGIC.to_vec();
        bytes.resize(4096, 0);
        std::fs::write(&path, &bytes).unwrap();

        let err = RawUpload::from_path_limited(&path, 1024).unwrap_err();
        assert!(matches!(
            err,
            RecolorError::FileTooLarge {
                size: 4096,
                limit: 1024
            }
        ));

        let upload = RawUpload::from_path_limited(&path, 4096).unwrap();
        assert_eq!(upload.size(), 4096);
        assert_eq!(upload.declared_type.as_deref(), Some("image/png"));
        assert_eq!(upload.name.as_deref(), Some("large.png"));

        let err = RawUpload::from_path(dir.join("missing.png")).unwrap_err();
        assert!(matches!(err, RecolorError::ReadFailed(_)));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
