//! Image normalization and recoloring.

mod heif;
mod normalize;
pub mod prompt;
mod provider;
pub mod providers;
mod types;

pub use normalize::{
    detect_format, fit_within, NormalizeOptions, Normalizer, NormalizerBuilder,
    DEFAULT_JPEG_QUALITY, DEFAULT_MAX_BYTES, DEFAULT_MAX_DIMENSION,
};
pub use provider::RecolorProvider;
pub use types::{EncodedImage, ImageFormat, RawUpload, RecolorResult, UploadedImage};
