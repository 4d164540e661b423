#![warn(missing_docs)]
//! Portrait Recolor - restyle portraits with Gemini.
//!
//! A portrait is normalized locally (type and size checks, HEIF transcode,
//! downscale to 1024 px, JPEG re-encode), sent to Gemini with a fixed
//! restyling instruction, and the returned image is exposed through a small
//! session state machine with a cooldown between requests.
//!
//! # Quick Start
//!
//! ```no_run
//! use portrait_recolor::{
//!     GeminiRecolorProvider, Normalizer, ProcessingState, RawUpload, RecolorController,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> portrait_recolor::Result<()> {
//!     let provider = GeminiRecolorProvider::builder().build()?;
//!     let controller = RecolorController::spawn(Arc::new(provider));
//!
//!     let upload = RawUpload::from_path("portrait.jpg")?;
//!     controller.upload(Normalizer::new().normalize(&upload)?).await?;
//!     controller.start().await?;
//!
//!     let snapshot = controller.settled().await?;
//!     if let (ProcessingState::Success, Some(result)) = (snapshot.state, &snapshot.result) {
//!         result.save("restyled.png")?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `cli` (default): the `portrait-recolor` command-line tool
//! - `heic`: HEIC/HEIF decoding through libheif (needs the system library).
//!   Without it, which includes the default build, HEIC uploads are still
//!   recognized but fail with [`RecolorError::ConversionFailed`], shown to the
//!   user as a request to try a JPG or PNG.

mod error;
pub mod image;
pub mod session;

// Re-export error types at crate root
pub use error::{ErrorKind, RecolorError, Result};

pub use crate::image::providers::{
    GeminiModel, GeminiRecolorProvider, GeminiRecolorProviderBuilder,
};
pub use crate::image::{
    EncodedImage, ImageFormat, NormalizeOptions, Normalizer, RawUpload, RecolorProvider,
    RecolorResult, UploadedImage,
};
pub use crate::session::{
    Failure, ProcessingState, RecolorController, RecolorControllerBuilder, Snapshot,
};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::error::{RecolorError, Result};
    pub use crate::image::providers::GeminiRecolorProvider;
    pub use crate::image::{Normalizer, RawUpload, RecolorProvider, RecolorResult, UploadedImage};
    pub use crate::session::{ProcessingState, RecolorController, Snapshot};
}
