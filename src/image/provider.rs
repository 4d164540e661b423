//! Recolor provider trait.

use crate::error::Result;
use crate::image::types::{RecolorResult, UploadedImage};
use async_trait::async_trait;

/// A remote service that restyles a normalized portrait.
///
/// Implementations make exactly one upstream call per invocation and never
/// retry; output may differ between calls with identical input.
#[async_trait]
pub trait RecolorProvider: Send + Sync {
    /// Sends the image with the restyling instruction and returns the result.
    async fn recolor(&self, image: &UploadedImage) -> Result<RecolorResult>;

    /// Returns the name of this provider for display.
    fn name(&self) -> &str;

    /// Checks if the provider is reachable and authenticated.
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
