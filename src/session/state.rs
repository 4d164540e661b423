//! Observable session state.

use crate::error::{ErrorKind, RecolorError};
use crate::image::{RecolorResult, UploadedImage};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Where the session is in its upload/process cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingState {
    /// Waiting for the user to start processing.
    #[default]
    Idle,
    /// A recolor call is in flight.
    Processing,
    /// The last call returned an image.
    Success,
    /// The last attempt failed or was rejected.
    Error,
}

impl std::fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Processing => write!(f, "processing"),
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A failure as shown to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    /// Taxonomy bucket.
    pub kind: ErrorKind,
    /// User-facing text.
    pub message: String,
    /// Technical description, for logs only.
    #[serde(skip)]
    pub detail: String,
}

impl From<&RecolorError> for Failure {
    fn from(err: &RecolorError) -> Self {
        Self {
            kind: err.kind(),
            message: err.user_message(),
            detail: err.to_string(),
        }
    }
}

/// Read-only view of a session at one point in time.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Current state.
    pub state: ProcessingState,
    /// Session generation; changes on every upload and reset.
    pub generation: u64,
    /// The normalized image awaiting or undergoing processing.
    pub original: Option<Arc<UploadedImage>>,
    /// The restyled image from the last successful call.
    ///
    /// Set on `Success`. A rejected `start` (cooldown, missing image) keeps it
    /// alongside the error; it is cleared when a new call starts, on upload
    /// and on reset.
    pub result: Option<Arc<RecolorResult>>,
    /// The failure, present only in `Error`.
    pub error: Option<Failure>,
    /// Cooldown left when the snapshot was taken.
    pub cooldown_remaining: Option<Duration>,
}

impl Snapshot {
    /// User-facing error text, if any.
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|f| f.message.as_str())
    }

    /// Returns true while a recolor call is in flight.
    pub fn is_processing(&self) -> bool {
        self.state == ProcessingState::Processing
    }
}
