//! Error types for portrait normalization, recoloring and session control.

use serde::Serialize;
use std::time::Duration;

/// Upper bound on upstream error text embedded in errors.
const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Errors that can occur while normalizing, recoloring or driving a session.
#[derive(Debug, thiserror::Error)]
pub enum RecolorError {
    /// The upload is not one of the accepted image types.
    #[error("unsupported image type: {0}")]
    InvalidFormat(String),

    /// The upload exceeds the raw size ceiling.
    #[error("file too large: {size} bytes exceeds the {limit} byte limit")]
    FileTooLarge {
        /// Size of the upload in bytes.
        size: u64,
        /// Configured ceiling in bytes.
        limit: u64,
    },

    /// A HEIC/HEIF source could not be transcoded.
    #[error("conversion failed: {0}")]
    ConversionFailed(String),

    /// The upload could not be read or decoded.
    #[error("failed to read image: {0}")]
    ReadFailed(String),

    /// The service answered without an image part.
    #[error("no image returned: {0}")]
    NoImageReturned(String),

    /// API key rejected by the service.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Sanitized error body.
        message: String,
    },

    /// Quota or rate limit exceeded.
    #[error("rate limited, retry after {retry_after:?}: {message}")]
    RateLimited {
        /// Server supplied retry hint.
        retry_after: Option<Duration>,
        /// Sanitized error body, usually naming the exhausted quota.
        message: String,
    },

    /// The remote call exceeded the client-side timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Content was blocked by safety filters.
    #[error("content blocked: {0}")]
    ContentBlocked(String),

    /// The provider task panicked or was cancelled before producing an outcome.
    #[error("provider task failed: {0}")]
    ProviderTask(String),

    /// Network or HTTP error.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Returned image payload was not valid base64.
    #[error("failed to decode: {0}")]
    Decode(String),

    /// I/O error (e.g., reading an upload or saving a result).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A processing request arrived inside the cooldown window.
    #[error("cooldown active, {remaining:?} remaining")]
    CooldownActive {
        /// Time left until the next request is accepted.
        remaining: Duration,
    },

    /// Processing was requested without an uploaded image.
    #[error("no image selected")]
    NoImageSelected,

    /// A processing request is already in flight.
    #[error("a recolor request is already in flight")]
    AlreadyProcessing,

    /// Required configuration is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// The session controller task has stopped.
    #[error("session controller has shut down")]
    ControllerClosed,
}

/// Classification of [`RecolorError`] into the user-visible taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Upload type not in the allow-list.
    InvalidFormat,
    /// Upload exceeds the size ceiling.
    FileTooLarge,
    /// HEIC/HEIF transcode failed.
    ConversionFailed,
    /// Upload could not be read or decoded.
    ReadFailed,
    /// Service returned no image part.
    NoImageReturned,
    /// Transport or service failure.
    UpstreamError,
    /// Request rejected by the cooldown.
    CooldownActive,
    /// No image uploaded.
    NoImageSelected,
    /// Request rejected because another is in flight.
    AlreadyProcessing,
    /// Startup configuration problem.
    Configuration,
    /// Controller no longer running.
    Internal,
}

impl RecolorError {
    /// Returns the taxonomy bucket for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidFormat(_) => ErrorKind::InvalidFormat,
            Self::FileTooLarge { .. } => ErrorKind::FileTooLarge,
            Self::ConversionFailed(_) => ErrorKind::ConversionFailed,
            Self::ReadFailed(_) | Self::Io(_) => ErrorKind::ReadFailed,
            Self::NoImageReturned(_) => ErrorKind::NoImageReturned,
            Self::Auth(_)
            | Self::Api { .. }
            | Self::RateLimited { .. }
            | Self::Timeout(_)
            | Self::ContentBlocked(_)
            | Self::ProviderTask(_)
            | Self::Network(_)
            | Self::Json(_)
            | Self::Decode(_) => ErrorKind::UpstreamError,
            Self::CooldownActive { .. } => ErrorKind::CooldownActive,
            Self::NoImageSelected => ErrorKind::NoImageSelected,
            Self::AlreadyProcessing => ErrorKind::AlreadyProcessing,
            Self::Config(_) => ErrorKind::Configuration,
            Self::ControllerClosed => ErrorKind::Internal,
        }
    }

    /// Returns true if the upstream service refused the content on policy grounds.
    pub fn is_content_policy(&self) -> bool {
        matches!(self, Self::ContentBlocked(_))
    }

    /// Text suitable for showing to the person who uploaded the photo.
    ///
    /// Upstream details are never included; policy rejections get their own
    /// wording and every other upstream failure suggests trying again.
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidFormat(_) => {
                "Invalid file type. Please upload a JPG, PNG, WEBP or HEIC file.".into()
            }
            Self::FileTooLarge { size, limit } => format!(
                "This file is too large ({:.1} MB). Please upload an image under {} MB.",
                *size as f64 / (1024.0 * 1024.0),
                limit / (1024 * 1024),
            ),
            Self::ConversionFailed(_) => {
                "We couldn't convert this HEIC photo. Please try a JPG or PNG instead.".into()
            }
            Self::ReadFailed(_) | Self::Io(_) => {
                "Failed to read the file. Please try another image.".into()
            }
            Self::NoImageReturned(_) => "The model did not return an image. This can happen \
                 when a photo is declined by the safety filter. Please try a different photo."
                .into(),
            Self::ContentBlocked(_) => "We couldn't restyle this photo because it didn't pass \
                 the content guidelines. Please try a different portrait."
                .into(),
            Self::CooldownActive { remaining } => format!(
                "Please wait {} more seconds before processing another image.",
                whole_seconds_ceil(*remaining)
            ),
            Self::NoImageSelected => "No image to process. Please upload a photo first.".into(),
            Self::AlreadyProcessing => "Your photo is already being processed.".into(),
            Self::Config(_) => "The recolor service is not configured.".into(),
            Self::ControllerClosed => "This session has ended. Please start again.".into(),
            _ => "Failed to recolor image. Something went wrong on our side, please try again \
                 in a moment."
                .into(),
        }
    }
}

/// Rounds a duration up to whole seconds, never reporting less than one.
pub(crate) fn whole_seconds_ceil(d: Duration) -> u64 {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    secs.max(1)
}

/// Redacts credentials from and truncates an upstream error body.
pub(crate) fn sanitize_error_message(text: &str) -> String {
    let mut cleaned = String::with_capacity(text.len().min(MAX_ERROR_MESSAGE_LEN));
    for (i, word) in text.split_whitespace().enumerate() {
        if i > 0 {
            cleaned.push(' ');
        }
        if word.starts_with("AIza") || word.contains("key=") {
            cleaned.push_str("[redacted]");
        } else {
            cleaned.push_str(word);
        }
    }

    if cleaned.chars().count() > MAX_ERROR_MESSAGE_LEN {
        let truncated: String = cleaned.chars().take(MAX_ERROR_MESSAGE_LEN).collect();
        return format!("{truncated}...");
    }
    cleaned
}

/// Reads a `Retry-After` header expressed in seconds.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, RecolorError>;
