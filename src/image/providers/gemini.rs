//! Gemini (Google) recolor provider.

use crate::error::{parse_retry_after, sanitize_error_message, RecolorError, Result};
use crate::image::prompt::RECOLOR_PROMPT;
use crate::image::provider::RecolorProvider;
use crate::image::types::{EncodedImage, RecolorResult, UploadedImage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Default Gemini REST endpoint.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Client-side bound on a single recolor call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Environment variables consulted for the API key, in order.
pub const API_KEY_ENV_VARS: [&str; 2] = ["GOOGLE_API_KEY", "API_KEY"];

/// Gemini image model variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GeminiModel {
    /// Gemini 2.5 Flash Image (stable).
    #[default]
    FlashImage,
    /// Gemini 2.5 Flash Image preview release.
    FlashImagePreview,
}

impl GeminiModel {
    /// Returns the API model identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FlashImage => "gemini-2.5-flash-image",
            Self::FlashImagePreview => "gemini-2.5-flash-image-preview",
        }
    }
}

impl std::fmt::Display for GeminiModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builder for GeminiRecolorProvider.
#[derive(Debug, Clone)]
pub struct GeminiRecolorProviderBuilder {
    api_key: Option<String>,
    model: GeminiModel,
    timeout: Duration,
    base_url: String,
    prompt: String,
}

impl Default for GeminiRecolorProviderBuilder {
    fn default() -> Self {
        Self {
            api_key: None,
            model: GeminiModel::default(),
            timeout: DEFAULT_TIMEOUT,
            base_url: DEFAULT_BASE_URL.to_string(),
            prompt: RECOLOR_PROMPT.to_string(),
        }
    }
}

impl GeminiRecolorProviderBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API key. Falls back to `GOOGLE_API_KEY`, then `API_KEY`.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the Gemini model variant.
    pub fn model(mut self, model: GeminiModel) -> Self {
        self.model = model;
        self
    }

    /// Sets the client-side request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Overrides the REST endpoint (proxies, test servers).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Replaces the restyling instruction.
    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    /// Builds the provider, resolving the API key.
    ///
    /// A missing key is a configuration error; callers should treat it as
    /// fatal at startup.
    pub fn build(self) -> Result<GeminiRecolorProvider> {
        let api_key = self
            .api_key
            .filter(|k| !k.trim().is_empty())
            .or_else(|| {
                API_KEY_ENV_VARS
                    .iter()
                    .find_map(|var| std::env::var(var).ok().filter(|k| !k.trim().is_empty()))
            })
            .ok_or_else(|| {
                RecolorError::Config(format!(
                    "{} not set and no API key provided",
                    API_KEY_ENV_VARS.join(" / ")
                ))
            })?;

        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| RecolorError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(GeminiRecolorProvider {
            client,
            api_key,
            model: self.model,
            timeout: self.timeout,
            base_url: self.base_url,
            prompt: self.prompt,
        })
    }
}

/// Gemini recolor provider.
pub struct GeminiRecolorProvider {
    client: reqwest::Client,
    api_key: String,
    model: GeminiModel,
    timeout: Duration,
    base_url: String,
    prompt: String,
}

impl std::fmt::Debug for GeminiRecolorProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiRecolorProvider")
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GeminiRecolorProvider {
    /// Creates a new `GeminiRecolorProviderBuilder`.
    pub fn builder() -> GeminiRecolorProviderBuilder {
        GeminiRecolorProviderBuilder::new()
    }

    /// Returns the configured model.
    pub fn model(&self) -> GeminiModel {
        self.model
    }

    fn map_send_error(&self, err: reqwest::Error) -> RecolorError {
        if err.is_timeout() {
            RecolorError::Timeout(self.timeout)
        } else {
            RecolorError::Network(err)
        }
    }

    async fn recolor_impl(&self, image: &UploadedImage) -> Result<RecolorResult> {
        let start = Instant::now();

        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url,
            self.model.as_str(),
        );

        let body = GeminiRequest::for_image(image, &self.prompt);

        tracing::debug!(
            model = %self.model,
            width = image.width,
            height = image.height,
            "submitting recolor request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            return Err(parse_error(status.as_u16(), &text, &headers));
        }

        let gemini_response: GeminiResponse =
            response.json().await.map_err(|e| self.map_send_error(e))?;

        let duration_ms = start.elapsed().as_millis() as u64;

        match extract_image(gemini_response)? {
            ExtractedImage::Found { data, mime_type } => {
                tracing::debug!(%mime_type, duration_ms, "recolor request complete");
                Ok(RecolorResult {
                    image: EncodedImage::from_base64(data, mime_type),
                    model: Some(self.model.as_str().to_string()),
                    duration_ms: Some(duration_ms),
                })
            }
            ExtractedImage::NotFound { detail } => {
                tracing::debug!(%detail, duration_ms, "recolor response had no image part");
                Err(RecolorError::NoImageReturned(detail))
            }
        }
    }
}

/// Maps a non-success HTTP response to an error.
fn parse_error(status: u16, text: &str, headers: &reqwest::header::HeaderMap) -> RecolorError {
    let text = sanitize_error_message(text);
    if status == 429 {
        let retry_after = parse_retry_after(headers).map(Duration::from_secs);
        return RecolorError::RateLimited {
            retry_after,
            message: text,
        };
    }
    if status == 401 || status == 403 {
        return RecolorError::Auth(text);
    }
    let lower = text.to_lowercase();
    if lower.contains("safety")
        || lower.contains("blocked")
        || lower.contains("content_policy")
        || lower.contains("prohibited")
    {
        return RecolorError::ContentBlocked(text);
    }
    if status == 404 {
        return RecolorError::Api {
            status,
            message: "Model not found. Verify the model name is correct.".into(),
        };
    }
    RecolorError::Api {
        status,
        message: text,
    }
}

/// Outcome of searching a response for an image part.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ExtractedImage {
    /// First inline image part.
    Found { data: String, mime_type: String },
    /// No image part; `detail` carries whatever explanation the model gave.
    NotFound { detail: String },
}

/// Inspects block signals, then returns the first inline image of the first
/// candidate.
fn extract_image(response: GeminiResponse) -> Result<ExtractedImage> {
    // Blocks can arrive with HTTP 200
    if let Some(feedback) = response.prompt_feedback {
        if let Some(reason) = feedback.block_reason {
            let msg = feedback
                .block_reason_message
                .unwrap_or_else(|| format!("Prompt blocked: {}", reason));
            return Err(RecolorError::ContentBlocked(msg));
        }
    }

    let Some(candidate) = response.candidates.into_iter().next() else {
        return Ok(ExtractedImage::NotFound {
            detail: "no candidates in response".into(),
        });
    };

    if let Some(ref finish_reason) = candidate.finish_reason {
        match finish_reason.as_str() {
            "SAFETY"
            | "IMAGE_SAFETY"
            | "IMAGE_PROHIBITED_CONTENT"
            | "IMAGE_RECITATION"
            | "RECITATION"
            | "PROHIBITED_CONTENT"
            | "BLOCKLIST" => {
                return Err(RecolorError::ContentBlocked(format!(
                    "Content blocked by Gemini safety filter: {}",
                    finish_reason
                )));
            }
            _ => {}
        }
    }

    let parts = candidate.content.map(|c| c.parts).unwrap_or_default();
    let mut texts = Vec::new();
    for part in parts {
        if let Some(inline) = part.inline_data {
            return Ok(ExtractedImage::Found {
                data: inline.data,
                mime_type: inline.mime_type.unwrap_or_else(|| "image/png".into()),
            });
        }
        if let Some(text) = part.text {
            texts.push(text);
        }
    }

    let detail = if !texts.is_empty() {
        sanitize_error_message(&texts.join(" "))
    } else if let Some(reason) = candidate.finish_reason {
        format!("finish reason {reason}")
    } else {
        "response contained no image part".into()
    };
    Ok(ExtractedImage::NotFound { detail })
}

#[async_trait]
impl RecolorProvider for GeminiRecolorProvider {
    async fn recolor(&self, image: &UploadedImage) -> Result<RecolorResult> {
        self.recolor_impl(image).await
    }

    fn name(&self) -> &str {
        "Gemini (Google)"
    }

    async fn health_check(&self) -> Result<()> {
        let url = format!("{}/models/{}", self.base_url, self.model.as_str());

        let response = self
            .client
            .get(&url)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        match response.status().as_u16() {
            401 | 403 => Err(RecolorError::Auth("Invalid API key".into())),
            404 => Err(RecolorError::Api {
                status: 404,
                message: "Model not found. Verify the model name is correct.".into(),
            }),
            s if !(200..300).contains(&s) => Err(RecolorError::Api {
                status: s,
                message: "Health check failed".into(),
            }),
            _ => Ok(()),
        }
    }
}

// Request/Response types
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GeminiConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiRequestPart>,
}

/// A part in a Gemini request - can be text or inline image data.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiRequestPart {
    Text { text: String },
    InlineData { inline_data: GeminiInlineData },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiConfig {
    response_modalities: Vec<String>,
}

impl GeminiRequest {
    fn for_image(image: &UploadedImage, prompt: &str) -> Self {
        let parts = vec![
            GeminiRequestPart::InlineData {
                inline_data: GeminiInlineData {
                    mime_type: image.content_type().to_string(),
                    data: image.image.base64().to_string(),
                },
            },
            GeminiRequestPart::Text {
                text: prompt.to_string(),
            },
        ];

        Self {
            contents: vec![GeminiContent { parts }],
            generation_config: GeminiConfig {
                response_modalities: vec!["IMAGE".to_string(), "TEXT".to_string()],
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContentResponse>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
    #[serde(default)]
    block_reason_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPartResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: Option<String>,
    data: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::types::ImageFormat;
    use crate::session::Failure;

    fn sample_upload() -> UploadedImage {
        UploadedImage {
            image: EncodedImage::from_base64("/9j/4AAQ", "image/jpeg"),
            width: 1024,
            height: 512,
            source_format: ImageFormat::Jpeg,
        }
    }

    fn parse(json: &str) -> GeminiResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_gemini_model_as_str() {
        assert_eq!(GeminiModel::FlashImage.as_str(), "gemini-2.5-flash-image");
        assert_eq!(
            GeminiModel::FlashImagePreview.as_str(),
            "gemini-2.5-flash-image-preview"
        );
        assert_eq!(GeminiModel::default(), GeminiModel::FlashImage);
    }

    #[test]
    fn test_builder_with_explicit_key() {
        let provider = GeminiRecolorProviderBuilder::new()
            .api_key("test-key")
            .model(GeminiModel::FlashImagePreview)
            .timeout(Duration::from_secs(5))
            .base_url("http://localhost:9999/v1beta/")
            .build()
            .unwrap();
        assert_eq!(provider.model(), GeminiModel::FlashImagePreview);
        assert_eq!(provider.base_url, "http://localhost:9999/v1beta");
        assert_eq!(provider.name(), "Gemini (Google)");
    }

    #[test]
    fn test_debug_does_not_leak_key() {
        let provider = GeminiRecolorProvider::builder()
            .api_key("AIzaSuperSecret")
            .build()
            .unwrap();
        assert!(!format!("{provider:?}").contains("AIzaSuperSecret"));
    }

    #[test]
    fn test_request_puts_image_before_prompt() {
        let req = GeminiRequest::for_image(&sample_upload(), "make it blue");
        let json = serde_json::to_value(&req).unwrap();

        let parts = json["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["inline_data"]["mimeType"], "image/jpeg");
        assert_eq!(parts[0]["inline_data"]["data"], "/9j/4AAQ");
        assert_eq!(parts[1]["text"], "make it blue");
        assert_eq!(
            json["generationConfig"]["responseModalities"],
            serde_json::json!(["IMAGE", "TEXT"])
        );
        assert!(json.get("generation_config").is_none());
    }

    #[test]
    fn test_extract_first_image_part() {
        let resp = parse(
            r#"{
            "candidates": [{
                "content": {
                    "parts": [
                        {"text": "Here is your image"},
                        {"inlineData": {"mimeType": "image/png", "data": "iVBORw0KGgo="}},
                        {"inlineData": {"mimeType": "image/jpeg", "data": "/9j/"}}
                    ]
                },
                "finishReason": "STOP"
            }]
        }"#,
        );
        assert_eq!(
            extract_image(resp).unwrap(),
            ExtractedImage::Found {
                data: "iVBORw0KGgo=".into(),
                mime_type: "image/png".into(),
            }
        );
    }

    #[test]
    fn test_extract_defaults_missing_mime_to_png() {
        let resp = parse(
            r#"{"candidates": [{"content": {"parts": [{"inlineData": {"data": "AAAA"}}]}}]}"#,
        );
        assert!(matches!(
            extract_image(resp).unwrap(),
            ExtractedImage::Found { ref mime_type, .. } if mime_type == "image/png"
        ));
    }

    #[test]
    fn test_extract_text_only_is_not_found() {
        let resp = parse(
            r#"{"candidates": [{"content": {"parts": [{"text": "I can't edit this photo."}]}}]}"#,
        );
        assert_eq!(
            extract_image(resp).unwrap(),
            ExtractedImage::NotFound {
                detail: "I can't edit this photo.".into()
            }
        );
    }

    #[test]
    fn test_extract_empty_candidates_is_not_found() {
        let resp = parse(r#"{"candidates": []}"#);
        assert!(matches!(
            extract_image(resp).unwrap(),
            ExtractedImage::NotFound { .. }
        ));

        let resp = parse(r#"{"candidates": [{"finishReason": "NO_IMAGE"}]}"#);
        assert_eq!(
            extract_image(resp).unwrap(),
            ExtractedImage::NotFound {
                detail: "finish reason NO_IMAGE".into()
            }
        );
    }

    #[test]
    fn test_extract_prompt_feedback_block() {
        let resp = parse(
            r#"{
            "candidates": [],
            "promptFeedback": {
                "blockReason": "SAFETY",
                "blockReasonMessage": "Prompt was blocked due to safety"
            }
        }"#,
        );
        let err = extract_image(resp).unwrap_err();
        assert!(err.is_content_policy());
        assert_eq!(
            err.to_string(),
            "content blocked: Prompt was blocked due to safety"
        );
    }

    #[test]
    fn test_extract_safety_finish_reason() {
        let resp = parse(r#"{"candidates": [{"finishReason": "IMAGE_SAFETY"}]}"#);
        assert!(extract_image(resp).unwrap_err().is_content_policy());
    }

    #[test]
    fn test_parse_error_mapping() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::RETRY_AFTER, "12".parse().unwrap());
        let err = parse_error(429, "Quota exceeded for key=AIzaSecret", &headers);
        assert!(matches!(
            err,
            RecolorError::RateLimited { retry_after: Some(d), ref message }
                if d == Duration::from_secs(12) && message == "Quota exceeded for [redacted]"
        ));
        let failure = Failure::from(&err);
        assert!(failure.detail.contains("Quota exceeded for [redacted]"));
        assert!(!failure.detail.contains("AIza"));

        let empty = reqwest::header::HeaderMap::new();
        assert!(matches!(
            parse_error(403, "denied", &empty),
            RecolorError::Auth(_)
        ));
        assert!(parse_error(400, "Request blocked for safety reasons", &empty).is_content_policy());
        assert!(matches!(
            parse_error(500, "boom", &empty),
            RecolorError::Api { status: 500, ref message } if message == "boom"
        ));
        assert!(matches!(
            parse_error(404, "", &empty),
            RecolorError::Api { status: 404, .. }
        ));
    }
}
