//! Recolor providers.

mod gemini;

pub use gemini::{
    GeminiModel, GeminiRecolorProvider, GeminiRecolorProviderBuilder, API_KEY_ENV_VARS,
    DEFAULT_BASE_URL, DEFAULT_TIMEOUT,
};
