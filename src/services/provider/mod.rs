//! Image generation and vision backends.
//!
//! The worker only sees [`ImageProvider`]; the classify endpoint only sees
//! [`VisionProvider`]. The concrete backend is chosen once at startup from
//! configuration.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{AppConfig, ImageProviderKind, VisionProviderKind};

pub mod chat;
pub mod mock;

pub use chat::ChatCompletionsClient;
pub use mock::{MockImageProvider, MockVisionProvider};

#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Generate `count` images for `prompt`.
    ///
    /// Each entry is either a public URL or a `data:` URI carrying the
    /// encoded image.
    async fn generate_images(&self, prompt: &str, count: u32) -> Result<Vec<String>, ProviderError>;
}

#[async_trait]
pub trait VisionProvider: Send + Sync {
    /// Animal names visible in the image. Empty when there are none.
    async fn classify(&self, image_url: &str) -> Result<Vec<String>, ProviderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Provider response was malformed: {0}")]
    Malformed(String),

    #[error("Provider returned {returned} images, {requested} were requested")]
    CountMismatch { requested: u32, returned: usize },

    #[error("Provider configuration error: {0}")]
    Config(String),
}

pub fn image_provider_from_config(config: &AppConfig) -> Result<Arc<dyn ImageProvider>, ProviderError> {
    let provider: Arc<dyn ImageProvider> = match config.image_provider {
        ImageProviderKind::Mock => Arc::new(MockImageProvider::new(Duration::from_secs_f64(
            config.image_provider_delay_secs,
        ))),
        ImageProviderKind::OpenRouter => Arc::new(ChatCompletionsClient::openrouter(
            &config.openrouter_api_key,
            &config.image_model,
            &config.openrouter_site_url,
            &config.openrouter_site_name,
            Duration::from_secs(config.image_timeout_secs),
        )?),
    };
    Ok(provider)
}

pub fn vision_provider_from_config(config: &AppConfig) -> Result<Arc<dyn VisionProvider>, ProviderError> {
    let timeout = Duration::from_secs(config.vision_timeout_secs);
    let provider: Arc<dyn VisionProvider> = match config.vision_provider {
        VisionProviderKind::Mock => Arc::new(MockVisionProvider::default()),
        VisionProviderKind::OpenRouter => {
            let model = if config.vision_model.is_empty() {
                chat::OPENROUTER_DEFAULT_VISION_MODEL
            } else {
                config.vision_model.as_str()
            };
            Arc::new(ChatCompletionsClient::openrouter(
                &config.openrouter_api_key,
                model,
                &config.openrouter_site_url,
                &config.openrouter_site_name,
                timeout,
            )?)
        }
        VisionProviderKind::OpenAi => {
            let model = if config.vision_model.is_empty() {
                chat::OPENAI_DEFAULT_VISION_MODEL
            } else {
                config.vision_model.as_str()
            };
            Arc::new(ChatCompletionsClient::openai(&config.openai_api_key, model, timeout)?)
        }
    };
    Ok(provider)
}
