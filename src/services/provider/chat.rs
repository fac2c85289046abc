use async_trait::async_trait;
use futures::future::try_join_all;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{ImageProvider, ProviderError, VisionProvider};

pub const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const OPENROUTER_DEFAULT_VISION_MODEL: &str = "openai/gpt-4o-mini";
pub const OPENAI_DEFAULT_VISION_MODEL: &str = "gpt-4o-mini";

const CLASSIFY_PROMPT: &str = concat!(
    "Identify all animals in this image. ",
    "List only the animal names, separated by commas. ",
    "If there are no animals, respond with 'NONE'."
);

/// Client for OpenAI-compatible chat completion APIs (OpenRouter, OpenAI).
///
/// Serves both capabilities: image generation through the image output
/// modality, and classification through image input.
pub struct ChatCompletionsClient {
    http: Client,
    api_url: String,
    api_key: String,
    model: String,
    referer: Option<String>,
    title: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    images: Vec<ImagePart>,
}

#[derive(Deserialize)]
struct ImagePart {
    image_url: ImageUrl,
}

#[derive(Deserialize)]
struct ImageUrl {
    url: String,
}

impl ChatCompletionsClient {
    pub fn openrouter(
        api_key: &str,
        model: &str,
        site_url: &str,
        site_name: &str,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let mut client = Self::new(OPENROUTER_API_URL, api_key, model, timeout)?;
        client.referer = Some(site_url.to_string()).filter(|s| !s.is_empty());
        client.title = Some(site_name.to_string()).filter(|s| !s.is_empty());
        Ok(client)
    }

    pub fn openai(api_key: &str, model: &str, timeout: Duration) -> Result<Self, ProviderError> {
        Self::new(OPENAI_API_URL, api_key, model, timeout)
    }

    pub fn new(api_url: &str, api_key: &str, model: &str, timeout: Duration) -> Result<Self, ProviderError> {
        if api_key.is_empty() {
            return Err(ProviderError::Config("API key is empty".to_string()));
        }
        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            referer: None,
            title: None,
        })
    }

    async fn complete(&self, body: serde_json::Value) -> Result<ChatMessage, ProviderError> {
        let mut request = self.http.post(&self.api_url).bearer_auth(&self.api_key).json(&body);
        if let Some(referer) = &self.referer {
            request = request.header("HTTP-Referer", referer);
        }
        if let Some(title) = &self.title {
            request = request.header("X-Title", title);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let chat: ChatResponse = response.json().await?;
        chat.choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| ProviderError::Malformed("response has no choices".to_string()))
    }

    async fn generate_one(&self, prompt: &str) -> Result<String, ProviderError> {
        let body = json!({
            "model": self.model,
            "modalities": ["image", "text"],
            "messages": [{ "role": "user", "content": prompt }],
        });

        let message = self.complete(body).await?;
        message
            .images
            .into_iter()
            .next()
            .map(|part| part.image_url.url)
            .ok_or_else(|| ProviderError::Malformed("response contains no image".to_string()))
    }
}

#[async_trait]
impl ImageProvider for ChatCompletionsClient {
    async fn generate_images(&self, prompt: &str, count: u32) -> Result<Vec<String>, ProviderError> {
        try_join_all((0..count).map(|_| self.generate_one(prompt))).await
    }
}

#[async_trait]
impl VisionProvider for ChatCompletionsClient {
    async fn classify(&self, image_url: &str) -> Result<Vec<String>, ProviderError> {
        let body = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": CLASSIFY_PROMPT },
                    { "type": "image_url", "image_url": { "url": image_url } },
                ],
            }],
        });

        let message = self.complete(body).await?;
        Ok(parse_animals(message.content.as_deref().unwrap_or_default()))
    }
}

/// Turn a comma-separated model reply into animal names.
pub fn parse_animals(content: &str) -> Vec<String> {
    let upper = content.to_uppercase();
    if upper.contains("NONE") || upper.contains("NO ANIMAL") {
        return Vec::new();
    }

    content
        .split(',')
        .map(|name| name.trim().trim_end_matches('.').trim().to_lowercase())
        .filter(|name| !name.is_empty())
        .collect()
}
