use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;

use super::{ImageProvider, ProviderError, VisionProvider};

const PLACEHOLDER_BASE_URL: &str = "https://placehold.co/512x512/png";

/// Returns placeholder URLs after a simulated per-image delay.
#[derive(Debug, Clone, Default)]
pub struct MockImageProvider {
    delay_per_image: Duration,
}

impl MockImageProvider {
    pub fn new(delay_per_image: Duration) -> Self {
        Self { delay_per_image }
    }
}

#[async_trait]
impl ImageProvider for MockImageProvider {
    async fn generate_images(&self, prompt: &str, count: u32) -> Result<Vec<String>, ProviderError> {
        if !self.delay_per_image.is_zero() {
            sleep(self.delay_per_image * count).await;
        }

        let text = prompt.replace(' ', "+");
        Ok((1..=count)
            .map(|i| format!("{PLACEHOLDER_BASE_URL}?text={text}+{i}"))
            .collect())
    }
}

/// Answers from keywords in the image URL.
#[derive(Debug, Clone, Default)]
pub struct MockVisionProvider {
    delay: Duration,
}

impl MockVisionProvider {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl VisionProvider for MockVisionProvider {
    async fn classify(&self, image_url: &str) -> Result<Vec<String>, ProviderError> {
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        let url = image_url.to_lowercase();
        Ok(["cat", "dog", "bird"]
            .into_iter()
            .find(|animal| url.contains(animal))
            .map(|animal| vec![animal.to_string()])
            .unwrap_or_default())
    }
}
