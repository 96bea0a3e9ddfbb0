//! Push delivery through ntfy.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::config::NtfyConfig;
use crate::error::{WatchError, WatchResult};

/// Anything that can deliver a push message
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, topic: &str, title: &str, body: &str, link: &str) -> WatchResult<()>;
}

/// Posts messages to ntfy topics on one server
#[derive(Debug, Clone)]
pub struct NtfyNotifier {
    client: Client,
    config: NtfyConfig,
}

impl NtfyNotifier {
    pub fn new(config: NtfyConfig) -> WatchResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| WatchError::config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn topic(&self) -> &str {
        &self.config.topic
    }

    pub fn topic_url(&self, topic: &str) -> String {
        format!("{}/{}", self.config.server.trim_end_matches('/'), topic)
    }

    fn request(&self, topic: &str, title: &str, body: &str, link: &str) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .post(self.topic_url(topic))
            .header("Title", title)
            .header("Priority", &self.config.priority)
            .header("Tags", &self.config.tags)
            .body(body.as_bytes().to_vec());
        if !link.is_empty() {
            request = request.header("Click", link);
        }
        request
    }
}

#[async_trait]
impl Notifier for NtfyNotifier {
    async fn send(&self, topic: &str, title: &str, body: &str, link: &str) -> WatchResult<()> {
        let response = self
            .request(topic, title, body, link)
            .send()
            .await
            .map_err(|e| WatchError::delivery(e.to_string()))?;

        if let Err(e) = response.error_for_status() {
            return Err(WatchError::delivery(e.to_string()));
        }

        tracing::info!("Notification sent: {}", title);
        Ok(())
    }
}
