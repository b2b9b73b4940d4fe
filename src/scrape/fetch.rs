use reqwest::Client;

use super::ScrapeConfig;
use crate::error::ServiceError;

/// Blocking-free HTTP GET with a bounded timeout. A non-success status is an
/// error; nothing is retried.
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new(config: &ScrapeConfig) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout)
            .build()
            .map_err(ServiceError::internal_server_error)?;
        Ok(Fetcher { client })
    }

    pub async fn get_text(&self, url: &str) -> Result<String, ServiceError> {
        self.get_page(url).await.map(|(_, body)| body)
    }

    /// The body and the URL it was served from once redirects are followed.
    pub async fn get_page(&self, url: &str) -> Result<(String, String), ServiceError> {
        tracing::debug!(url, "GET");
        let response = self.client.get(url).send().await?.error_for_status()?;
        let served_from = response.url().to_string();
        Ok((served_from, response.text().await?))
    }

    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, ServiceError> {
        tracing::debug!(url, "GET");
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}
