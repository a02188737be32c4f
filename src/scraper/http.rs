use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use std::time::Duration;
use tracing::debug;

use super::error::FetchResult;
use super::{FetchMethod, FetchRequest, FetchStrategy, FetchedPage};
use crate::config::ScraperConfig;
use crate::utils::error::{AppError, Result};

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Plain GET of the static markup. Cheapest strategy, tried first.
pub struct HttpStrategy {
    client: reqwest::Client,
}

impl HttpStrategy {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(&config.accept_language)
                .map_err(|e| AppError::Validation(format!("Invalid Accept-Language: {}", e)))?,
        );

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl FetchStrategy for HttpStrategy {
    fn method(&self) -> FetchMethod {
        FetchMethod::Http
    }

    async fn fetch(&self, request: &FetchRequest) -> FetchResult<FetchedPage> {
        let response = self.client.get(&request.url).send().await?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response.text().await?;

        debug!(target_id = %request.target_id, status, bytes = body.len(), "HTTP fetch completed");

        Ok(FetchedPage {
            body,
            status: Some(status),
            final_url,
        })
    }
}
