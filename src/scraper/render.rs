use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::error::{FetchError, FetchResult};
use super::{FetchMethod, FetchRequest, FetchStrategy, FetchedPage};
use crate::config::ScraperConfig;
use crate::utils::error::{AppError, Result};

/// Rendered DOM from a Browserless-compatible `/content` endpoint.
///
/// Client-rendered fragments are materialized remotely, so no browser process
/// lives in this one.
pub struct RenderStrategy {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl RenderStrategy {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let base_url = config
            .render_service_url
            .as_deref()
            .ok_or_else(|| AppError::Validation("render_service_url is not set".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/content", base_url.trim_end_matches('/')),
            token: config.render_service_token.clone(),
        })
    }
}

#[async_trait]
impl FetchStrategy for RenderStrategy {
    fn method(&self) -> FetchMethod {
        FetchMethod::DomFallback
    }

    async fn fetch(&self, request: &FetchRequest) -> FetchResult<FetchedPage> {
        let mut call = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "url": request.url }));
        if let Some(token) = &self.token {
            call = call.query(&[("token", token)]);
        }

        let response = call.send().await?;
        let status = response.status();

        // The service's own failures say nothing about the target page.
        if status.is_server_error() {
            return Err(FetchError::Network(format!(
                "Render service returned {}",
                status.as_u16()
            )));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(FetchError::FatalConfig {
                reason: "Render service rejected the token".to_string(),
            });
        }

        let body = response.text().await?;
        debug!(target_id = %request.target_id, status = status.as_u16(), bytes = body.len(), "Render fetch completed");

        Ok(FetchedPage {
            body,
            status: Some(status.as_u16()),
            final_url: request.url.clone(),
        })
    }
}
