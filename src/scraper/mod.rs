use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::core::hasher::Fingerprint;
use crate::models::MonitoredTarget;

pub mod browser;
pub mod chain;
pub mod detection;
pub mod error;
pub mod http;
pub mod render;

pub use browser::{BrowserPool, BrowserStrategy};
pub use chain::FetchStrategyChain;
pub use error::{ErrorKind, FetchError, FetchResult};
pub use http::HttpStrategy;
pub use render::RenderStrategy;

/// Fetch technique, in escalation order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum FetchMethod {
    Http,
    DomFallback,
    BrowserFallback,
}

impl FetchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchMethod::Http => "http",
            FetchMethod::DomFallback => "dom-fallback",
            FetchMethod::BrowserFallback => "browser-fallback",
        }
    }
}

impl fmt::Display for FetchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchRequest {
    pub target_id: String,
    pub url: String,
    pub selector: Option<String>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>, selector: Option<String>) -> Self {
        let url = url.into();
        Self {
            target_id: url.clone(),
            url,
            selector,
        }
    }

    pub fn for_target(target: &MonitoredTarget) -> Self {
        Self {
            target_id: target.id.clone(),
            url: target.url.clone(),
            selector: target.selector.clone(),
        }
    }
}

/// Raw page as returned by a strategy, before block detection and hashing.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPage {
    pub body: String,
    /// HTTP status when the strategy sees one; browser navigation does not.
    pub status: Option<u16>,
    pub final_url: String,
}

/// Result of one pass through the strategy chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScrapeOutcome {
    pub target_id: String,
    pub method: FetchMethod,
    pub success: bool,
    pub fingerprint: Option<Fingerprint>,
    pub error_kind: Option<ErrorKind>,
    pub error: Option<String>,
    pub elapsed_ms: u64,
    pub memory_estimate_bytes: u64,
    pub attempts: u32,
    pub final_url: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl ScrapeOutcome {
    pub fn succeeded(
        request: &FetchRequest,
        method: FetchMethod,
        fingerprint: Fingerprint,
        page: &FetchedPage,
        elapsed: Duration,
        memory_estimate_bytes: u64,
        attempts: u32,
    ) -> Self {
        Self {
            target_id: request.target_id.clone(),
            method,
            success: true,
            fingerprint: Some(fingerprint),
            error_kind: None,
            error: None,
            elapsed_ms: elapsed.as_millis() as u64,
            memory_estimate_bytes,
            attempts,
            final_url: Some(page.final_url.clone()),
            checked_at: Utc::now(),
        }
    }

    pub fn failed(
        request: &FetchRequest,
        method: FetchMethod,
        error: &FetchError,
        elapsed: Duration,
        attempts: u32,
    ) -> Self {
        Self {
            target_id: request.target_id.clone(),
            method,
            success: false,
            fingerprint: None,
            error_kind: Some(error.kind()),
            error: Some(error.to_string()),
            elapsed_ms: elapsed.as_millis() as u64,
            memory_estimate_bytes: 0,
            attempts,
            final_url: None,
            checked_at: Utc::now(),
        }
    }
}

/// One fetch technique in the fallback chain.
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    fn method(&self) -> FetchMethod;

    /// Fetches the raw page. Block detection and hashing happen in the chain.
    async fn fetch(&self, request: &FetchRequest) -> FetchResult<FetchedPage>;

    /// Fixed memory cost of one fetch on top of the page body, for outcome estimates.
    fn memory_overhead_bytes(&self) -> u64 {
        0
    }

    /// Makes the strategy usable again after `shutdown`. Called on every scheduler start.
    async fn start(&self) {}

    /// Releases long-lived resources such as browser processes.
    async fn shutdown(&self) {}
}
