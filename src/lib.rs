pub mod app;
pub mod config;
pub mod core;
pub mod models;
pub mod plugins;
pub mod scheduler;
pub mod scraper;
pub mod store;
pub mod utils;
pub mod web;

// Re-export commonly used types
pub use crate::app::{assemble, App};
pub use crate::config::AppConfig;
pub use crate::core::{Confidence, ContentHasher, DiffDetector, DiffResult, Fingerprint, RetryPolicy, StatisticsTracker};
pub use crate::models::{MonitoredTarget, SubscriberDirectory};
pub use crate::scheduler::{MonitoringScheduler, TargetPhase, TargetStatus};
pub use crate::scraper::{FetchMethod, FetchStrategyChain, ScrapeOutcome};
pub use crate::utils::error::{AppError, Result};
