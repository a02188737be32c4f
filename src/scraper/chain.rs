use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::detection;
use super::error::{FetchError, FetchResult};
use super::{FetchMethod, FetchRequest, FetchStrategy, FetchedPage, ScrapeOutcome};
use crate::core::hasher::{ContentHasher, Fingerprint};
use crate::core::retry::{RetryPolicy, RetryState};

/// Strategies tried in order until one yields a usable fingerprint.
pub struct FetchStrategyChain {
    strategies: Vec<Arc<dyn FetchStrategy>>,
    retry: RetryPolicy,
    hasher: ContentHasher,
}

impl FetchStrategyChain {
    pub fn new(strategies: Vec<Arc<dyn FetchStrategy>>, retry: RetryPolicy, hasher: ContentHasher) -> Self {
        Self {
            strategies,
            retry,
            hasher,
        }
    }

    pub fn methods(&self) -> Vec<FetchMethod> {
        self.strategies.iter().map(|s| s.method()).collect()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub async fn fetch(&self, request: &FetchRequest, cancel: &CancellationToken) -> ScrapeOutcome {
        self.run(request, cancel, None).await
    }

    /// Like `fetch`, but the whole pass ends within `budget`. Each strategy gets
    /// an even share of the time left when it starts, so a hung strategy times
    /// out and escalates instead of eating the whole check.
    pub async fn fetch_within(
        &self,
        request: &FetchRequest,
        cancel: &CancellationToken,
        budget: Duration,
    ) -> ScrapeOutcome {
        self.run(request, cancel, Some(tokio::time::Instant::now() + budget))
            .await
    }

    async fn run(
        &self,
        request: &FetchRequest,
        cancel: &CancellationToken,
        deadline: Option<tokio::time::Instant>,
    ) -> ScrapeOutcome {
        let started = Instant::now();
        let mut attempts = 0u32;
        let mut last_failure: Option<(FetchMethod, FetchError)> = None;

        for (index, strategy) in self.strategies.iter().enumerate() {
            let method = strategy.method();
            let attempt = self.run_strategy(strategy.as_ref(), request, cancel, &mut attempts);
            let result = match deadline {
                None => attempt.await,
                Some(deadline) => {
                    let left = u32::try_from(self.strategies.len() - index).unwrap_or(u32::MAX);
                    let share = deadline.saturating_duration_since(tokio::time::Instant::now()) / left;
                    tokio::time::timeout(share, attempt).await.unwrap_or_else(|_| {
                        Err(FetchError::Timeout(format!(
                            "{} gave no result within {}s",
                            method,
                            share.as_secs()
                        )))
                    })
                }
            };

            match result {
                Ok((fingerprint, page)) => {
                    let memory = page.body.len() as u64 + strategy.memory_overhead_bytes();
                    info!(
                        target_id = %request.target_id,
                        method = %method,
                        attempts,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Fetch succeeded"
                    );
                    return ScrapeOutcome::succeeded(
                        request,
                        method,
                        fingerprint,
                        &page,
                        started.elapsed(),
                        memory,
                        attempts,
                    );
                }
                Err(error) => {
                    let escalates = error.escalates();
                    warn!(
                        target_id = %request.target_id,
                        method = %method,
                        kind = %error.kind(),
                        error = %error,
                        escalates,
                        "Fetch strategy failed"
                    );
                    last_failure = Some((method, error));
                    if !escalates {
                        break;
                    }
                }
            }
        }

        let (method, error) = last_failure.unwrap_or_else(|| {
            (
                FetchMethod::Http,
                FetchError::FatalConfig {
                    reason: "No fetch strategies configured".to_string(),
                },
            )
        });
        ScrapeOutcome::failed(request, method, &error, started.elapsed(), attempts)
    }

    /// One strategy with its local retries. Every page passes block detection
    /// and fingerprinting before it counts as a success.
    async fn run_strategy(
        &self,
        strategy: &dyn FetchStrategy,
        request: &FetchRequest,
        cancel: &CancellationToken,
        attempts: &mut u32,
    ) -> FetchResult<(Fingerprint, FetchedPage)> {
        let mut state = RetryState::new();

        loop {
            *attempts += 1;
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(FetchError::Cancelled),
                result = strategy.fetch(request) => result,
            };

            let result = fetched.and_then(detection::check_page).and_then(|page| {
                let fingerprint = self.hasher.fingerprint(&page.body, request.selector.as_deref())?;
                Ok((fingerprint, page))
            });

            let error = match result {
                Ok(success) => return Ok(success),
                Err(error) => error,
            };

            if !self.retry.should_retry(state.attempt, &error) {
                return Err(error);
            }

            let delay = self.retry.jittered_delay(state.attempt);
            state.record_backoff(delay);
            debug!(
                target_id = %request.target_id,
                method = %strategy.method(),
                retry = state.attempt,
                delay_ms = delay.as_millis() as u64,
                backoff_total_ms = state.elapsed.as_millis() as u64,
                error = %error,
                "Retrying after backoff"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    pub async fn start(&self) {
        for strategy in &self.strategies {
            strategy.start().await;
        }
    }

    /// Releases strategy resources. Called once on scheduler stop.
    pub async fn shutdown(&self) {
        for strategy in &self.strategies {
            strategy.shutdown().await;
        }
    }
}
