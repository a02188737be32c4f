use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::hasher::Fingerprint;
use crate::scraper::FetchMethod;

/// How far a diff can be trusted, derived from the strategy that produced the content.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    High,
    VeryHigh,
}

impl Confidence {
    pub fn for_method(method: FetchMethod) -> Self {
        match method {
            FetchMethod::Http => Confidence::VeryHigh,
            FetchMethod::DomFallback => Confidence::High,
            // Rendering variance in a real browser produces spurious diffs.
            FetchMethod::BrowserFallback => Confidence::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::High => "high",
            Confidence::VeryHigh => "very_high",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiffResult {
    pub has_new_content: bool,
    pub confidence: Confidence,
    pub previous: Option<Fingerprint>,
    pub current: Fingerprint,
    pub method: FetchMethod,
}

impl DiffResult {
    /// First observation of a target: the fingerprint becomes the baseline.
    pub fn is_baseline(&self) -> bool {
        self.previous.is_none()
    }
}

pub struct DiffDetector;

impl DiffDetector {
    pub fn compare(
        previous: Option<&Fingerprint>,
        current: &Fingerprint,
        method: FetchMethod,
    ) -> DiffResult {
        let (has_new_content, confidence) = match previous {
            None => (false, Confidence::High),
            Some(previous) => (previous != current, Confidence::for_method(method)),
        };

        DiffResult {
            has_new_content,
            confidence,
            previous: previous.cloned(),
            current: current.clone(),
            method,
        }
    }
}

/// Gate between a detected change and a new-content notification.
///
/// With the default `Low` threshold every change is notified and confidence stays informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifyPolicy {
    pub min_confidence: Confidence,
}

impl NotifyPolicy {
    pub fn new(min_confidence: Confidence) -> Self {
        Self { min_confidence }
    }

    pub fn should_notify(&self, diff: &DiffResult) -> bool {
        diff.has_new_content && diff.confidence >= self.min_confidence
    }
}

impl Default for NotifyPolicy {
    fn default() -> Self {
        Self::new(Confidence::Low)
    }
}
