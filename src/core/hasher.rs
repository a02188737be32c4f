use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::scraper::error::{FetchError, FetchResult};

/// Hex encoded SHA-256 of normalized page content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(normalized: &str) -> Self {
        let digest = Sha256::digest(normalized.as_bytes());
        Fingerprint(hex::encode(digest))
    }

    /// Wraps a digest previously produced by [`Fingerprint::of`], e.g. one loaded from storage.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Fingerprint(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Order matters: whole blocks go first so attribute patterns never see script bodies.
const VOLATILE_PATTERNS: &[&str] = &[
    r"(?is)<script\b[^>]*>.*?</script>",
    r"(?is)<style\b[^>]*>.*?</style>",
    r"(?is)<noscript\b[^>]*>.*?</noscript>",
    r"(?s)<!--.*?-->",
    r#"(?i)<input\b[^>]*type="hidden"[^>]*>"#,
    r#"(?i)\s(?:data-)?(?:csrf[-_]?token|authenticity[-_]token|nonce|integrity|data-reactid|timestamp|request[-_]id|session[-_]?id)="[^"]*""#,
    r"(?i)[?&;](?:sid|sessionid|session_id|jsessionid|phpsessid|_|ts|cb|cachebuster|v)=[\w.\-]*",
    r"\b\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}(?::\d{2}(?:\.\d+)?)?(?:Z|[+-]\d{2}:?\d{2})?",
    r"\b\d{1,2}:\d{2}(?::\d{2})?(?:\s*(?i:am|pm))?\b",
];

pub struct ContentHasher {
    volatile: Vec<Regex>,
}

impl ContentHasher {
    pub fn new() -> Self {
        let volatile = VOLATILE_PATTERNS
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    tracing::error!(pattern, error = %e, "Skipping invalid volatile pattern");
                    None
                }
            })
            .collect();

        Self { volatile }
    }

    pub fn fingerprint(&self, raw: &str, selector: Option<&str>) -> FetchResult<Fingerprint> {
        let content = match selector {
            Some(selector) => Self::extract(raw, selector)?,
            None => raw.to_string(),
        };

        let normalized = self.normalize(&content);
        if normalized.is_empty() {
            return Err(FetchError::extraction(selector));
        }

        Ok(Fingerprint::of(&normalized))
    }

    pub fn fingerprint_bytes(&self, raw: &[u8], selector: Option<&str>) -> FetchResult<Fingerprint> {
        self.fingerprint(&String::from_utf8_lossy(raw), selector)
    }

    /// Parses a CSS selector, mapping failures to a configuration error.
    pub fn parse_selector(selector: &str) -> FetchResult<Selector> {
        Selector::parse(selector).map_err(|e| FetchError::FatalConfig {
            reason: format!("Invalid CSS selector '{}': {:?}", selector, e),
        })
    }

    /// Outer HTML of every element matched by `selector`, joined by newlines.
    ///
    /// Matches that carry no visible text count as missing: client-rendered
    /// containers are empty in static markup and should escalate the fetch.
    pub fn extract(raw: &str, selector: &str) -> FetchResult<String> {
        let css_selector = Self::parse_selector(selector)?;
        let document = Html::parse_document(raw);

        let mut html_parts = Vec::new();
        let mut has_text = false;

        for element in document.select(&css_selector) {
            has_text |= element.text().any(|t| !t.trim().is_empty());
            html_parts.push(element.html());
        }

        if html_parts.is_empty() || !has_text {
            return Err(FetchError::extraction(Some(selector)));
        }

        Ok(html_parts.join("\n"))
    }

    pub fn normalize(&self, content: &str) -> String {
        let mut normalized = content.to_string();
        for pattern in &self.volatile {
            normalized = pattern.replace_all(&normalized, "").into_owned();
        }
        normalized
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .replace("> <", "><")
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}
