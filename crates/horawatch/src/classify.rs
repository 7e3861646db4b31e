//! Page classification: turns raw page content into a typed [`Outcome`].
//!
//! The priority order is a deliberate tie-break. Explicit error banners are
//! the most specific signal and win over keyword heuristics, which in turn
//! win over structural probing, the weakest evidence. Classification is
//! total: any fault while probing collapses into `Error { Unknown }` rather
//! than propagating.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::errors::WatchError;
use crate::rules::ClassifierRules;

static TAG_STRIP: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());

/// Why a page counted as unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContentReason {
    /// The site redirected to its dedicated "no hours" URL.
    NoAvailabilityRedirect,
    /// A no-availability keyword appeared in the page body.
    ContentKeyword,
}

/// Category of an explicit error marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// Session expiry / "maximum wait time exceeded" banners.
    Timeout,
    /// An error banner that itself says no hours exist.
    NoAvailability,
    /// Errors reported on the specialties status page.
    StatusPage,
    Unknown,
}

impl ErrorKind {
    /// Transient kinds are always retried, never surfaced as fatal.
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::StatusPage)
    }
}

/// How availability was inferred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AvailabilityEvidence {
    /// A known availability keyword appeared in the content.
    Keyword(String),
    /// A next-step control (date picker, calendar, time selector) rendered.
    /// Weaker evidence than a keyword match.
    NextStepControl(String),
}

/// The classified verdict for one observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Verdict {
    Available { evidence: AvailabilityEvidence },
    Unavailable { reason: ContentReason },
    Error { kind: ErrorKind, raw_messages: Vec<String> },
    Uncertain,
}

/// One observation of the slot-listing flow. Produced fresh on every
/// classification call and never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub verdict: Verdict,
    pub url: String,
    pub observed_at: DateTime<Utc>,
    pub message: String,
}

impl Outcome {
    pub fn new(verdict: Verdict, url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            verdict,
            url: url.into(),
            observed_at: Utc::now(),
            message: message.into(),
        }
    }

    pub fn error(kind: ErrorKind, url: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(
            Verdict::Error { kind, raw_messages: vec![message.clone()] },
            url,
            message,
        )
    }

    pub fn is_available(&self) -> bool {
        matches!(self.verdict, Verdict::Available { .. })
    }

    /// Whether this outcome should feed the retry path rather than a decision.
    pub fn is_transient_error(&self) -> bool {
        matches!(self.verdict, Verdict::Error { kind, .. } if kind.is_transient())
    }
}

/// Structural access to the live DOM, needed where raw HTML is not enough.
#[async_trait]
pub trait DomProbe: Send + Sync {
    /// Visible text content of elements matching any of the selectors.
    async fn visible_texts(&self, selectors: &[String]) -> Result<Vec<String>, WatchError>;

    /// The first of `selectors` that currently matches an element, if any.
    async fn first_present(&self, selectors: &[String]) -> Result<Option<String>, WatchError>;
}

pub struct Classifier {
    rules: ClassifierRules,
    error_patterns: Vec<Regex>,
}

impl Classifier {
    pub fn new(rules: ClassifierRules) -> Result<Self, WatchError> {
        let error_patterns = rules
            .error_patterns
            .iter()
            .map(|source| {
                Regex::new(source).map_err(|e| {
                    WatchError::InvalidConfig(format!("bad error pattern {source:?}: {e}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules, error_patterns })
    }

    pub fn rules(&self) -> &ClassifierRules {
        &self.rules
    }

    /// Classify the current page. Total: internal faults become
    /// `Error { Unknown }`, never a propagated error.
    pub async fn classify(&self, url: &str, html: &str, probe: &dyn DomProbe) -> Outcome {
        // 1. Definitive no-availability redirect.
        if url.contains(&self.rules.no_availability_url_pattern) {
            debug!(url, "no-availability redirect detected");
            return Outcome::new(
                Verdict::Unavailable { reason: ContentReason::NoAvailabilityRedirect },
                url,
                "site redirected to its no-hours page",
            );
        }

        // 2. Explicit error markers outrank everything else.
        let markers = self.collect_error_markers(html, probe).await;
        if !markers.is_empty() {
            let kind = self.categorize_markers(&markers);
            let message = markers.first().cloned().unwrap_or_default();
            debug!(?kind, count = markers.len(), "error markers detected");
            return Outcome::new(
                Verdict::Error { kind, raw_messages: markers },
                url,
                message,
            );
        }

        let content = html.to_lowercase();

        // 3. No-availability keywords.
        for keyword in &self.rules.no_availability_keywords {
            if content.contains(keyword.as_str()) {
                debug!(%keyword, "no-availability keyword detected");
                return Outcome::new(
                    Verdict::Unavailable { reason: ContentReason::ContentKeyword },
                    url,
                    format!("detected in content: {keyword}"),
                );
            }
        }

        // 4. Availability keywords.
        for keyword in &self.rules.availability_keywords {
            if content.contains(keyword.as_str()) {
                debug!(%keyword, "availability keyword detected");
                return Outcome::new(
                    Verdict::Available {
                        evidence: AvailabilityEvidence::Keyword(keyword.clone()),
                    },
                    url,
                    format!("availability detected: {keyword}"),
                );
            }
        }

        // 5. Structural probe for next-step controls.
        match probe.first_present(&self.rules.next_step_selectors).await {
            Ok(Some(selector)) => {
                debug!(%selector, "next-step control present");
                return Outcome::new(
                    Verdict::Available {
                        evidence: AvailabilityEvidence::NextStepControl(selector.clone()),
                    },
                    url,
                    format!("next-step control found: {selector}"),
                );
            }
            Ok(None) => {}
            Err(e) => {
                warn!("structural probe failed: {e}");
                return Outcome::error(ErrorKind::Unknown, url, format!("probe failed: {e}"));
            }
        }

        // 6. Nothing recognizable.
        Outcome::new(Verdict::Uncertain, url, "availability could not be determined")
    }

    /// Gather explicit error strings from marker elements and banner patterns.
    async fn collect_error_markers(&self, html: &str, probe: &dyn DomProbe) -> Vec<String> {
        let mut markers: Vec<String> = Vec::new();

        match probe.visible_texts(&self.rules.error_text_selectors).await {
            Ok(texts) => {
                for text in texts {
                    let text = text.trim().to_string();
                    if !text.is_empty() && !markers.contains(&text) {
                        markers.push(text);
                    }
                }
            }
            Err(e) => warn!("error-marker probe failed, falling back to patterns only: {e}"),
        }

        for pattern in &self.error_patterns {
            for m in pattern.find_iter(html) {
                let clean = TAG_STRIP.replace_all(m.as_str(), "").trim().to_string();
                if !clean.is_empty() && !markers.contains(&clean) {
                    markers.push(clean);
                }
            }
        }

        markers
    }

    /// First matching category wins: timeout phrasing, then no-availability
    /// phrasing, then unknown.
    fn categorize_markers(&self, markers: &[String]) -> ErrorKind {
        let joined = markers.join(" ").to_lowercase();

        if self.rules.timeout_phrases.iter().any(|p| joined.contains(p.as_str())) {
            ErrorKind::Timeout
        } else if self
            .rules
            .no_availability_phrases
            .iter()
            .any(|p| joined.contains(p.as_str()))
        {
            ErrorKind::NoAvailability
        } else {
            ErrorKind::Unknown
        }
    }
}
