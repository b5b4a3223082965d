//! Error taxonomy for the digest pipeline.
//!
//! Article-level failures never abort a run: each stage turns them into log
//! lines or skipped items. Only `DeliveryFailed` reaches the caller.

use thiserror::Error;

/// Raw article that cannot become a canonical `Article`. Dropped, not retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedInput {
    #[error("article has no URL")]
    MissingUrl,

    #[error("unparseable URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported URL scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("article has neither title nor body")]
    EmptyContent,
}

/// One source failed to produce articles; the others still contribute.
#[derive(Debug, Clone, Error)]
#[error("source '{name}' unavailable: {reason}")]
pub struct SourceUnavailable {
    pub name: String,
    pub reason: String,
}

/// Failures reported by a language-model provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LlmError {
    #[error("LLM request timed out: {0}")]
    Timeout(String),

    #[error("LLM rate limited: {0}")]
    RateLimited(String),

    #[error("LLM service error: {0}")]
    Service(String),
}

impl LlmError {
    /// Timeouts and rate limits are worth retrying; anything else is not.
    pub fn is_transient(&self) -> bool {
        matches!(self, LlmError::Timeout(_) | LlmError::RateLimited(_))
    }
}

/// Why an article could not be rated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RatingFailure {
    #[error("model output unparseable after strict retry: {0}")]
    Unparseable(String),

    #[error("transient failures exhausted after {attempts} attempts: {last}")]
    Transient { attempts: u32, last: LlmError },

    #[error("non-transient model failure: {0}")]
    Service(LlmError),

    #[error("run deadline expired before rating completed")]
    Timeout,
}

/// The article is excluded from ranking and kept in the skipped-items log.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rating unavailable for article {article_id}: {cause}")]
pub struct RatingUnavailable {
    pub article_id: String,
    pub cause: RatingFailure,
}

/// The digest was built but could not be handed over.
#[derive(Debug, Clone, Error)]
#[error("delivery via '{channel}' failed: {reason}")]
pub struct DeliveryFailed {
    pub channel: String,
    pub reason: String,
}
