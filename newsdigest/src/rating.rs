//! Summarizer/rater: asks the language model for a summary and an importance
//! score per article, with bounded retries and bounded concurrency.

use common::RatingConfig;
use futures::stream::{self, StreamExt};
use rand::Rng;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{LlmError, RatingFailure, RatingUnavailable};
use crate::llm::{extract_json_from_text, strip_reasoning, LlmProvider, LlmRequest};
use crate::model::{Article, Rating, ScoredArticle, SkippedItem};

const MAX_BACKOFF_MS: f64 = 60_000.0;

const STRICT_SUFFIX: &str = "\nIMPORTANT: your previous answer could not be parsed. \
Return ONLY the JSON object described above. No markdown fences, no commentary, no reasoning.\n";

/// Per-article progress through the retry protocol.
#[derive(Debug)]
enum AttemptState {
    Pending,
    Attempting { strict: bool },
    Retrying { delay: Duration, strict: bool },
    Succeeded(Rating),
    Failed(RatingFailure),
}

#[derive(Debug, Default, Clone, Copy)]
struct AttemptLog {
    calls: u32,
    transient_failures: u32,
    parse_failures: u32,
}

#[derive(Debug)]
enum AttemptError {
    Llm(LlmError),
    Unparseable(String),
}

/// Result of rating a batch. `scored` and `skipped` follow input order.
#[derive(Debug, Default)]
pub struct RatingOutcome {
    pub scored: Vec<ScoredArticle>,
    pub skipped: Vec<SkippedItem>,
    /// The deadline expired before every rating finished
    pub deadline_hit: bool,
}

pub struct Rater {
    provider: Arc<dyn LlmProvider>,
    config: RatingConfig,
}

impl Rater {
    pub fn new(provider: Arc<dyn LlmProvider>, config: RatingConfig) -> Self {
        Self { provider, config }
    }

    /// Rate one article.
    ///
    /// Unparseable output gets exactly one stricter retry. Timeouts and rate
    /// limits are retried with exponential backoff until `max_attempts`
    /// transient failures; other provider errors fail at once.
    pub async fn rate(&self, article: &Article) -> Result<Rating, RatingUnavailable> {
        let mut log = AttemptLog::default();
        let mut state = AttemptState::Pending;

        loop {
            state = match state {
                AttemptState::Pending => AttemptState::Attempting { strict: false },
                AttemptState::Attempting { strict } => {
                    log.calls += 1;
                    match self.attempt(article, strict).await {
                        Ok(rating) => AttemptState::Succeeded(rating),
                        Err(err) => {
                            warn!(id = %article.id, call = log.calls, error = ?err, "rating attempt failed");
                            next_state(&self.config, &mut log, err, strict)
                        }
                    }
                }
                AttemptState::Retrying { delay, strict } => {
                    debug!(id = %article.id, ?delay, "backing off before retry");
                    tokio::time::sleep(delay).await;
                    AttemptState::Attempting { strict }
                }
                AttemptState::Succeeded(rating) => {
                    debug!(id = %article.id, importance = rating.importance, calls = log.calls, "article rated");
                    return Ok(rating);
                }
                AttemptState::Failed(cause) => {
                    return Err(RatingUnavailable {
                        article_id: article.id.clone(),
                        cause,
                    })
                }
            };
        }
    }

    async fn attempt(&self, article: &Article, strict: bool) -> Result<Rating, AttemptError> {
        let prompt = build_prompt(article, self.config.body_char_budget, strict);
        let response = self
            .provider
            .generate(LlmRequest {
                prompt,
                max_tokens: Some(self.config.max_tokens),
                temperature: Some(self.config.temperature),
                timeout_seconds: None,
            })
            .await
            .map_err(AttemptError::Llm)?;

        parse_rating(&article.id, &response.content).map_err(AttemptError::Unparseable)
    }

    /// Rate a batch with at most `concurrency` calls in flight.
    ///
    /// When `deadline` passes, unfinished ratings are abandoned and reported
    /// as skipped with `RatingFailure::Timeout`. Article ids are expected to
    /// be unique.
    pub async fn rate_all(&self, articles: Vec<Article>, deadline: Instant) -> RatingOutcome {
        let concurrency = self.config.concurrency.max(1);
        let started = Instant::now();
        let mut ratings: HashMap<String, Rating> = HashMap::new();
        let mut failures: HashMap<String, RatingFailure> = HashMap::new();
        let mut deadline_hit = false;

        info!(count = articles.len(), concurrency, "rating articles");

        {
            let mut results = stream::iter(articles.iter())
                .map(|article| async move { (article.id.clone(), self.rate(article).await) })
                .buffer_unordered(concurrency);

            loop {
                match tokio::time::timeout_at(deadline, results.next()).await {
                    Ok(Some((id, Ok(rating)))) => {
                        ratings.insert(id, rating);
                    }
                    Ok(Some((id, Err(e)))) => {
                        warn!(id = %id, cause = %e.cause, "rating unavailable, article skipped");
                        failures.insert(id, e.cause);
                    }
                    Ok(None) => break,
                    Err(_) => {
                        deadline_hit = true;
                        warn!(
                            completed = ratings.len() + failures.len(),
                            total = articles.len(),
                            "run deadline expired, abandoning in-flight ratings"
                        );
                        break;
                    }
                }
            }
        }

        let mut outcome = RatingOutcome {
            deadline_hit,
            ..RatingOutcome::default()
        };
        for article in articles {
            match ratings.remove(&article.id) {
                Some(rating) => outcome.scored.push(ScoredArticle { article, rating }),
                None => {
                    let reason = failures.remove(&article.id).unwrap_or(RatingFailure::Timeout);
                    outcome.skipped.push(SkippedItem { article, reason });
                }
            }
        }

        info!(
            rated = outcome.scored.len(),
            skipped = outcome.skipped.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "rating finished"
        );
        outcome
    }
}

/// Transition after a failed attempt.
fn next_state(config: &RatingConfig, log: &mut AttemptLog, err: AttemptError, strict: bool) -> AttemptState {
    match err {
        AttemptError::Unparseable(detail) => {
            log.parse_failures += 1;
            if log.parse_failures >= 2 {
                AttemptState::Failed(RatingFailure::Unparseable(detail))
            } else {
                AttemptState::Attempting { strict: true }
            }
        }
        AttemptError::Llm(e) if e.is_transient() => {
            log.transient_failures += 1;
            if log.transient_failures >= config.max_attempts.max(1) {
                AttemptState::Failed(RatingFailure::Transient {
                    attempts: log.transient_failures,
                    last: e,
                })
            } else {
                AttemptState::Retrying {
                    delay: backoff_delay(config, log.transient_failures),
                    strict,
                }
            }
        }
        AttemptError::Llm(e) => AttemptState::Failed(RatingFailure::Service(e)),
    }
}

/// Exponential backoff for the n-th transient failure (1-based), plus up to 25% jitter.
fn backoff_delay(config: &RatingConfig, failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(30) as i32;
    let base = config.backoff_base_ms as f64 * config.backoff_multiplier.max(1.0).powi(exponent);
    let capped = base.min(MAX_BACKOFF_MS);
    let jitter = if capped > 0.0 {
        rand::thread_rng().gen_range(0.0..capped * 0.25)
    } else {
        0.0
    };
    Duration::from_millis((capped + jitter) as u64)
}

/// First `max_chars` characters of `s`, never splitting a character.
fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn build_prompt(article: &Article, body_char_budget: usize, strict: bool) -> String {
    let body = truncate_chars(&article.body, body_char_budget);
    let mut prompt = format!(
        r#"You are a tech news editor preparing a digest for software engineers.
Summarize the article below and rate how important it is.

Consider:
1. Technical significance and innovation
2. Industry impact and potential disruption
3. Relevance to software engineers and tech professionals
4. Long-term implications for the tech industry

OUTPUT FORMAT (strict JSON):
{{
  "summary": "2-3 sentence summary in the article's language",
  "importance": 0-100 integer, 100 = must read,
  "rationale": "one sentence explaining the score"
}}

Title: {}
Source: {}
Content:
{}
"#,
        article.title, article.source, body
    );
    if strict {
        prompt.push_str(STRICT_SUFFIX);
    }
    prompt
}

#[derive(Debug, Deserialize)]
struct RatingJson {
    summary: String,
    #[serde(default)]
    importance: Option<serde_json::Value>,
    #[serde(default)]
    rationale: Option<String>,
}

/// Parse model output into a rating. The error string describes what was wrong.
fn parse_rating(article_id: &str, text: &str) -> Result<Rating, String> {
    let cleaned = strip_reasoning(text);
    let json = extract_json_from_text(&cleaned).ok_or_else(|| "no JSON object in model output".to_string())?;
    let parsed: RatingJson =
        serde_json::from_str(&json).map_err(|e| format!("invalid rating JSON: {}", e))?;

    let summary = parsed.summary.trim();
    if summary.is_empty() {
        return Err("empty summary".to_string());
    }

    let importance = parsed
        .importance
        .as_ref()
        .and_then(coerce_importance)
        .ok_or_else(|| "missing or non-numeric importance".to_string())?;

    Ok(Rating {
        article_id: article_id.to_string(),
        summary: summary.to_string(),
        importance,
        rationale: parsed
            .rationale
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty()),
    })
}

/// Accept numbers or numeric strings; round and clamp into 0..=100.
fn coerce_importance(value: &serde_json::Value) -> Option<u8> {
    let n = match value {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !n.is_finite() {
        return None;
    }
    Some(n.round().clamp(0.0, 100.0) as u8)
}
