//! One digest run: fetch, normalize, filter, dedupe, rate, select, compose.
//!
//! Article-level problems are logged and counted in the [`RunReport`]; the
//! run itself always yields a digest, possibly empty. Delivery is a separate
//! step so the caller decides what to do with an empty digest.

use chrono::Utc;
use common::Config;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::dedup::dedupe;
use crate::delivery::{DeliveryChannel, DeliveryReceipt};
use crate::digest::compose;
use crate::error::DeliveryFailed;
use crate::filters::{filter_recent, filter_topics};
use crate::history::RunHistory;
use crate::model::{Digest, RawArticle, SkippedItem};
use crate::normalize::normalize_all;
use crate::rating::Rater;
use crate::select::select;
use crate::sources::SourceAdapter;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every stage finished and every source answered
    Completed,
    /// A digest was built, but some sources failed, some ratings were
    /// unavailable or the deadline cut rating short
    Partial,
    /// No article survived normalization
    EmptyDigest,
    /// The deadline expired before any rating completed
    RunTimedOut,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub fetched: usize,
    pub malformed: usize,
    pub filtered: usize,
    pub duplicates: usize,
    pub rated: usize,
    pub skipped: usize,
    pub failed_sources: Vec<String>,
    pub skipped_items: Vec<SkippedItem>,
    /// Ids recorded in the run history at the end of this run
    pub new_ids: HashSet<String>,
}

#[derive(Debug)]
pub struct RunOutcome {
    pub digest: Digest,
    pub report: RunReport,
    pub status: RunStatus,
}

pub struct Pipeline {
    sources: Vec<Arc<dyn SourceAdapter>>,
    history: Arc<dyn RunHistory>,
    rater: Rater,
    config: Arc<Config>,
}

impl Pipeline {
    pub fn new(
        sources: Vec<Arc<dyn SourceAdapter>>,
        history: Arc<dyn RunHistory>,
        rater: Rater,
        config: Arc<Config>,
    ) -> Self {
        Self {
            sources,
            history,
            rater,
            config,
        }
    }

    /// Execute one run under the configured deadline.
    pub async fn run(&self) -> RunOutcome {
        let deadline = Instant::now() + Duration::from_secs(self.config.run.max_run_seconds);
        let run_id = Uuid::new_v4();
        let mut report = RunReport::default();

        info!(%run_id, sources = self.sources.len(), "starting digest run");

        let raw = self.fetch_all(deadline, &mut report).await;
        report.fetched = raw.len();

        let (articles, malformed) = normalize_all(&raw, &self.config.normalize);
        report.malformed = malformed;
        let normalized_ids: HashSet<String> = articles.iter().map(|a| a.id.clone()).collect();

        if articles.is_empty() {
            warn!(%run_id, fetched = report.fetched, "no article survived normalization");
            return RunOutcome {
                digest: compose(Vec::new(), Utc::now(), run_id),
                report,
                status: RunStatus::EmptyDigest,
            };
        }

        let before_filters = articles.len();
        let articles = filter_recent(articles, Utc::now(), self.config.filters.recent_days);
        let articles = filter_topics(articles, &self.config.filters);
        report.filtered = before_filters - articles.len();

        let window = chrono::Duration::hours(self.config.history.window_hours);
        let prior = match self.history.prior_ids(window).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "run history unavailable, deduplicating within this run only");
                HashSet::new()
            }
        };

        let before_dedup = articles.len();
        let articles = dedupe(articles, &prior, &self.config.dedup);
        report.duplicates = before_dedup - articles.len();

        let rated = self.rater.rate_all(articles, deadline).await;
        report.rated = rated.scored.len();
        report.skipped = rated.skipped.len();

        let status = if rated.deadline_hit && rated.scored.is_empty() {
            RunStatus::RunTimedOut
        } else if rated.deadline_hit || !rated.skipped.is_empty() || !report.failed_sources.is_empty() {
            RunStatus::Partial
        } else {
            RunStatus::Completed
        };

        let selected = select(rated.scored, self.config.digest.max_items, self.config.digest.min_importance);
        let generated_at = Utc::now();
        let digest = compose(selected, generated_at, run_id);

        // Unrated articles stay out of the history so the next run retries them
        let unrated: HashSet<&str> = rated.skipped.iter().map(|s| s.article.id.as_str()).collect();
        report.new_ids = normalized_ids
            .into_iter()
            .filter(|id| !prior.contains(id) && !unrated.contains(id.as_str()))
            .collect();
        report.skipped_items = rated.skipped;

        if let Err(e) = self.history.record(&report.new_ids, generated_at).await {
            error!(error = %format!("{:#}", e), "failed to record run history");
        }

        info!(
            %run_id,
            ?status,
            items = digest.len(),
            fetched = report.fetched,
            malformed = report.malformed,
            filtered = report.filtered,
            duplicates = report.duplicates,
            rated = report.rated,
            skipped = report.skipped,
            "digest run finished"
        );

        RunOutcome { digest, report, status }
    }

    /// Fetch every source concurrently; failures and deadline overruns only
    /// remove that source's contribution.
    async fn fetch_all(&self, deadline: Instant, report: &mut RunReport) -> Vec<RawArticle> {
        let fetches = self.sources.iter().map(|source| async move {
            let result = tokio::time::timeout_at(deadline, source.fetch()).await;
            (source.name().to_string(), result)
        });

        let mut raw = Vec::new();
        for (name, result) in join_all(fetches).await {
            match result {
                Ok(Ok(mut articles)) => raw.append(&mut articles),
                Ok(Err(e)) => {
                    warn!(source = %name, error = %e, "source unavailable, continuing without it");
                    report.failed_sources.push(name);
                }
                Err(_) => {
                    warn!(source = %name, "source did not answer before the run deadline");
                    report.failed_sources.push(name);
                }
            }
        }
        raw
    }
}

/// Hand the digest to a channel. The failure is returned as-is; the digest
/// stays with the caller.
pub async fn deliver(digest: &Digest, channel: &dyn DeliveryChannel) -> Result<DeliveryReceipt, DeliveryFailed> {
    match channel.send(digest).await {
        Ok(receipt) => {
            info!(channel = %receipt.channel, items = digest.len(), "digest delivered");
            Ok(receipt)
        }
        Err(e) => {
            error!(channel = %e.channel, reason = %e.reason, "digest delivery failed");
            Err(e)
        }
    }
}
