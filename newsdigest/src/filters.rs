// Recency and topic filters applied between normalization and deduplication
use chrono::{DateTime, Duration, Utc};
use common::FilterConfig;
use tracing::debug;

use crate::model::Article;

/// Keep articles published within the last `max_age_days` days.
/// `None` or a non-positive value disables the filter.
pub fn filter_recent(articles: Vec<Article>, now: DateTime<Utc>, max_age_days: Option<i64>) -> Vec<Article> {
    let Some(days) = max_age_days.filter(|d| *d > 0) else {
        return articles;
    };
    let cutoff = now - Duration::days(days);

    articles
        .into_iter()
        .filter(|a| {
            let keep = a.published_at >= cutoff;
            if !keep {
                debug!(id = %a.id, published_at = %a.published_at, "dropping stale article");
            }
            keep
        })
        .collect()
}

/// Keep articles matching the configured topic keywords.
pub fn filter_topics(articles: Vec<Article>, config: &FilterConfig) -> Vec<Article> {
    articles.into_iter().filter(|a| matches_topics(a, config)).collect()
}

/// An article matches when it hits one include keyword, or enough related
/// keywords, and no more than `max_exclude_matches` exclude keywords.
pub fn matches_topics(article: &Article, config: &FilterConfig) -> bool {
    let text = format!("{} {}", article.title, article.body).to_lowercase();
    let count = |keywords: &[String]| {
        keywords
            .iter()
            .filter(|k| !k.trim().is_empty() && text.contains(&k.to_lowercase()))
            .count()
    };

    let topical = if config.include_keywords.is_empty() && config.related_keywords.is_empty() {
        true
    } else {
        count(&config.include_keywords) >= 1
            || (!config.related_keywords.is_empty()
                && count(&config.related_keywords) >= config.min_related_matches.max(1))
    };

    topical && count(&config.exclude_keywords) <= config.max_exclude_matches
}
