use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RatingFailure;

/// Article as delivered by a source adapter, before any cleanup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawArticle {
    /// Name of the source that produced it (e.g. "Inside Java")
    pub source: String,
    pub title: String,
    /// Body or snippet, possibly HTML
    pub body: String,
    pub url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
}

/// Canonical article. `id` is derived from `url` and nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub title: String,
    pub body: String,
    pub source: String,
    pub published_at: DateTime<Utc>,
    /// Normalized URL
    pub url: String,
}

/// Model-produced summary and importance for one article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rating {
    pub article_id: String,
    pub summary: String,
    /// 0..=100
    pub importance: u8,
    pub rationale: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoredArticle {
    pub article: Article,
    pub rating: Rating,
}

/// Terminal output of a run, handed to a delivery channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Digest {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub items: Vec<ScoredArticle>,
}

impl Digest {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

/// Article excluded from ranking because it could not be rated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedItem {
    pub article: Article,
    #[serde(serialize_with = "serialize_failure")]
    pub reason: RatingFailure,
}

fn serialize_failure<S: serde::Serializer>(f: &RatingFailure, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&f.to_string())
}
