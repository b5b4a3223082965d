use std::cmp::Ordering;
use tracing::info;

use crate::model::ScoredArticle;

/// Pick the digest items: drop everything below `min_importance`, order by
/// importance, then recency, then id, and keep the first `max_items`.
pub fn select(mut scored: Vec<ScoredArticle>, max_items: usize, min_importance: f64) -> Vec<ScoredArticle> {
    let total = scored.len();
    scored.retain(|s| f64::from(s.rating.importance) >= min_importance);
    let eligible = scored.len();

    scored.sort_by(rank_order);
    scored.truncate(max_items);

    info!(total, eligible, selected = scored.len(), min_importance, max_items, "selection finished");
    scored
}

/// Total order used for ranking; `Less` means "comes first".
fn rank_order(a: &ScoredArticle, b: &ScoredArticle) -> Ordering {
    b.rating
        .importance
        .cmp(&a.rating.importance)
        .then_with(|| b.article.published_at.cmp(&a.article.published_at))
        .then_with(|| a.article.id.cmp(&b.article.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Article, Rating};
    use chrono::{Duration, TimeZone, Utc};

    fn scored(id: &str, importance: u8, minutes: i64) -> ScoredArticle {
        ScoredArticle {
            article: Article {
                id: id.into(),
                title: format!("title {}", id),
                body: String::new(),
                source: "test".into(),
                published_at: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes),
                url: format!("https://e.com/{}", id),
            },
            rating: Rating {
                article_id: id.into(),
                summary: "s".into(),
                importance,
                rationale: None,
            },
        }
    }

    fn ids(v: &[ScoredArticle]) -> Vec<&str> {
        v.iter().map(|s| s.article.id.as_str()).collect()
    }

    #[test]
    fn orders_by_importance_then_recency_then_id() {
        let input = vec![
            scored("c", 85, 10),
            scored("a", 40, 0),
            scored("b", 85, 20),
            scored("e", 85, 10),
            scored("d", 95, 0),
        ];
        let out = select(input, 10, 30.0);
        assert_eq!(ids(&out), vec!["d", "b", "c", "e", "a"]);
    }

    #[test]
    fn newer_article_wins_an_importance_tie() {
        let out = select(vec![scored("old", 85, 0), scored("new", 85, 60)], 10, 0.0);
        assert_eq!(ids(&out), vec!["new", "old"]);
    }

    #[test]
    fn filters_below_minimum_and_truncates() {
        let input = vec![scored("a", 29, 0), scored("b", 30, 0), scored("c", 90, 0), scored("d", 70, 0)];
        let out = select(input, 2, 30.0);
        assert_eq!(ids(&out), vec!["c", "d"]);
    }

    #[test]
    fn boundaries_yield_empty() {
        let input = vec![scored("a", 100, 0), scored("b", 50, 0)];
        assert!(select(input.clone(), 0, 0.0).is_empty());
        assert!(select(input, 10, 101.0).is_empty());
    }

    #[test]
    fn selection_is_independent_of_input_order() {
        let input = vec![scored("a", 50, 5), scored("b", 50, 5), scored("c", 70, 1), scored("d", 50, 9)];
        let mut reversed = input.clone();
        reversed.reverse();
        assert_eq!(select(input, 3, 0.0), select(reversed, 3, 0.0));
    }
}
