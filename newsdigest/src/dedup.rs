use common::DedupConfig;
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

use crate::model::Article;

/// Remove articles that describe the same story.
///
/// Output order follows first occurrence. Within a group of duplicates the
/// survivor is the earliest published article, then the one with the shortest
/// URL, then the first seen. Articles whose id appears in `prior_window` were
/// already handled by an earlier run and are dropped.
pub fn dedupe(articles: Vec<Article>, prior_window: &HashSet<String>, config: &DedupConfig) -> Vec<Article> {
    let total = articles.len();
    let mut slots: Vec<Article> = Vec::with_capacity(total);
    let mut slot_of: HashMap<String, usize> = HashMap::new();
    let mut exact = 0usize;
    let mut prior = 0usize;

    for article in articles {
        if prior_window.contains(&article.id) {
            prior += 1;
            continue;
        }
        match slot_of.get(&article.id) {
            Some(&i) => {
                exact += 1;
                if preferred(&article, &slots[i]) {
                    slots[i] = article;
                }
            }
            None => {
                slot_of.insert(article.id.clone(), slots.len());
                slots.push(article);
            }
        }
    }

    let (kept, near) = collapse_near_duplicates(slots, config.similarity_threshold);

    info!(
        total,
        kept = kept.len(),
        exact_duplicates = exact,
        seen_in_prior_runs = prior,
        near_duplicates = near,
        "deduplication finished"
    );
    kept
}

/// True when `candidate` should replace `current` as a group's survivor.
fn preferred(candidate: &Article, current: &Article) -> bool {
    (candidate.published_at, candidate.url.len()) < (current.published_at, current.url.len())
}

struct Cluster {
    anchor: HashSet<String>,
    survivor: Article,
}

/// Group articles whose titles overlap at or above `threshold` onto the first
/// seen one. Any article whose similarity cannot be computed stays on its own.
fn collapse_near_duplicates(articles: Vec<Article>, threshold: f64) -> (Vec<Article>, usize) {
    if !(threshold > 0.0 && threshold <= 1.0) {
        warn!(threshold, "invalid similarity threshold, skipping near-duplicate detection");
        return (articles, 0);
    }

    let mut clusters: Vec<Cluster> = Vec::with_capacity(articles.len());
    let mut dropped = 0usize;

    for article in articles {
        let tokens = title_tokens(&article.title);
        let hit = clusters
            .iter()
            .position(|c| jaccard(&c.anchor, &tokens).map_or(false, |s| s >= threshold));

        match hit {
            Some(i) => {
                dropped += 1;
                let cluster = &mut clusters[i];
                if preferred(&article, &cluster.survivor) {
                    cluster.survivor = article;
                }
            }
            None => clusters.push(Cluster {
                anchor: tokens,
                survivor: article,
            }),
        }
    }

    (clusters.into_iter().map(|c| c.survivor).collect(), dropped)
}

/// Lower-cased alphanumeric words of a title.
pub fn title_tokens(title: &str) -> HashSet<String> {
    title
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Jaccard overlap of two token sets; `None` when either is empty.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> Option<f64> {
    if a.is_empty() || b.is_empty() {
        return None;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    Some(intersection as f64 / union as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    fn article(id: &str, title: &str, url: &str, minutes: i64) -> Article {
        Article {
            id: id.into(),
            title: title.into(),
            body: String::new(),
            source: "test".into(),
            published_at: t0() + Duration::minutes(minutes),
            url: url.into(),
        }
    }

    #[test]
    fn same_id_keeps_earliest_at_first_position() {
        let later = Article {
            source: "Hacker News".into(),
            ..article("a", "JDK 22 is out", "https://e.com/jdk22", 30)
        };
        let earlier = Article {
            source: "InfoQ".into(),
            ..article("a", "JDK 22 is out", "https://e.com/jdk22", 0)
        };
        let other = article("b", "Spring Boot 3.3 adds CDS support", "https://e.com/boot", 5);

        let out = dedupe(
            vec![later, other.clone(), earlier.clone()],
            &HashSet::new(),
            &DedupConfig::default(),
        );
        assert_eq!(out, vec![earlier, other]);
    }

    #[test]
    fn prior_window_ids_are_dropped() {
        let prior: HashSet<String> = ["a".to_string()].into_iter().collect();
        let out = dedupe(
            vec![
                article("a", "Old news", "https://e.com/a", 0),
                article("b", "New news", "https://e.com/b", 0),
            ],
            &prior,
            &DedupConfig::default(),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "b");
    }

    #[test]
    fn near_duplicate_titles_collapse_to_earliest() {
        let first = article("a", "Kotlin 2.0 released with K2 compiler", "https://blog.e.com/kotlin-2", 20);
        let second = article("b", "Kotlin 2.0 Released with K2 Compiler!", "https://news.e.com/k2", 10);
        let out = dedupe(vec![first, second.clone()], &HashSet::new(), &DedupConfig::default());
        assert_eq!(out, vec![second]);
    }

    #[test]
    fn near_duplicate_tie_breaks_on_shortest_url() {
        let long = article("a", "GraalVM for JDK 22", "https://e.com/very/long/path", 0);
        let short = article("b", "GraalVM for JDK 22", "https://e.com/g", 0);
        let out = dedupe(vec![long, short.clone()], &HashSet::new(), &DedupConfig::default());
        assert_eq!(out, vec![short]);
    }

    #[test]
    fn dissimilar_titles_are_kept() {
        let out = dedupe(
            vec![
                article("a", "Kotlin 2.0 released", "https://e.com/a", 0),
                article("b", "Hibernate 6.5 adds JSON mapping", "https://e.com/b", 0),
            ],
            &HashSet::new(),
            &DedupConfig::default(),
        );
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn empty_titles_never_match() {
        let out = dedupe(
            vec![
                article("a", "", "https://e.com/a", 0),
                article("b", "---", "https://e.com/b", 0),
            ],
            &HashSet::new(),
            &DedupConfig::default(),
        );
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn invalid_threshold_keeps_both() {
        let cfg = DedupConfig {
            similarity_threshold: f64::NAN,
        };
        let out = dedupe(
            vec![
                article("a", "Same title", "https://e.com/a", 0),
                article("b", "Same title", "https://e.com/b", 0),
            ],
            &HashSet::new(),
            &cfg,
        );
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn output_ids_are_unique() {
        let batch: Vec<Article> = (0..20)
            .map(|i| {
                let id = format!("id-{}", i % 7);
                article(&id, &format!("story number {}", i % 7), &format!("https://e.com/{}", i % 7), i)
            })
            .collect();
        let out = dedupe(batch, &HashSet::new(), &DedupConfig::default());
        let ids: HashSet<&str> = out.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids.len(), out.len());
    }

    #[test]
    fn jaccard_of_disjoint_and_identical_sets() {
        let a = title_tokens("Java Records");
        let b = title_tokens("Scala Implicits");
        assert_eq!(jaccard(&a, &b), Some(0.0));
        assert_eq!(jaccard(&a, &a), Some(1.0));
        assert_eq!(jaccard(&a, &HashSet::new()), None);
    }
}
