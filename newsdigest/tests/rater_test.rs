use chrono::{Duration as ChronoDuration, Utc};
use common::RatingConfig;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use newsdigest::error::{LlmError, RatingFailure};
use newsdigest::llm::{LlmProvider, LlmRequest, LlmResponse, UsageMetadata};
use newsdigest::model::Article;
use newsdigest::rating::Rater;

type Reply = Result<String, LlmError>;

/// Replies are scripted per article title; the last reply repeats once the script runs out.
#[derive(Default)]
struct ScriptedProvider {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    delays: HashMap<String, Duration>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn script(self, title: &str, replies: Vec<Reply>) -> Self {
        self.scripts.lock().unwrap().insert(title.to_string(), replies.into());
        self
    }

    fn delay(mut self, title: &str, delay: Duration) -> Self {
        self.delays.insert(title.to_string(), delay);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let title = request
            .prompt
            .lines()
            .find_map(|l| l.strip_prefix("Title: "))
            .unwrap_or_default()
            .to_string();

        if let Some(delay) = self.delays.get(&title) {
            tokio::time::sleep(*delay).await;
        }

        let reply = {
            let mut scripts = self.scripts.lock().unwrap();
            let queue = scripts.get_mut(&title).expect("no script for title");
            if queue.len() > 1 {
                queue.pop_front().unwrap()
            } else {
                queue.front().cloned().unwrap()
            }
        };

        reply.map(|content| LlmResponse {
            content,
            usage: UsageMetadata::default(),
            model: "scripted".to_string(),
        })
    }
}

fn ok(importance: u8) -> Reply {
    Ok(format!(r#"{{"summary": "summary", "importance": {}, "rationale": "because"}}"#, importance))
}

fn article(id: &str) -> Article {
    Article {
        id: id.to_string(),
        title: id.to_string(),
        body: format!("body of {}", id),
        source: "test".to_string(),
        published_at: Utc::now() - ChronoDuration::hours(1),
        url: format!("https://example.com/{}", id),
    }
}

fn fast_config() -> RatingConfig {
    RatingConfig {
        max_attempts: 3,
        backoff_base_ms: 1,
        ..RatingConfig::default()
    }
}

fn far_deadline() -> Instant {
    Instant::now() + Duration::from_secs(30)
}

#[tokio::test]
async fn test_malformed_json_twice_is_skipped() {
    let provider = Arc::new(
        ScriptedProvider::default()
            .script("bad", vec![Ok("not json at all".into()), Ok("still {not json".into())])
            .script("good", vec![ok(80)]),
    );
    let rater = Rater::new(provider.clone(), fast_config());

    let outcome = rater.rate_all(vec![article("bad"), article("good")], far_deadline()).await;

    assert_eq!(outcome.scored.len(), 1);
    assert_eq!(outcome.scored[0].article.id, "good");
    assert_eq!(outcome.skipped.len(), 1);
    assert_eq!(outcome.skipped[0].article.id, "bad");
    assert!(matches!(outcome.skipped[0].reason, RatingFailure::Unparseable(_)));
    assert!(!outcome.deadline_hit);
    // One strict retry for the bad article, one call for the good one
    assert_eq!(provider.calls(), 3);
}

#[tokio::test]
async fn test_strict_retry_recovers() {
    let provider = Arc::new(ScriptedProvider::default().script("a", vec![Ok("Sure! Here you go.".into()), ok(64)]));
    let rater = Rater::new(provider.clone(), fast_config());

    let rating = rater.rate(&article("a")).await.unwrap();
    assert_eq!(rating.importance, 64);
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn test_transient_failures_bounded_by_max_attempts() {
    let provider = Arc::new(
        ScriptedProvider::default().script("a", vec![Err(LlmError::RateLimited("429".into()))]),
    );
    let rater = Rater::new(provider.clone(), fast_config());

    let err = rater.rate(&article("a")).await.unwrap_err();
    assert_eq!(err.article_id, "a");
    assert!(matches!(err.cause, RatingFailure::Transient { attempts: 3, .. }));
    assert_eq!(provider.calls(), 3);
}

#[tokio::test]
async fn test_transient_then_success() {
    let provider = Arc::new(ScriptedProvider::default().script(
        "a",
        vec![
            Err(LlmError::Timeout("slow".into())),
            Err(LlmError::RateLimited("429".into())),
            ok(91),
        ],
    ));
    let rater = Rater::new(provider.clone(), fast_config());

    let rating = rater.rate(&article("a")).await.unwrap();
    assert_eq!(rating.importance, 91);
    assert_eq!(rating.article_id, "a");
    assert_eq!(provider.calls(), 3);
}

#[tokio::test]
async fn test_service_error_is_not_retried() {
    let provider = Arc::new(
        ScriptedProvider::default().script("a", vec![Err(LlmError::Service("401 unauthorized".into()))]),
    );
    let rater = Rater::new(provider.clone(), fast_config());

    let err = rater.rate(&article("a")).await.unwrap_err();
    assert!(matches!(err.cause, RatingFailure::Service(_)));
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_results_follow_input_order() {
    let provider = Arc::new(
        ScriptedProvider::default()
            .script("slow", vec![ok(10)])
            .script("mid", vec![ok(20)])
            .script("fast", vec![ok(30)])
            .delay("slow", Duration::from_millis(200))
            .delay("mid", Duration::from_millis(100)),
    );
    let rater = Rater::new(provider, fast_config());

    let outcome = rater
        .rate_all(vec![article("slow"), article("mid"), article("fast")], far_deadline())
        .await;

    let ids: Vec<&str> = outcome.scored.iter().map(|s| s.article.id.as_str()).collect();
    assert_eq!(ids, vec!["slow", "mid", "fast"]);
    let importances: Vec<u8> = outcome.scored.iter().map(|s| s.rating.importance).collect();
    assert_eq!(importances, vec![10, 20, 30]);
}

#[tokio::test]
async fn test_deadline_abandons_unfinished_ratings() {
    let provider = Arc::new(
        ScriptedProvider::default()
            .script("a", vec![ok(50)])
            .script("b", vec![ok(60)])
            .script("c", vec![ok(70)])
            .script("d", vec![ok(80)])
            .script("e", vec![ok(90)])
            .delay("d", Duration::from_secs(30))
            .delay("e", Duration::from_secs(30)),
    );
    let rater = Rater::new(provider, fast_config());

    let articles = ["a", "b", "c", "d", "e"].iter().map(|id| article(id)).collect();
    let outcome = rater.rate_all(articles, Instant::now() + Duration::from_millis(500)).await;

    assert!(outcome.deadline_hit);
    assert_eq!(outcome.scored.len(), 3);
    let skipped: Vec<&str> = outcome.skipped.iter().map(|s| s.article.id.as_str()).collect();
    assert_eq!(skipped, vec!["d", "e"]);
    assert!(outcome.skipped.iter().all(|s| s.reason == RatingFailure::Timeout));
}

/// Tracks how many generate calls are running at the same time.
#[derive(Default)]
struct InFlightProvider {
    in_flight: AtomicUsize,
    max_seen: AtomicUsize,
}

#[async_trait::async_trait]
impl LlmProvider for InFlightProvider {
    async fn generate(&self, _request: LlmRequest) -> Result<LlmResponse, LlmError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        Ok(LlmResponse {
            content: r#"{"summary": "summary", "importance": 70, "rationale": "because"}"#.to_string(),
            usage: UsageMetadata::default(),
            model: "in-flight".to_string(),
        })
    }
}

#[tokio::test]
async fn test_concurrency_limit_is_respected() {
    let provider = Arc::new(InFlightProvider::default());
    let config = RatingConfig {
        concurrency: 3,
        ..fast_config()
    };
    let rater = Rater::new(provider.clone(), config);

    let articles: Vec<Article> = (0..10).map(|i| article(&format!("a{}", i))).collect();
    let outcome = rater.rate_all(articles, far_deadline()).await;

    assert_eq!(outcome.scored.len(), 10);
    assert!(outcome.skipped.is_empty());
    let max = provider.max_seen.load(Ordering::SeqCst);
    assert!(max <= 3, "saw {} calls in flight", max);
    assert!(max > 1, "calls never overlapped");
    assert_eq!(provider.in_flight.load(Ordering::SeqCst), 0);
}
