//! Manual provider check: rates one built-in article through a remote LLM.
//!
//! Reads `OPENAI_API_KEY`, `LLM_BASE_URL` and `LLM_MODEL` from the environment
//! (or a `.env` file).

use chrono::Utc;
use common::RatingConfig;
use std::sync::Arc;

use newsdigest::llm::remote::RemoteLlmProvider;
use newsdigest::model::Article;
use newsdigest::normalize::{normalize_url, stable_id};
use newsdigest::rating::Rater;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();
    let _ = dotenvy::dotenv();

    let api_key = std::env::var("OPENAI_API_KEY")
        .map_err(|_| anyhow::anyhow!("Set OPENAI_API_KEY environment variable"))?;

    // Allow custom base URL or use OpenAI default
    let base_url = std::env::var("LLM_BASE_URL")
        .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string());

    let model = std::env::var("LLM_MODEL")
        .unwrap_or_else(|_| "gpt-4o-mini".to_string());

    println!("\n{}", "=".repeat(60));
    println!("Rating sample article");
    println!("Base URL: {}", base_url);
    println!("Model: {}", model);
    println!("{}", "=".repeat(60));

    let provider = RemoteLlmProvider::new(&base_url, &api_key, &model)
        .with_defaults(30, 400, 0.2);
    let rater = Rater::new(Arc::new(provider), RatingConfig::default());

    let url = normalize_url("https://blog.rust-lang.org/2024/05/02/Rust-1.78.0.html?utm_source=rss", &[])?;
    let article = Article {
        id: stable_id(&url),
        title: "Announcing Rust 1.78.0".to_string(),
        body: "The Rust team is happy to announce a new version of Rust, 1.78.0. \
               Rust now supports #[diagnostic] attributes to influence compiler error messages, \
               asserts unsafe preconditions in debug builds, and changes the deterministic \
               realignment of pointers in const evaluation. The minimum supported Windows \
               version has been raised to Windows 10 for the standard tier 1 targets."
            .to_string(),
        source: "Rust Blog".to_string(),
        published_at: Utc::now(),
        url,
    };

    match rater.rate(&article).await {
        Ok(rating) => {
            println!("✓ Success!");
            println!("  Importance: {}", rating.importance);
            println!("  Summary: {}", rating.summary);
            if let Some(rationale) = &rating.rationale {
                println!("  Why: {}", rationale);
            }
        }
        Err(e) => {
            eprintln!("✗ Failed: {}", e);
        }
    }

    println!("{}", "=".repeat(60));
    Ok(())
}
