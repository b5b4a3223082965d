/*
newsdigest - single-run main.rs
Fetches the configured feeds, rates the new articles with the configured LLM,
and delivers one digest through the configured channel.
*/

use anyhow::{Context, Result};
use clap::Parser;
use common::{init_db_pool, mask_secret, Config};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use newsdigest::delivery::{ConsoleDelivery, DeliveryChannel, JsonFileDelivery};
use newsdigest::history::{MemoryRunHistory, RunHistory, SqliteRunHistory};
use newsdigest::llm::remote::RemoteLlmProvider;
use newsdigest::llm::LlmProvider;
use newsdigest::pipeline::{deliver, Pipeline, RunStatus};
use newsdigest::rating::Rater;
use newsdigest::sources::{FeedSource, NewsApiSource, SourceAdapter};

#[derive(Parser, Debug)]
#[command(name = "newsdigest", about = "Build and deliver one tech news digest")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print the effective configuration (secrets masked) and exit
    #[arg(long)]
    show_config: bool,

    /// Build the digest but do not deliver it
    #[arg(long)]
    no_deliver: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    // API keys may live in a .env file
    if let Ok(path) = dotenvy::dotenv() {
        info!(path = ?path, ".env loaded");
    }

    // Resolve config paths
    let default_path = PathBuf::from("config.default.toml");

    let override_path = if let Some(p) = args.config {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p)
    } else {
        let p = PathBuf::from("config.toml");
        if p.exists() { Some(p) } else { None }
    };

    let config = match Config::load_with_defaults(
        if default_path.exists() { Some(&default_path) } else { None },
        override_path.as_deref(),
    )
    .await
    {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %format!("{:#}", e), "failed to load configuration");
            return Err(e);
        }
    };
    info!(default = ?default_path, override = ?override_path, sources = config.sources.len(), "configuration loaded");

    if args.show_config {
        print_config(&config)?;
        return Ok(());
    }

    let llm_config = config
        .llm
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("No [llm] section configured; rating needs a provider"))?;
    let provider = create_llm_provider(llm_config)?;

    let sources = build_sources(&config)?;
    let history = build_history(&config).await?;
    let channel = build_channel(&config);

    let config = Arc::new(config);
    let rater = Rater::new(provider, config.rating.clone());
    let pipeline = Pipeline::new(sources, history, rater, config.clone());

    let outcome = pipeline.run().await;
    match outcome.status {
        RunStatus::Completed => info!(items = outcome.digest.len(), "run completed"),
        RunStatus::Partial => warn!(
            items = outcome.digest.len(),
            failed_sources = ?outcome.report.failed_sources,
            skipped = outcome.report.skipped,
            "run completed with partial results"
        ),
        RunStatus::EmptyDigest => warn!("no usable articles this run, digest is empty"),
        RunStatus::RunTimedOut => warn!("run deadline expired before any rating completed"),
    }
    for item in &outcome.report.skipped_items {
        info!(id = %item.article.id, title = %item.article.title, reason = %item.reason, "skipped article");
    }

    if args.no_deliver {
        info!("delivery disabled via CLI (--no-deliver)");
        return Ok(());
    }

    // An empty digest is still delivered so readers know the run happened
    deliver(&outcome.digest, channel.as_ref())
        .await
        .with_context(|| format!("digest {} was built but not delivered", outcome.digest.run_id))?;

    Ok(())
}

/// Create an LLM provider based on configuration
fn create_llm_provider(llm_config: &common::LlmConfig) -> Result<Arc<dyn LlmProvider>> {
    let adapter = llm_config.adapter.as_deref().unwrap_or("none");
    match adapter {
        "remote" => {
            let remote_config = llm_config
                .remote
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("Remote adapter selected but no [llm.remote] config found"))?;

            // Fetch API key from env var
            let api_key_env = remote_config
                .api_key_env
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("Missing api_key_env in remote config"))?;
            let api_key = std::env::var(api_key_env)
                .with_context(|| format!("LLM API key env var '{}' not set", api_key_env))?;

            let model = remote_config.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string());
            let api_url = remote_config
                .api_url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434/v1/chat/completions".to_string());
            let timeout_secs = remote_config.timeout_seconds.unwrap_or(30);
            let max_tokens = remote_config.max_tokens.unwrap_or(500);

            info!(model = %model, api_url = %api_url, "LLM provider initialized");
            let provider = RemoteLlmProvider::new(api_url, api_key, model).with_defaults(timeout_secs, max_tokens, 0.2);
            Ok(Arc::new(provider))
        }
        "none" => anyhow::bail!("LLM adapter 'none' cannot rate articles"),
        _ => anyhow::bail!("Unknown LLM adapter type: {}", adapter),
    }
}

fn build_sources(config: &Config) -> Result<Vec<Arc<dyn SourceAdapter>>> {
    let timeout = config
        .politeness
        .as_ref()
        .and_then(|p| p.fetch_timeout_seconds)
        .unwrap_or(10);
    let retries = config.politeness.as_ref().and_then(|p| p.max_retries).unwrap_or(3);

    let mut sources: Vec<Arc<dyn SourceAdapter>> = Vec::with_capacity(config.sources.len());
    for source in &config.sources {
        match source.kind.as_deref().unwrap_or("rss") {
            "rss" | "atom" | "feed" => {
                let feed = FeedSource::new(&source.name, &source.url, timeout)?
                    .with_limits(source.max_articles.unwrap_or(10), retries);
                sources.push(Arc::new(feed));
            }
            "newsapi" => {
                let key_env = source.api_key_env.as_deref().unwrap_or("NEWS_API_KEY");
                let api_key = match std::env::var(key_env) {
                    Ok(key) if !key.trim().is_empty() => key,
                    _ => {
                        warn!(source = %source.name, env = %key_env, "API key not set, skipping source");
                        continue;
                    }
                };
                info!(source = %source.name, api_key = %mask_secret(&api_key), "using NewsAPI source");
                let newsapi = NewsApiSource::new(&source.name, &source.url, api_key, source.source_ids.clone(), timeout)
                    .with_context(|| format!("invalid NewsAPI source '{}'", source.name))?
                    .with_limits(source.max_articles.unwrap_or(10), retries, source.days_back.unwrap_or(2));
                sources.push(Arc::new(newsapi));
            }
            other => anyhow::bail!("unknown kind '{}' for source '{}'", other, source.name),
        }
    }
    if sources.is_empty() {
        warn!("no [[sources]] configured, the digest will be empty");
    }
    Ok(sources)
}

async fn build_history(config: &Config) -> Result<Arc<dyn RunHistory>> {
    let retention = chrono::Duration::hours(config.history.window_hours);
    match &config.history.path {
        Some(path) => {
            let pool = init_db_pool(path)
                .await
                .with_context(|| format!("failed to open run history at {}", path))?;
            info!(path = %path, window_hours = config.history.window_hours, "using SQLite run history");
            Ok(Arc::new(SqliteRunHistory::new(pool, retention).await?))
        }
        None => {
            info!("no history path configured, cross-run dedup limited to this process");
            Ok(Arc::new(MemoryRunHistory::with_retention(retention)))
        }
    }
}

fn build_channel(config: &Config) -> Box<dyn DeliveryChannel> {
    match config.delivery.channel.as_str() {
        "json" => {
            let dir = config.delivery.output_dir.clone().unwrap_or_else(|| "digests".to_string());
            Box::new(JsonFileDelivery::new(dir))
        }
        "console" => Box::new(ConsoleDelivery),
        other => {
            warn!(channel = %other, "unknown delivery channel, falling back to console");
            Box::new(ConsoleDelivery)
        }
    }
}

fn print_config(config: &Config) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("failed to render configuration")?;
    println!("{}", rendered);

    if let Some(env) = config
        .llm
        .as_ref()
        .and_then(|l| l.remote.as_ref())
        .and_then(|r| r.api_key_env.as_deref())
    {
        match std::env::var(env) {
            Ok(key) => println!("# {} = {}", env, mask_secret(&key)),
            Err(_) => println!("# {} is not set", env),
        }
    }
    Ok(())
}
