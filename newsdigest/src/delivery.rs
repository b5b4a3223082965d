use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tracing::info;

use crate::digest::render_text;
use crate::error::DeliveryFailed;
use crate::model::Digest;

/// Acknowledgement from a channel that accepted a digest.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReceipt {
    pub channel: String,
    pub delivered_at: DateTime<Utc>,
    /// Where the digest ended up, when the channel has such a notion (a file path, a message id)
    pub location: Option<String>,
}

/// Hands a finished digest to the outside world.
#[async_trait::async_trait]
pub trait DeliveryChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, digest: &Digest) -> Result<DeliveryReceipt, DeliveryFailed>;
}

/// Prints the plain-text rendering to stdout.
pub struct ConsoleDelivery;

#[async_trait::async_trait]
impl DeliveryChannel for ConsoleDelivery {
    fn name(&self) -> &str {
        "console"
    }

    async fn send(&self, digest: &Digest) -> Result<DeliveryReceipt, DeliveryFailed> {
        println!("{}", render_text(digest));
        Ok(DeliveryReceipt {
            channel: self.name().to_string(),
            delivered_at: Utc::now(),
            location: None,
        })
    }
}

/// Writes `digest-<run_id>.json` into a directory.
pub struct JsonFileDelivery {
    dir: PathBuf,
}

impl JsonFileDelivery {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn failed(&self, reason: impl std::fmt::Display) -> DeliveryFailed {
        DeliveryFailed {
            channel: self.name().to_string(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl DeliveryChannel for JsonFileDelivery {
    fn name(&self) -> &str {
        "json"
    }

    async fn send(&self, digest: &Digest) -> Result<DeliveryReceipt, DeliveryFailed> {
        let json = serde_json::to_string_pretty(digest).map_err(|e| self.failed(e))?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| self.failed(format!("cannot create {}: {}", self.dir.display(), e)))?;

        let path = self.dir.join(format!("digest-{}.json", digest.run_id));
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| self.failed(format!("cannot write {}: {}", path.display(), e)))?;

        info!(path = %path.display(), items = digest.len(), "digest written");
        Ok(DeliveryReceipt {
            channel: self.name().to_string(),
            delivered_at: Utc::now(),
            location: Some(path.display().to_string()),
        })
    }
}
