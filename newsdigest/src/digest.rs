use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::{Digest, ScoredArticle};

/// Build the digest for a run. Empty input gives a valid empty digest.
pub fn compose(items: Vec<ScoredArticle>, run_at: DateTime<Utc>, run_id: Uuid) -> Digest {
    Digest {
        run_id,
        generated_at: run_at,
        items,
    }
}

/// Plain-text rendering used by the console channel.
pub fn render_text(digest: &Digest) -> String {
    let rule = "=".repeat(80);
    let mut out = String::new();

    out.push_str(&format!("{}\n", rule));
    out.push_str(&format!("TECH NEWS DIGEST - {}\n", digest.generated_at.format("%Y-%m-%d %H:%M UTC")));
    out.push_str(&format!("{}\n", rule));

    if digest.items.is_empty() {
        out.push_str("\nNo articles made the cut this time.\n");
    }

    for (i, item) in digest.items.iter().enumerate() {
        out.push_str(&format!("\n{}. {}\n", i + 1, item.article.title));
        out.push_str(&format!(
            "   Source: {} | Importance: {} | Published: {}\n",
            item.article.source,
            item.rating.importance,
            item.article.published_at.format("%Y-%m-%d")
        ));
        out.push_str(&format!("   URL: {}\n", item.article.url));
        out.push_str(&format!("   Summary: {}\n", item.rating.summary));
        if let Some(rationale) = &item.rating.rationale {
            out.push_str(&format!("   Why: {}\n", rationale));
        }
    }

    out.push_str(&format!("\n{}\n", rule));
    out
}
