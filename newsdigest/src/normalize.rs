use common::NormalizeConfig;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest as _, Sha256};
use tracing::warn;
use url::Url;

use crate::error::MalformedInput;
use crate::model::{Article, RawArticle};

/// Query parameters that only identify the referrer or campaign.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "dclid", "msclkid", "yclid", "mc_cid", "mc_eid", "igshid", "ref",
    "ref_src", "_ga", "_hsenc", "_hsmi", "spm",
];

static RE_BLOCKS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)\s*>").unwrap());
static RE_COMMENTS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)</?[a-zA-Z][^>]*>").unwrap());
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Turn a source payload into a canonical article.
pub fn normalize(raw: &RawArticle, config: &NormalizeConfig) -> Result<Article, MalformedInput> {
    let url = normalize_url(raw.url.as_deref().unwrap_or(""), &config.extra_tracking_params)?;

    let title = strip_markup(&raw.title);
    let body = strip_markup(&raw.body);
    if title.is_empty() && body.is_empty() {
        return Err(MalformedInput::EmptyContent);
    }

    Ok(Article {
        id: stable_id(&url),
        title,
        body,
        source: raw.source.trim().to_string(),
        published_at: raw.published_at.unwrap_or(raw.fetched_at),
        url,
    })
}

/// Normalize a batch, dropping malformed items. Returns the articles and the drop count.
pub fn normalize_all(raws: &[RawArticle], config: &NormalizeConfig) -> (Vec<Article>, usize) {
    let mut articles = Vec::with_capacity(raws.len());
    let mut malformed = 0usize;

    for raw in raws {
        match normalize(raw, config) {
            Ok(article) => articles.push(article),
            Err(e) => {
                warn!(source = %raw.source, title = %raw.title, error = %e, "dropping malformed article");
                malformed += 1;
            }
        }
    }

    (articles, malformed)
}

/// Remove tags, script/style blocks and comments, decode entities, collapse whitespace.
pub fn strip_markup(s: &str) -> String {
    let out = RE_BLOCKS.replace_all(s, " ");
    let out = RE_COMMENTS.replace_all(&out, " ");
    let out = RE_TAGS.replace_all(&out, " ");
    let out = html_escape::decode_html_entities(&out);
    RE_WS.replace_all(&out, " ").trim().to_string()
}

/// Canonical form of an article URL.
///
/// The host is lower-cased by the parser; the fragment, tracking parameters and
/// a trailing slash on non-root paths are removed. Only http(s) is accepted.
pub fn normalize_url(raw: &str, extra_tracking: &[String]) -> Result<String, MalformedInput> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(MalformedInput::MissingUrl);
    }

    let mut url = Url::parse(trimmed).map_err(|e| MalformedInput::InvalidUrl {
        url: trimmed.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(MalformedInput::UnsupportedScheme(other.to_string())),
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(MalformedInput::InvalidUrl {
            url: trimmed.to_string(),
            reason: "missing host".to_string(),
        });
    }

    url.set_fragment(None);

    // Kept parameters retain their original encoding whether or not anything was removed
    if let Some(query) = url.query() {
        let kept = query
            .split('&')
            .filter(|segment| !segment.is_empty())
            .filter(|segment| !is_tracking_param(&segment_key(segment), extra_tracking))
            .collect::<Vec<_>>()
            .join("&");
        url.set_query(if kept.is_empty() { None } else { Some(kept.as_str()) });
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        let trimmed_path = path.trim_end_matches('/');
        url.set_path(if trimmed_path.is_empty() { "/" } else { trimmed_path });
    }

    Ok(url.to_string())
}

/// Decoded key of one raw `key=value` query segment.
fn segment_key(segment: &str) -> String {
    url::form_urlencoded::parse(segment.as_bytes())
        .next()
        .map(|(k, _)| k.into_owned())
        .unwrap_or_default()
}

fn is_tracking_param(key: &str, extra: &[String]) -> bool {
    let lower = key.to_ascii_lowercase();
    lower.starts_with("utm_")
        || TRACKING_PARAMS.contains(&lower.as_str())
        || extra.iter().any(|e| e.eq_ignore_ascii_case(key))
}

/// Hex SHA-256 of the normalized URL.
pub fn stable_id(normalized_url: &str) -> String {
    format!("{:x}", Sha256::digest(normalized_url.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn raw(url: Option<&str>, title: &str, body: &str) -> RawArticle {
        RawArticle {
            source: "Inside Java".into(),
            title: title.into(),
            body: body.into(),
            url: url.map(str::to_string),
            published_at: None,
            fetched_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn strips_tracking_params_fragment_and_trailing_slash() {
        let url = normalize_url(
            "https://Example.COM/news/jdk-22/?utm_source=rss&utm_medium=feed&id=7&fbclid=xyz#comments",
            &[],
        )
        .unwrap();
        assert_eq!(url, "https://example.com/news/jdk-22?id=7");
    }

    #[test]
    fn removing_tracking_params_keeps_encoding_of_the_rest() {
        let plain = normalize_url("https://e.com/search?q=jdk%2022", &[]).unwrap();
        let tracked = normalize_url("https://e.com/search?q=jdk%2022&utm_source=rss", &[]).unwrap();
        assert_eq!(plain, "https://e.com/search?q=jdk%2022");
        assert_eq!(plain, tracked);
        assert_eq!(stable_id(&plain), stable_id(&tracked));

        let bare = normalize_url("https://e.com/amp-page?amp", &[]).unwrap();
        let bare_tracked = normalize_url("https://e.com/amp-page?amp&fbclid=x", &[]).unwrap();
        assert_eq!(bare, "https://e.com/amp-page?amp");
        assert_eq!(bare, bare_tracked);

        // Encoded tracking keys are still recognized
        let encoded = normalize_url("https://e.com/a?%75tm_source=x&page=2", &[]).unwrap();
        assert_eq!(encoded, "https://e.com/a?page=2");
    }

    #[test]
    fn drops_query_when_only_tracking_params() {
        let url = normalize_url("https://example.com/a/?utm_campaign=x&ref=hn", &[]).unwrap();
        assert_eq!(url, "https://example.com/a");
    }

    #[test]
    fn extra_tracking_params_are_configurable() {
        let extra = vec!["src".to_string()];
        let url = normalize_url("https://example.com/a?src=feed&page=2", &extra).unwrap();
        assert_eq!(url, "https://example.com/a?page=2");
    }

    #[test]
    fn root_path_is_kept() {
        assert_eq!(normalize_url("https://example.com", &[]).unwrap(), "https://example.com/");
    }

    #[test]
    fn rejects_missing_and_bad_urls() {
        assert_eq!(normalize_url("   ", &[]), Err(MalformedInput::MissingUrl));
        assert!(matches!(
            normalize_url("not a url", &[]),
            Err(MalformedInput::InvalidUrl { .. })
        ));
        assert_eq!(
            normalize_url("ftp://example.com/file", &[]),
            Err(MalformedInput::UnsupportedScheme("ftp".into()))
        );
    }

    #[test]
    fn strip_markup_removes_tags_scripts_and_entities() {
        let html = "<p>Hello&nbsp;<b>JVM</b>   world</p><script>alert(1)</script><!-- x --> Vec&lt;T&gt;";
        assert_eq!(strip_markup(html), "Hello JVM world Vec<T>");
    }

    #[test]
    fn normalize_is_idempotent_on_id() {
        let r = raw(Some("https://example.com/post/?utm_source=x"), "<h1>Title</h1>", "Body");
        let a = normalize(&r, &NormalizeConfig::default()).unwrap();
        let b = normalize(&r, &NormalizeConfig::default()).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.title, "Title");
        assert_eq!(a.url, "https://example.com/post");
        assert_eq!(a.id.len(), 64);
    }

    #[test]
    fn equivalent_urls_share_an_id() {
        let a = normalize(&raw(Some("https://EXAMPLE.com/x/"), "t", ""), &NormalizeConfig::default()).unwrap();
        let b = normalize(
            &raw(Some("https://example.com/x?utm_source=feed"), "t", ""),
            &NormalizeConfig::default(),
        )
        .unwrap();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn missing_timestamp_falls_back_to_fetch_time() {
        let r = raw(Some("https://example.com/a"), "Title", "");
        let a = normalize(&r, &NormalizeConfig::default()).unwrap();
        assert_eq!(a.published_at, r.fetched_at);
    }

    #[test]
    fn empty_title_and_body_is_malformed() {
        let r = raw(Some("https://example.com/a"), "<p> </p>", "&nbsp;");
        assert_eq!(
            normalize(&r, &NormalizeConfig::default()),
            Err(MalformedInput::EmptyContent)
        );
    }

    #[test]
    fn normalize_all_counts_drops() {
        let raws = vec![
            raw(Some("https://example.com/a"), "A", ""),
            raw(None, "B", "body"),
            raw(Some("https://example.com/c"), "", ""),
        ];
        let (articles, malformed) = normalize_all(&raws, &NormalizeConfig::default());
        assert_eq!(articles.len(), 1);
        assert_eq!(malformed, 2);
    }
}
