//! Discovery of the per-year CSV download links on the publisher page.
//!
//! Thin glue: fetch the page, pull every href matching
//! `transacoes_imobiliarias_YYYY.csv`, resolve relative URLs. Any failure
//! degrades to the hardcoded fallback table — discovery never errors.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use crate::config::CSV_URLS_FALLBACK;

static CSV_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"href="([^"]*transacoes_imobiliarias_(\d{4})\.csv)""#)
        .unwrap_or_else(|e| panic!("bad link regex: {e}"))
});

pub fn fallback_urls() -> BTreeMap<i32, String> {
    CSV_URLS_FALLBACK
        .iter()
        .map(|(year, url)| (*year, (*url).to_string()))
        .collect()
}

/// Discover `{year: url}` pairs from the publisher page, falling back to
/// the hardcoded table on any failure or an empty result.
pub async fn discover_csv_urls(client: &reqwest::Client, base_url: &str) -> BTreeMap<i32, String> {
    info!(url = %base_url, "discovering CSV links");

    let body = match fetch_page(client, base_url).await {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, "publisher page unreachable — using fallback URLs");
            return fallback_urls();
        }
    };

    let urls = extract_links(&body, base_url);
    if urls.is_empty() {
        warn!("no CSV links found on the page — using fallback URLs");
        return fallback_urls();
    }

    info!(count = urls.len(), "CSV links discovered");
    urls
}

async fn fetch_page(client: &reqwest::Client, url: &str) -> anyhow::Result<String> {
    let response = client.get(url).send().await?.error_for_status()?;
    Ok(response.text().await?)
}

/// Extract and absolutize the matching links from the page HTML.
pub fn extract_links(body: &str, base_url: &str) -> BTreeMap<i32, String> {
    let base = reqwest::Url::parse(base_url).ok();
    let mut urls = BTreeMap::new();

    for capture in CSV_LINK.captures_iter(body) {
        let href = &capture[1];
        let Ok(year) = capture[2].parse::<i32>() else {
            continue;
        };
        let absolute = match &base {
            Some(base) => base
                .join(href)
                .map(|u| u.to_string())
                .unwrap_or_else(|_| href.to_string()),
            None => href.to_string(),
        };
        info!(year, url = %absolute, "CSV link found");
        urls.insert(year, absolute);
    }
    urls
}
