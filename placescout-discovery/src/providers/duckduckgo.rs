//! DuckDuckGo HTML adapter, the web-search fallback.
//!
//! Uses the HTML-only version at `https://html.duckduckgo.com/html/`, which
//! requires no JavaScript and is tolerant of automated requests. Result
//! titles are cleaned into venue names; hits carry no coordinates, so they
//! mostly corroborate venues found elsewhere.

use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};
use url::Url;

use crate::config::ProviderSettings;
use crate::error::ProviderError;
use crate::http;
use crate::provider::{ProviderAdapter, ProviderRequest};
use crate::types::{ProviderId, ProviderKind, RawHit};

use super::Endpoint;

const DEFAULT_URL: &str = "https://html.duckduckgo.com/html/";

/// Separators between a venue name and the rest of a page title.
const TITLE_SEPARATORS: &[&str] = &[" - ", " | ", " – ", " — ", " · ", ": "];

/// Title fragments that mark listicles and directory pages, not venues.
const LISTING_MARKERS: &[&str] = &[
    "best ",
    "top ",
    "tripadvisor",
    "yelp",
    "guide",
    "things to do",
    "where to",
    "near me",
];

/// Longest cleaned title still plausible as a venue name.
const MAX_NAME_CHARS: usize = 80;

/// DuckDuckGo HTML scraper.
pub struct DuckDuckGoProvider {
    client: reqwest::Client,
    endpoint: Endpoint,
}

impl DuckDuckGoProvider {
    pub fn new(client: reqwest::Client, settings: &ProviderSettings) -> Self {
        Self {
            client,
            endpoint: Endpoint::new(ProviderKind::DuckDuckGo, settings, DEFAULT_URL),
        }
    }

    /// Extract the actual URL from DuckDuckGo's redirect wrapper.
    ///
    /// DDG wraps URLs like: `//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com&rut=...`
    /// We parse out the `uddg` query parameter and URL-decode it.
    fn extract_url(href: &str) -> Option<String> {
        let full_href = if href.starts_with("//") {
            format!("https:{href}")
        } else {
            href.to_string()
        };

        let parsed = Url::parse(&full_href).ok()?;

        if parsed.host_str() == Some("duckduckgo.com") && parsed.path().starts_with("/l/") {
            parsed
                .query_pairs()
                .find(|(key, _)| key == "uddg")
                .map(|(_, value)| value.into_owned())
        } else {
            Some(full_href)
        }
    }
}

#[async_trait]
impl ProviderAdapter for DuckDuckGoProvider {
    fn id(&self) -> &ProviderId {
        &self.endpoint.id
    }

    fn default_timeout(&self) -> Duration {
        self.endpoint.default_timeout
    }

    fn trust(&self) -> f64 {
        self.endpoint.trust
    }

    async fn search(
        &self,
        request: &ProviderRequest,
        timeout: Duration,
    ) -> Result<Vec<RawHit>, ProviderError> {
        let timeout = self.endpoint.throttle(timeout).await?;
        let query = format!("{} in {}", request.category, request.area.place);
        tracing::trace!(query = %query, "DuckDuckGo search");

        let html = http::fetch_text(
            self.client
                .post(&self.endpoint.url)
                .form(&[("q", query.as_str())])
                .header("Accept-Language", "en-US,en;q=0.9"),
            timeout,
            self.endpoint.id.as_str(),
        )
        .await?;

        tracing::trace!(bytes = html.len(), "DuckDuckGo response received");

        parse_duckduckgo_html(&html, &self.endpoint.id, request.max_results)
    }
}

/// Parse a DuckDuckGo HTML response into name-only hits.
///
/// Extracted as a separate function for testability with fixture HTML.
pub(crate) fn parse_duckduckgo_html(
    html: &str,
    provider: &ProviderId,
    max_results: usize,
) -> Result<Vec<RawHit>, ProviderError> {
    let document = Html::parse_document(html);

    let result_sel = Selector::parse(
        ".result.results_links.results_links_deep:not(.result--ad), .web-result:not(.result--ad)",
    )
    .map_err(|e| ProviderError::Malformed(format!("invalid result selector: {e:?}")))?;
    let title_sel = Selector::parse(".result__a")
        .map_err(|e| ProviderError::Malformed(format!("invalid title selector: {e:?}")))?;
    let snippet_sel = Selector::parse(".result__snippet")
        .map_err(|e| ProviderError::Malformed(format!("invalid snippet selector: {e:?}")))?;

    let mut hits = Vec::new();

    for element in document.select(&result_sel) {
        let Some(title_el) = element.select(&title_sel).next() else {
            continue;
        };

        let title = title_el.text().collect::<String>().trim().to_string();
        let Some(name) = venue_name_from_title(&title) else {
            continue;
        };

        let Some(url) = title_el
            .value()
            .attr("href")
            .and_then(DuckDuckGoProvider::extract_url)
        else {
            continue;
        };

        let snippet = element
            .select(&snippet_sel)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default();

        let mut payload = serde_json::Map::new();
        payload.insert("title".into(), title.into());
        payload.insert("url".into(), url.into());
        if !snippet.is_empty() {
            payload.insert("snippet".into(), snippet.into());
        }
        hits.push(RawHit::new(provider.clone(), name).with_payload(payload));

        if hits.len() >= max_results {
            break;
        }
    }

    tracing::debug!(count = hits.len(), "DuckDuckGo results parsed");
    Ok(hits)
}

/// Reduce a page title to the venue name it most likely names.
///
/// Returns `None` for listicles, directory pages and overlong titles.
pub(crate) fn venue_name_from_title(title: &str) -> Option<String> {
    let lower = title.to_lowercase();
    if LISTING_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return None;
    }
    let cut = TITLE_SEPARATORS
        .iter()
        .filter_map(|sep| title.find(sep))
        .min()
        .unwrap_or(title.len());
    let name = title[..cut].trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_CHARS {
        return None;
    }
    Some(name.to_owned())
}
