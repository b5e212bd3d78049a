//! Web search adapter - pulls comparable listing text from the open web

use crate::providers::rate_limit::RateLimiter;
use crate::providers::types::{ProviderError, ProviderResult, SearchOutput, SearchQuery};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::info;

/// Number of query variants issued per report
pub const SEARCH_TEMPLATE_COUNT: usize = 4;

const SEARCH_DEPTH: &str = "advanced";

#[async_trait]
pub trait WebSearch: Send + Sync {
    /// Run query variant `seed_index` (0..4)
    async fn query(&self, query: &SearchQuery, seed_index: usize) -> ProviderResult<SearchOutput>;
}

/// Build the query string for one template.
/// Variant 0 is a general search, the others are scoped to one listing site.
pub fn build_query(query: &SearchQuery, seed_index: usize) -> String {
    let base = format!(
        "recently sold homes in {}, {} around {:.0} sqft with {:.0} beds and {:.0} baths, \
         listing price, square feet, bedrooms, bathrooms",
        query.area, query.city, query.area_sqft, query.beds, query.baths
    );
    match seed_index % SEARCH_TEMPLATE_COUNT {
        0 => base,
        1 => format!("site:zillow.com {base}"),
        2 => format!("site:redfin.com {base}"),
        _ => format!("site:realtor.com {base}"),
    }
}

fn boilerplate() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)click to see more|view details|read more|find out why[^.\n]*\.?|follow us on[^.\n]*\.?|save this home|terms and conditions",
        )
        .expect("boilerplate pattern is valid")
    })
}

fn whitespace() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("whitespace pattern is valid"))
}

/// Strip listing-site boilerplate and collapse whitespace
pub fn sanitize(text: &str) -> String {
    let stripped = boilerplate().replace_all(text, " ");
    whitespace().replace_all(&stripped, " ").trim().to_string()
}

/// One search hit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub content: String,
}

/// Render hits as `Source:`/`Content:` blocks separated by `---`
pub fn assemble_results(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|hit| format!("Source: {}\nContent: {}", hit.url.trim(), sanitize(&hit.content)))
        .collect::<Vec<_>>()
        .join("\n---\n")
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    max_results: usize,
    depth: &'a str,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
    #[serde(default)]
    usage: Option<SearchUsage>,
}

#[derive(Debug, Deserialize)]
struct SearchUsage {
    #[serde(default)]
    credits: f64,
}

/// HTTP search client speaking the `{query, max_results, depth}` contract
pub struct HttpWebSearch {
    client: reqwest::Client,
    api_key: String,
    url: String,
    limiter: Arc<RateLimiter>,
}

impl HttpWebSearch {
    pub fn new(
        client: reqwest::Client,
        api_key: impl Into<String>,
        url: impl Into<String>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            url: url.into(),
            limiter,
        }
    }
}

#[async_trait]
impl WebSearch for HttpWebSearch {
    async fn query(&self, query: &SearchQuery, seed_index: usize) -> ProviderResult<SearchOutput> {
        let text = build_query(query, seed_index);
        self.limiter.acquire().await;

        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&SearchRequest {
                query: &text,
                max_results: query.count,
                depth: SEARCH_DEPTH,
            })
            .send()
            .await?;

        let status = response.status().as_u16();
        let retry_after = retry_after(response.headers());
        let body = response.text().await?;
        if status != 200 {
            return Err(ProviderError::from_status(status, &body, retry_after));
        }

        let parsed: SearchResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Fatal(format!("failed to parse search response: {}", e)))?;
        let credits_used = parsed.usage.map(|u| u.credits).unwrap_or(0.0);

        info!(
            seed_index,
            results = parsed.results.len(),
            credits = credits_used,
            "Search complete"
        );

        Ok(SearchOutput {
            raw_text: assemble_results(&parsed.results),
            credits_used,
        })
    }
}

/// Parse a `Retry-After` header given in seconds
pub(crate) fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query() -> SearchQuery {
        SearchQuery {
            area: "Mission".to_string(),
            city: "San Francisco".to_string(),
            area_sqft: 1_200.0,
            beds: 2.0,
            baths: 2.0,
            count: 10,
        }
    }

    #[test]
    fn test_four_distinct_templates() {
        let queries: Vec<String> = (0..SEARCH_TEMPLATE_COUNT).map(|i| build_query(&query(), i)).collect();
        assert!(!queries[0].starts_with("site:"));
        assert!(queries[1].starts_with("site:zillow.com"));
        assert!(queries[2].starts_with("site:redfin.com"));
        assert!(queries[3].starts_with("site:realtor.com"));
        assert!(queries[0].contains("Mission, San Francisco"));
        assert!(queries[0].contains("1200 sqft"));
    }

    #[test]
    fn test_sanitize_strips_boilerplate() {
        let raw = "3 bd | 2 ba  Click to see more\n\n$650,000 VIEW DETAILS Save this home. \
                   Find out why buyers love it. Read More Follow us on Instagram! Terms and Conditions";
        let clean = sanitize(raw);
        assert_eq!(clean, "3 bd | 2 ba $650,000 .");
    }

    #[test]
    fn test_assemble_results_layout() {
        let hits = vec![
            SearchHit {
                url: "https://a.example".to_string(),
                content: "2 bd  1,100 sqft".to_string(),
            },
            SearchHit {
                url: "https://b.example".to_string(),
                content: "3 bd".to_string(),
            },
        ];
        assert_eq!(
            assemble_results(&hits),
            "Source: https://a.example\nContent: 2 bd 1,100 sqft\n---\nSource: https://b.example\nContent: 3 bd"
        );
    }
}
