//! arXiv Atom feed client

use super::{CandidatePaper, PaperSource};
use crate::config::SourceConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoffBuilder};
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

const SOURCE_NAME: &str = "arxiv";

/// arXiv API client
pub struct ArxivSource {
    client: reqwest::Client,
    base_url: String,
    max_retries: u32,
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    id: Option<String>,
    title: Option<String>,
    summary: Option<String>,
    published: Option<String>,
    /// One `<author>` element or many
    #[serde(rename = "author", default)]
    authors: Vec<AtomAuthor>,
}

#[derive(Debug, Deserialize)]
struct AtomAuthor {
    name: String,
}

impl AtomEntry {
    fn is_api_error(&self) -> bool {
        self.id.as_deref().is_some_and(|id| id.contains("/api/errors"))
    }

    fn into_candidate(self) -> CandidatePaper {
        CandidatePaper {
            external_id: self.id.as_deref().and_then(external_id_from_entry_id),
            title: normalize_whitespace(self.title.as_deref().unwrap_or_default()),
            authors: self
                .authors
                .iter()
                .map(|a| normalize_whitespace(&a.name))
                .collect::<Vec<_>>()
                .join(", "),
            abstract_text: normalize_whitespace(self.summary.as_deref().unwrap_or_default()),
            published: self.published.unwrap_or_default().trim().to_string(),
        }
    }
}

impl ArxivSource {
    /// Create a new arXiv client
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            max_retries: config.max_retries,
        })
    }

    /// Single request; errors are classified for the retry loop
    async fn fetch_once(
        &self,
        topic_query: &str,
        max_results: usize,
    ) -> std::result::Result<Vec<CandidatePaper>, backoff::Error<AppError>> {
        let max_results = max_results.to_string();
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("search_query", topic_query),
                ("sortBy", "submittedDate"),
                ("sortOrder", "descending"),
                ("max_results", max_results.as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
                backoff::Error::transient(AppError::source_fetch(
                    SOURCE_NAME,
                    format!("Request failed: {}", e),
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let err = AppError::source_fetch(SOURCE_NAME, format!("Feed returned status {}", status));
            return Err(if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                backoff::Error::transient(err)
            } else {
                backoff::Error::permanent(err)
            });
        }

        let body = response.text().await.map_err(|e| {
            backoff::Error::transient(AppError::source_fetch(
                SOURCE_NAME,
                format!("Failed to read response: {}", e),
            ))
        })?;

        parse_feed(&body).map_err(backoff::Error::permanent)
    }
}

#[async_trait]
impl PaperSource for ArxivSource {
    async fn fetch_batch(
        &self,
        topic_query: &str,
        max_results: usize,
    ) -> Result<Vec<CandidatePaper>> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(500))
            .with_max_interval(Duration::from_secs(5))
            .build();

        let attempts = AtomicU32::new(0);
        let attempts = &attempts;
        let max_retries = self.max_retries;

        retry(policy, move || async move {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            match self.fetch_once(topic_query, max_results).await {
                Err(backoff::Error::Transient { err, .. }) if attempt > max_retries => {
                    Err(backoff::Error::permanent(err))
                }
                Err(backoff::Error::Transient { err, retry_after }) => {
                    tracing::warn!(
                        attempt,
                        max_retries,
                        error = %err,
                        "Feed request failed, retrying"
                    );
                    Err(backoff::Error::Transient { err, retry_after })
                }
                other => other,
            }
        })
        .await
    }

    fn name(&self) -> &str {
        SOURCE_NAME
    }
}

/// Parse an Atom response body into candidates
fn parse_feed(xml: &str) -> Result<Vec<CandidatePaper>> {
    let feed: AtomFeed = quick_xml::de::from_str(xml)
        .map_err(|e| AppError::source_fetch(SOURCE_NAME, format!("Malformed feed: {}", e)))?;

    if let Some(error_entry) = feed.entries.iter().find(|e| e.is_api_error()) {
        let detail = error_entry.summary.as_deref().unwrap_or("unknown error");
        return Err(AppError::source_fetch(
            SOURCE_NAME,
            format!("API error: {}", normalize_whitespace(detail)),
        ));
    }

    Ok(feed.entries.into_iter().map(AtomEntry::into_candidate).collect())
}

/// "http://arxiv.org/abs/2401.01234v1" -> "2401.01234v1"
fn external_id_from_entry_id(id: &str) -> Option<String> {
    let id = id.trim();
    let key = match id.rfind("/abs/") {
        Some(pos) => &id[pos + "/abs/".len()..],
        None => id.rsplit('/').next().unwrap_or_default(),
    };
    let key = key.trim();
    (!key.is_empty()).then(|| key.to_string())
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom"
      xmlns:opensearch="http://a9.com/-/spec/opensearch/1.1/"
      xmlns:arxiv="http://arxiv.org/schemas/atom">
  <link href="http://arxiv.org/api/query" rel="self" type="application/atom+xml"/>
  <title type="html">ArXiv Query: search_query=cat:cs.LG</title>
  <id>http://arxiv.org/api/abc</id>
  <updated>2026-10-18T00:00:00-04:00</updated>
  <opensearch:totalResults>2</opensearch:totalResults>
  <entry>
    <id>http://arxiv.org/abs/2610.01234v1</id>
    <updated>2026-10-17T17:59:59Z</updated>
    <published>2026-10-17T17:59:59Z</published>
    <title>Scaling Laws for
      Pairwise Preference Models</title>
    <summary>  We study how preference
      models scale.  </summary>
    <author>
      <name>Grace Hopper</name>
    </author>
    <author>
      <name>Edsger Dijkstra</name>
      <arxiv:affiliation>Eindhoven</arxiv:affiliation>
    </author>
    <link href="http://arxiv.org/abs/2610.01234v1" rel="alternate" type="text/html"/>
    <arxiv:primary_category term="cs.LG" scheme="http://arxiv.org/schemas/atom"/>
    <category term="cs.LG" scheme="http://arxiv.org/schemas/atom"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2610.05678v2</id>
    <updated>2026-10-16T12:00:00Z</updated>
    <published>2026-10-16T12:00:00Z</published>
    <title>A Single-Author Paper</title>
    <summary>Short.</summary>
    <author>
      <name>Barbara Liskov</name>
    </author>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_multiple_entries() {
        let papers = parse_feed(SAMPLE_FEED).unwrap();
        assert_eq!(papers.len(), 2);

        let first = &papers[0];
        assert_eq!(first.external_id.as_deref(), Some("2610.01234v1"));
        assert_eq!(first.title, "Scaling Laws for Pairwise Preference Models");
        assert_eq!(first.abstract_text, "We study how preference models scale.");
        assert_eq!(first.authors, "Grace Hopper, Edsger Dijkstra");
        assert_eq!(first.published, "2026-10-17T17:59:59Z");
    }

    #[test]
    fn test_single_author_entry() {
        let papers = parse_feed(SAMPLE_FEED).unwrap();
        assert_eq!(papers[1].authors, "Barbara Liskov");
        assert_eq!(papers[1].external_id.as_deref(), Some("2610.05678v2"));
    }

    #[test]
    fn test_empty_feed_is_zero_results() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title type="html">ArXiv Query: nothing</title>
  <id>http://arxiv.org/api/empty</id>
</feed>"#;
        assert!(parse_feed(xml).unwrap().is_empty());
    }

    #[test]
    fn test_api_error_entry_is_fetch_error() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <id>http://arxiv.org/api/errors#incorrect_id_format_for_1234</id>
    <title>Error</title>
    <summary>incorrect id format for 1234</summary>
  </entry>
</feed>"#;
        let err = parse_feed(xml).unwrap_err();
        assert!(matches!(err, AppError::SourceFetch { .. }));
        assert!(err.to_string().contains("incorrect id format"));
    }

    #[test]
    fn test_malformed_feed_is_fetch_error() {
        let err = parse_feed("<feed><entry></feed>").unwrap_err();
        assert!(matches!(err, AppError::SourceFetch { .. }));
    }

    #[test]
    fn test_external_id_from_entry_id() {
        assert_eq!(
            external_id_from_entry_id("http://arxiv.org/abs/2401.01234v1").as_deref(),
            Some("2401.01234v1")
        );
        assert_eq!(
            external_id_from_entry_id("http://arxiv.org/abs/cs/0112017v1").as_deref(),
            Some("cs/0112017v1")
        );
        assert_eq!(external_id_from_entry_id("http://arxiv.org/abs/"), None);
        assert_eq!(external_id_from_entry_id(""), None);
    }

    #[tokio::test]
    async fn test_unreachable_feed_is_error_not_empty() {
        let config = SourceConfig {
            base_url: "http://127.0.0.1:9/api/query".to_string(),
            timeout_secs: 2,
            max_retries: 0,
            ..SourceConfig::default()
        };
        let source = ArxivSource::new(&config).unwrap();

        let result = source.fetch_batch("cat:cs.LG", 10).await;
        assert!(matches!(result, Err(AppError::SourceFetch { .. })));
    }
}
