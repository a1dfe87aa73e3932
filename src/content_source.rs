//! Spaceflight News API client
//!
//! One request per cycle:
//!
//! ```text
//! GET {base}/v4/articles/?limit=50&news_site=NASA,SpaceNews&published_at_gt=<RFC 3339>&ordering=-published_at
//! ```
//!
//! The API pages newest-first; the client follows each page's `next` link
//! until the window is exhausted, up to [`MAX_PAGES`] pages per cycle.
//! Articles from sites outside the known [`Provider`] set are dropped.

use crate::config::ContentSourceConfig;
use crate::error::{Error, Result};
use crate::relay::ContentSource;
use crate::types::{ContentItem, Provider};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use std::collections::BTreeSet;
use tracing::{debug, warn};
use url::Url;

/// Upper bound on pages followed in one fetch
pub const MAX_PAGES: usize = 20;

/// One page of the articles endpoint
#[derive(Debug, Deserialize)]
struct ArticlesPage {
    results: Vec<Article>,
    /// Absolute URL of the following (older) page
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Article {
    title: String,
    url: String,
    #[serde(default)]
    summary: String,
    published_at: DateTime<Utc>,
    news_site: String,
}

/// HTTP content source backed by the Spaceflight News API
pub struct SpaceflightNewsClient {
    http_client: reqwest::Client,
    articles_url: Url,
    page_limit: u32,
    instant_view_hash: Option<String>,
}

impl SpaceflightNewsClient {
    /// Create a client from configuration
    ///
    /// # Errors
    /// Returns an error if the base URL is invalid or the HTTP client cannot be created
    pub fn new(config: &ContentSourceConfig) -> Result<Self> {
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let articles_url = Url::parse(&base)
            .and_then(|b| b.join("v4/articles/"))
            .map_err(|e| {
                Error::config(
                    "content_source.base_url",
                    format!("invalid base URL '{}': {}", config.base_url, e),
                )
            })?;

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| Error::ContentSource(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            articles_url,
            page_limit: config.page_limit,
            instant_view_hash: config.instant_view_hash.clone(),
        })
    }

    fn request_url(&self, providers: &BTreeSet<Provider>, after: DateTime<Utc>) -> Url {
        let sites = providers
            .iter()
            .map(|p| p.api_name())
            .collect::<Vec<_>>()
            .join(",");

        let mut url = self.articles_url.clone();
        url.query_pairs_mut()
            .append_pair("limit", &self.page_limit.to_string())
            .append_pair("news_site", &sites)
            .append_pair(
                "published_at_gt",
                &after.to_rfc3339_opts(SecondsFormat::Millis, true),
            )
            .append_pair("ordering", "-published_at");
        url
    }

    async fn fetch_page(&self, url: Url) -> Result<ArticlesPage> {
        let response = self.http_client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                Error::ContentSource("request to content source timed out".to_string())
            } else {
                Error::ContentSource(format!("Failed to fetch articles: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::ContentSource(format!(
                "content source returned HTTP {}",
                status.as_u16()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::ContentSource(format!("Failed to parse articles: {}", e)))
    }

    /// Resolve a `next` link, refusing to leave the configured host
    fn next_page_url(&self, next: &str) -> Result<Url> {
        let url = self
            .articles_url
            .join(next)
            .map_err(|e| Error::ContentSource(format!("invalid next page link: {}", e)))?;
        if url.origin() != self.articles_url.origin() {
            return Err(Error::ContentSource(format!(
                "next page link points to another host: {}",
                url
            )));
        }
        Ok(url)
    }

    /// Message body for one article
    fn render(&self, article: &Article) -> String {
        let link = match &self.instant_view_hash {
            Some(hash) => format!("https://t.me/iv?url={}&rhash={}", article.url, hash),
            None => article.url.clone(),
        };

        format!(
            "{}\n\n{}\n\n{}\nPublished: {}",
            article.title,
            article.summary,
            link,
            article
                .published_at
                .to_rfc3339_opts(SecondsFormat::AutoSi, true)
        )
    }
}

#[async_trait]
impl ContentSource for SpaceflightNewsClient {
    async fn fetch_items(
        &self,
        providers: &BTreeSet<Provider>,
        after: DateTime<Utc>,
    ) -> Result<Vec<ContentItem>> {
        if providers.is_empty() {
            return Ok(Vec::new());
        }

        let mut url = self.request_url(providers, after);
        let mut articles = Vec::new();
        let mut pages = 0;

        loop {
            debug!(page = pages, "fetching articles");
            let page = self.fetch_page(url).await?;
            pages += 1;
            articles.extend(page.results);

            let Some(next) = page.next else {
                break;
            };
            if pages >= MAX_PAGES {
                warn!(
                    pages,
                    "content source has more pages than allowed per cycle, older items are skipped"
                );
                break;
            }
            url = self.next_page_url(&next)?;
        }

        let items = articles
            .iter()
            .filter_map(|article| match Provider::from_api_name(&article.news_site) {
                Some(provider) => Some(ContentItem {
                    provider,
                    published_at: article.published_at,
                    body: self.render(article),
                }),
                None => {
                    debug!(news_site = %article.news_site, "dropping article from unknown site");
                    None
                }
            })
            .collect::<Vec<_>>();

        debug!(count = items.len(), pages, "fetched articles");
        Ok(items)
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> SpaceflightNewsClient {
        let config = ContentSourceConfig {
            base_url: server.uri(),
            page_limit: 10,
            timeout: Duration::from_secs(2),
            ..ContentSourceConfig::default()
        };
        SpaceflightNewsClient::new(&config).unwrap()
    }

    fn providers(list: &[Provider]) -> BTreeSet<Provider> {
        list.iter().copied().collect()
    }

    #[tokio::test]
    async fn fetch_sends_window_and_renders_known_sites() {
        let server = MockServer::start().await;
        let after = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        Mock::given(method("GET"))
            .and(path("/v4/articles/"))
            .and(query_param("limit", "10"))
            .and(query_param("news_site", "NASA,SpaceNews"))
            .and(query_param("published_at_gt", "2024-01-01T12:00:00.000Z"))
            .and(query_param("ordering", "-published_at"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "count": 3,
                "results": [
                    {
                        "title": "Artemis update",
                        "url": "https://nasa.gov/artemis",
                        "summary": "Crew named.",
                        "published_at": "2024-01-01T12:30:00Z",
                        "news_site": "NASA"
                    },
                    {
                        "title": "Launch market",
                        "url": "https://spacenews.com/market",
                        "summary": "Prices drop.",
                        "published_at": "2024-01-01T12:10:00Z",
                        "news_site": "SpaceNews"
                    },
                    {
                        "title": "Unrelated",
                        "url": "https://example.com/x",
                        "summary": "",
                        "published_at": "2024-01-01T12:20:00Z",
                        "news_site": "Some Blog"
                    }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let items = client
            .fetch_items(&providers(&[Provider::SpaceNews, Provider::Nasa]), after)
            .await
            .unwrap();

        assert_eq!(items.len(), 2, "unknown site must be dropped");
        assert_eq!(items[0].provider, Provider::Nasa);
        assert_eq!(
            items[0].published_at,
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 0).unwrap()
        );
        assert_eq!(
            items[0].body,
            "Artemis update\n\nCrew named.\n\nhttps://nasa.gov/artemis\nPublished: 2024-01-01T12:30:00Z"
        );
        assert_eq!(items[1].provider, Provider::SpaceNews);
    }

    #[tokio::test]
    async fn instant_view_hash_rewrites_the_link() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v4/articles/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{
                    "title": "T",
                    "url": "https://arstechnica.com/a",
                    "summary": "S",
                    "published_at": "2024-01-01T00:00:00Z",
                    "news_site": "Arstechnica"
                }]
            })))
            .mount(&server)
            .await;

        let config = ContentSourceConfig {
            base_url: server.uri(),
            instant_view_hash: Some("abc123".to_string()),
            ..ContentSourceConfig::default()
        };
        let client = SpaceflightNewsClient::new(&config).unwrap();

        let items = client
            .fetch_items(&providers(&[Provider::Arstechnica]), Utc::now())
            .await
            .unwrap();

        assert!(
            items[0]
                .body
                .contains("https://t.me/iv?url=https://arstechnica.com/a&rhash=abc123\n"),
            "{}",
            items[0].body
        );
    }

    fn article(title: &str, published_at: &str) -> serde_json::Value {
        json!({
            "title": title,
            "url": format!("https://nasa.gov/{title}"),
            "summary": "",
            "published_at": published_at,
            "news_site": "NASA"
        })
    }

    #[tokio::test]
    async fn follows_next_links_until_the_window_is_exhausted() {
        let server = MockServer::start().await;
        let next = format!(
            "{}/v4/articles/?limit=10&news_site=NASA&offset=10&ordering=-published_at",
            server.uri()
        );

        Mock::given(method("GET"))
            .and(path("/v4/articles/"))
            .and(query_param_is_missing("offset"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "next": next,
                "results": [article("newest", "2024-01-01T12:30:00Z")]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v4/articles/"))
            .and(query_param("offset", "10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "next": null,
                "results": [article("older", "2024-01-01T12:05:00Z")]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let after = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let items = client_for(&server)
            .fetch_items(&providers(&[Provider::Nasa]), after)
            .await
            .unwrap();

        let titles: Vec<&str> = items
            .iter()
            .map(|i| i.body.lines().next().unwrap())
            .collect();
        assert_eq!(titles, vec!["newest", "older"]);
    }

    #[tokio::test]
    async fn page_following_stops_at_the_page_cap() {
        let server = MockServer::start().await;
        let next = format!("{}/v4/articles/?offset=1", server.uri());
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "next": next,
                "results": [article("again", "2024-01-01T12:30:00Z")]
            })))
            .expect(MAX_PAGES as u64)
            .mount(&server)
            .await;

        let items = client_for(&server)
            .fetch_items(&providers(&[Provider::Nasa]), Utc::now())
            .await
            .unwrap();

        assert_eq!(items.len(), MAX_PAGES);
    }

    #[tokio::test]
    async fn next_link_to_another_host_is_refused() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "next": "https://elsewhere.example/v4/articles/?offset=10",
                "results": []
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server)
            .fetch_items(&providers(&[Provider::Nasa]), Utc::now())
            .await
            .unwrap_err();

        assert!(err.is_fetch_failure());
        assert!(err.to_string().contains("another host"), "{err}");
    }

    #[tokio::test]
    async fn non_success_status_is_a_fetch_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .fetch_items(&providers(&[Provider::Nasa]), Utc::now())
            .await
            .unwrap_err();

        assert!(err.is_fetch_failure());
        assert!(err.to_string().contains("503"), "{err}");
    }

    #[tokio::test]
    async fn malformed_body_is_a_fetch_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .fetch_items(&providers(&[Provider::Nasa]), Utc::now())
            .await
            .unwrap_err();

        assert!(err.is_fetch_failure());
    }

    #[tokio::test]
    async fn timeout_is_a_fetch_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "results": [] }))
                    .set_delay(Duration::from_millis(800)),
            )
            .mount(&server)
            .await;

        let config = ContentSourceConfig {
            base_url: server.uri(),
            timeout: Duration::from_millis(100),
            ..ContentSourceConfig::default()
        };
        let err = SpaceflightNewsClient::new(&config)
            .unwrap()
            .fetch_items(&providers(&[Provider::Nasa]), Utc::now())
            .await
            .unwrap_err();

        assert!(err.is_fetch_failure());
    }

    #[tokio::test]
    async fn no_providers_means_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let items = client_for(&server)
            .fetch_items(&BTreeSet::new(), Utc::now())
            .await
            .unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn invalid_base_url_is_a_config_error() {
        let config = ContentSourceConfig {
            base_url: "not a url".to_string(),
            ..ContentSourceConfig::default()
        };
        assert!(matches!(
            SpaceflightNewsClient::new(&config),
            Err(Error::Config { .. })
        ));
    }
}
