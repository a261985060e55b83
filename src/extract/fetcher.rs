//! HTTP client for the FPDS ezsearch portal
//!
//! This module handles:
//! - Building the HTTP client with the configured user agent and timeout
//! - Search, count and detail requests
//! - Mapping transport errors and status codes onto [`ExtractError`]

use crate::config::{Config, SiteConfig};
use crate::extract::parser::{parse_detail_document, parse_search_page, parse_total_count};
use crate::extract::selector::apply_rules;
use crate::extract::{
    DetailExtractor, DetailMap, DetailReference, FieldRule, PageExtractor, RawRecord, SearchQuery,
    TotalRecordCounter,
};
use crate::{ConfigError, ExtractError, ExtractResult, HarvestError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use scraper::Html;
use std::time::Duration;
use url::Url;

const SEARCH_PATH: &str = "/ezsearch/fpdsportal";
const DETAIL_PATH: &str = "/ezsearch/jsp/viewLinkController.jsp";

/// Fixed ezsearch parameters selecting the award index and result template
const SEARCH_PARAMS: [(&str, &str); 3] = [
    ("s", "FPDS.GOV"),
    ("templateName", "1.5.3"),
    ("indexName", "awardfull"),
];

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The site configuration (user agent, timeout)
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &SiteConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(config.timeout())
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Reqwest-backed implementation of every extraction collaborator
#[derive(Debug, Clone)]
pub struct FpdsClient {
    client: Client,
    search_url: Url,
    detail_url: Url,
    records_per_page: u32,
    detail_fields: Vec<FieldRule>,
}

impl FpdsClient {
    /// Creates a client for the site at `site.base_url`
    ///
    /// # Arguments
    ///
    /// * `site` - Base URL, user agent and timeout
    /// * `records_per_page` - Page size used to compute the `start` offset
    /// * `detail_fields` - Extra rules applied to every detail page
    pub fn new(
        site: &SiteConfig,
        records_per_page: u32,
        detail_fields: Vec<FieldRule>,
    ) -> Result<Self, HarvestError> {
        let invalid = |e: url::ParseError| {
            ConfigError::InvalidUrl(format!("Invalid base_url '{}': {}", site.base_url, e))
        };
        let base = Url::parse(&site.base_url).map_err(invalid)?;

        Ok(Self {
            client: build_http_client(site)?,
            search_url: base.join(SEARCH_PATH).map_err(invalid)?,
            detail_url: base.join(DETAIL_PATH).map_err(invalid)?,
            records_per_page,
            detail_fields,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, HarvestError> {
        Self::new(
            &config.site,
            config.harvester.records_per_page,
            config.detail_fields.clone(),
        )
    }

    fn search_params(&self, query: &SearchQuery) -> Vec<(&'static str, String)> {
        let mut params = vec![("q", query.to_query_string())];
        params.extend(
            SEARCH_PARAMS
                .iter()
                .map(|(key, value)| (*key, value.to_string())),
        );
        params
    }

    async fn get_html<P>(&self, url: &Url, params: &P) -> ExtractResult<String>
    where
        P: serde::Serialize + ?Sized,
    {
        let response = self
            .client
            .get(url.clone())
            .query(params)
            .send()
            .await
            .map_err(classify_error)?;

        let status = response.status();
        if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
            tracing::warn!(status = status.as_u16(), url = %url, "Request blocked");
            return Err(ExtractError::Blocked {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(ExtractError::Http {
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(classify_error)
    }
}

fn classify_error(error: reqwest::Error) -> ExtractError {
    if error.is_timeout() {
        ExtractError::Timeout
    } else {
        ExtractError::Network(error.to_string())
    }
}

#[async_trait]
impl TotalRecordCounter for FpdsClient {
    async fn count(&self, query: &SearchQuery) -> ExtractResult<u64> {
        let body = self
            .get_html(&self.search_url, &self.search_params(query))
            .await?;

        match parse_total_count(&body) {
            Some(total) => {
                tracing::info!(total, query = %query.to_query_string(), "Total matching records");
                Ok(total)
            }
            None => {
                tracing::warn!("Could not read the total record count from the results heading");
                Ok(0)
            }
        }
    }
}

#[async_trait]
impl PageExtractor for FpdsClient {
    async fn extract_page(
        &self,
        page_index: u64,
        query: &SearchQuery,
    ) -> ExtractResult<Vec<RawRecord>> {
        let mut params = self.search_params(query);
        let start = page_index * u64::from(self.records_per_page);
        params.push(("start", start.to_string()));

        let body = self.get_html(&self.search_url, &params).await?;
        let records = parse_search_page(&body, page_index)?;
        tracing::debug!(page = page_index, records = records.len(), "Parsed search page");
        Ok(records)
    }
}

#[async_trait]
impl DetailExtractor for FpdsClient {
    async fn extract_detail(&self, reference: &DetailReference) -> ExtractResult<DetailMap> {
        let body = self.get_html(&self.detail_url, reference).await?;

        let document = Html::parse_document(&body);
        let mut detail = parse_detail_document(&document)?;
        apply_rules(&self.detail_fields, &document, &mut detail);

        if detail.is_empty() {
            return Err(ExtractError::Parse(
                "detail page contained no recognisable fields".to_string(),
            ));
        }
        Ok(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RESULTS: &str = r#"
<html><body>
<table><tr>
  <td><span class="results_heading">List Of Contract Actions Matching Your Criteria</span></td>
  <td>Results <b>1</b> - <b>30</b> of <b>95</b></td>
</tr></table>
<table class="resultbox1">
  <tr><td>Award ID:</td><td>W91-0001</td></tr>
  <tr><td><a title="View" href="javascript:go('viewLinkController.jsp?PIID=W91-0001&agencyID=9700')">View</a></td></tr>
</table>
</body></html>
"#;

    const DETAIL: &str = r#"
<html><body><table>
  <tr><td><span>Status:</span></td><td class="displayText">Final</td></tr>
</table>
<span id="office">NAVSEA</span>
</body></html>
"#;

    fn client_for(server: &MockServer, rules: Vec<FieldRule>) -> FpdsClient {
        let site = SiteConfig {
            base_url: server.uri(),
            ..SiteConfig::default()
        };
        FpdsClient::new(&site, 30, rules).unwrap()
    }

    fn query() -> SearchQuery {
        SearchQuery::new(crate::DateRange::parse("2026/02/01", "2026/02/28").unwrap())
            .with_filter("UEI_NAME", "ACME")
    }

    #[test]
    fn test_build_http_client() {
        assert!(build_http_client(&SiteConfig::default()).is_ok());
    }

    #[test]
    fn test_invalid_base_url() {
        let site = SiteConfig {
            base_url: "not a url".to_string(),
            ..SiteConfig::default()
        };
        assert!(matches!(
            FpdsClient::new(&site, 30, vec![]),
            Err(HarvestError::Config(ConfigError::InvalidUrl(_)))
        ));
    }

    #[tokio::test]
    async fn test_extract_page_sends_offset_and_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(SEARCH_PATH))
            .and(query_param("start", "60"))
            .and(query_param("indexName", "awardfull"))
            .and(query_param(
                "q",
                "ESTIMATED_COMPLETION_DATE:[2026/02/01,2026/02/28] UEI_NAME:\"ACME\"",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_string(RESULTS))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, vec![]);
        let records = client.extract_page(2, &query()).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].page, 2);
        assert_eq!(records[0].fields["award_id"], "W91-0001");
        assert_eq!(records[0].detail_ref.as_ref().unwrap()["PIID"], "W91-0001");
    }

    #[tokio::test]
    async fn test_count_reads_heading() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(SEARCH_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string(RESULTS))
            .mount(&server)
            .await;

        let client = client_for(&server, vec![]);
        assert_eq!(client.count(&query()).await.unwrap(), 95);
    }

    #[tokio::test]
    async fn test_count_unreadable_is_zero() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(SEARCH_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&server)
            .await;

        let client = client_for(&server, vec![]);
        assert_eq!(client.count(&query()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(SEARCH_PATH))
            .and(query_param("start", "0"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(SEARCH_PATH))
            .and(query_param("start", "30"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client_for(&server, vec![]);
        let blocked = client.extract_page(0, &query()).await.unwrap_err();
        assert_eq!(blocked, ExtractError::Blocked { status: 429 });
        assert!(blocked.is_blocked());

        let failed = client.extract_page(1, &query()).await.unwrap_err();
        assert_eq!(failed, ExtractError::Http { status: 503 });
        assert!(!failed.is_blocked());
    }

    #[tokio::test]
    async fn test_timeout_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(RESULTS)
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let site = SiteConfig {
            base_url: server.uri(),
            timeout_seconds: 1,
            ..SiteConfig::default()
        };
        let client = FpdsClient::new(&site, 30, vec![]).unwrap();
        let error = client.extract_page(0, &query()).await.unwrap_err();
        assert_eq!(error, ExtractError::Timeout);
    }

    #[tokio::test]
    async fn test_extract_detail_applies_rules() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(DETAIL_PATH))
            .and(query_param("PIID", "W91-0001"))
            .respond_with(ResponseTemplate::new(200).set_body_string(DETAIL))
            .mount(&server)
            .await;

        let rules = vec![FieldRule {
            name: "office".to_string(),
            selector: "#office".to_string(),
            extract: Default::default(),
            transform: Default::default(),
            fallbacks: vec![],
        }];
        let client = client_for(&server, rules);

        let mut reference = DetailReference::new();
        reference.insert("PIID".to_string(), "W91-0001".to_string());
        let detail = client.extract_detail(&reference).await.unwrap();

        assert_eq!(detail["status_display"], "Final");
        assert_eq!(detail["office"], "NAVSEA");
    }

    #[tokio::test]
    async fn test_empty_detail_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(DETAIL_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&server)
            .await;

        let client = client_for(&server, vec![]);
        let result = client.extract_detail(&DetailReference::new()).await;
        assert!(matches!(result, Err(ExtractError::Parse(_))));
    }
}
