//! Registry lookup client
//!
//! Fetches one establishment record by identifier from the remote registry and
//! classifies the response. Pacing between calls is the worker's concern; this
//! client only issues the request it is asked for.

use async_trait::async_trait;
use reconlab_common::config::RegistryConfig;
use reconlab_common::{flatten, Error, FlatRecord, Result};
use reqwest::{StatusCode, Url};
use serde_json::{Map, Value};
use std::time::Duration;

const USER_AGENT: &str = concat!("ReconLab/", env!("CARGO_PKG_VERSION"));

/// Throttling delay when the registry does not advertise one
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Connection probe timeout
const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of one registry lookup
#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome {
    /// Flattened registry record
    Found(FlatRecord),
    /// Registry reports the identifier does not exist
    NotFound,
    /// Registry is throttling; wait at least this many seconds
    RateLimited(u64),
    /// Network failure, timeout, unexpected status or unreadable body
    TransportError(String),
}

/// Lookup of a single record by external identifier
#[async_trait]
pub trait RegistryLookup: Send + Sync {
    async fn fetch(&self, identifier: &str) -> LookupOutcome;
}

/// HTTP client for the registry
pub struct RegistryClient {
    http_client: reqwest::Client,
    base_url: Url,
    lookup_path: String,
    api_key_header: String,
    unwrap_field: Option<String>,
    api_token: Option<String>,
}

impl RegistryClient {
    /// Build a client; `api_token` of `None` sends unauthenticated requests
    pub fn new(config: &RegistryConfig, api_token: Option<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        let base_url = Url::parse(config.base_url.trim_end_matches('/')).map_err(|e| {
            Error::Config(format!("Invalid registry base URL {:?}: {}", config.base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "Invalid registry base URL {:?}",
                config.base_url
            )));
        }

        Ok(Self {
            http_client,
            base_url,
            lookup_path: config.lookup_path.clone(),
            api_key_header: config.api_key_header.clone(),
            unwrap_field: config.unwrap_field.clone(),
            api_token,
        })
    }

    /// Lookup URL with the identifier percent-encoded inside its path segment
    ///
    /// `#`, `?` and `/` in an identifier never change the requested resource.
    pub fn lookup_url(&self, identifier: &str) -> Url {
        self.endpoint(
            self.lookup_path
                .split('/')
                .filter(|segment| !segment.is_empty())
                .map(|segment| segment.replace("{id}", identifier)),
        )
    }

    fn endpoint(&self, segments: impl IntoIterator<Item = String>) -> Url {
        let mut url = self.base_url.clone();
        // Checked in `new`
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            for segment in segments {
                path.push(&segment);
            }
        }
        url
    }

    fn get(&self, url: Url) -> reqwest::RequestBuilder {
        let request = self
            .http_client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json");

        match &self.api_token {
            Some(token) => request.header(self.api_key_header.as_str(), token.as_str()),
            None => request,
        }
    }

    /// Probe the registry's information endpoint
    ///
    /// Never fails: any error is logged and reported as `false`.
    pub async fn check_connection(&self) -> bool {
        let url = self.endpoint(["informations".to_string()]);

        match self.get(url).timeout(CHECK_TIMEOUT).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                tracing::error!(status = %response.status(), "Registry connection check failed");
                false
            }
            Err(e) => {
                tracing::error!(error = %e, "Registry connection check failed");
                false
            }
        }
    }

    /// Common flattened registry fields offered when mapping an API-mode project
    pub fn suggested_fields() -> &'static [&'static str] {
        &[
            "siret",
            "uniteLegale.denominationUniteLegale",
            "adresseEtablissement.numeroVoieEtablissement",
            "adresseEtablissement.typeVoieEtablissement",
            "adresseEtablissement.libelleVoieEtablissement",
            "adresseEtablissement.codePostalEtablissement",
            "adresseEtablissement.libelleCommuneEtablissement",
            "uniteLegale.etatAdministratifUniteLegale",
        ]
    }

    fn unwrap_document(&self, mut document: Map<String, Value>) -> Map<String, Value> {
        if let Some(field) = &self.unwrap_field {
            if let Some(Value::Object(inner)) = document.remove(field) {
                return inner;
            }
        }
        document
    }
}

#[async_trait]
impl RegistryLookup for RegistryClient {
    async fn fetch(&self, identifier: &str) -> LookupOutcome {
        let url = self.lookup_url(identifier);
        tracing::debug!(identifier = %identifier, url = %url, "Querying registry");

        let response = match self.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(identifier = %identifier, error = %e, "Registry request failed");
                return LookupOutcome::TransportError(e.to_string());
            }
        };

        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            tracing::info!(identifier = %identifier, "Registry has no record");
            return LookupOutcome::NotFound;
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = parse_retry_after(
                response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok()),
            );
            tracing::warn!(retry_after_secs = retry_after, "Registry rate limit exceeded");
            return LookupOutcome::RateLimited(retry_after);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(identifier = %identifier, status = %status, body = %body, "Registry error");
            return LookupOutcome::TransportError(format!("HTTP {}", status.as_u16()));
        }

        match response.json::<Value>().await {
            Ok(Value::Object(document)) => {
                LookupOutcome::Found(flatten(&self.unwrap_document(document)))
            }
            Ok(_) => LookupOutcome::TransportError("Registry response is not an object".to_string()),
            Err(e) => {
                tracing::warn!(identifier = %identifier, error = %e, "Unreadable registry response");
                LookupOutcome::TransportError(e.to_string())
            }
        }
    }
}

/// Seconds to wait from a `Retry-After` header value
///
/// Only the integer-seconds form is understood; anything else falls back to
/// the default.
pub fn parse_retry_after(header: Option<&str>) -> u64 {
    header
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client_for(server: &MockServer, token: Option<&str>) -> RegistryClient {
        let config = RegistryConfig {
            base_url: server.base_url(),
            timeout_secs: 2,
            ..Default::default()
        };
        RegistryClient::new(&config, token.map(String::from)).unwrap()
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(Some("5")), 5);
        assert_eq!(parse_retry_after(Some(" 12 ")), 12);
        assert_eq!(parse_retry_after(Some("Wed, 21 Oct 2015 07:28:00 GMT")), 60);
        assert_eq!(parse_retry_after(None), 60);
    }

    #[tokio::test]
    async fn test_found_is_unwrapped_and_flattened() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/siret/12345678901234")
                    .header("X-INSEE-Api-Key-Integration", "secret");
                then.status(200).json_body(json!({
                    "header": {"statut": 200},
                    "etablissement": {
                        "siret": "12345678901234",
                        "uniteLegale": {"denominationUniteLegale": "ACME"}
                    }
                }));
            })
            .await;

        let client = client_for(&server, Some("secret"));
        let outcome = client.fetch("12345678901234").await;

        mock.assert_async().await;
        let LookupOutcome::Found(record) = outcome else {
            panic!("expected Found, got {:?}", outcome);
        };
        assert_eq!(record["siret"], "12345678901234");
        assert_eq!(record["uniteLegale.denominationUniteLegale"], "ACME");
        assert!(!record.contains_key("header.statut"));
    }

    #[tokio::test]
    async fn test_unwrapped_body_without_wrapper_is_flattened_whole() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/siret/1");
                then.status(200).json_body(json!({"a": {"b": 1}}));
            })
            .await;

        let outcome = client_for(&server, None).fetch("1").await;
        assert_eq!(
            outcome,
            LookupOutcome::Found(json!({"a.b": 1}).as_object().cloned().unwrap())
        );
    }

    #[test]
    fn test_lookup_url_keeps_base_path() {
        let config = RegistryConfig {
            base_url: "https://registry.example/api-sirene/3.11/".to_string(),
            ..Default::default()
        };
        let client = RegistryClient::new(&config, None).unwrap();

        assert_eq!(
            client.lookup_url("12345678901234").as_str(),
            "https://registry.example/api-sirene/3.11/siret/12345678901234"
        );
        assert_eq!(
            client.lookup_url("12/3 4?x#y").as_str(),
            "https://registry.example/api-sirene/3.11/siret/12%2F3%204%3Fx%23y"
        );
    }

    #[test]
    fn test_invalid_base_url_is_config_error() {
        let config = RegistryConfig {
            base_url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            RegistryClient::new(&config, None),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_identifier_with_delimiters_stays_in_its_segment() {
        let server = MockServer::start_async().await;
        let prefix_mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/siret/123");
                then.status(200).json_body(json!({"etablissement": {"siret": "123"}}));
            })
            .await;

        let client = client_for(&server, None);
        for identifier in ["123#bogus", "123?siret=123", "123/extra"] {
            let outcome = client.fetch(identifier).await;
            assert!(
                !matches!(outcome, LookupOutcome::Found(_)),
                "{} matched another record: {:?}",
                identifier,
                outcome
            );
        }

        prefix_mock.assert_calls_async(0).await;
    }

    #[tokio::test]
    async fn test_not_found() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/siret/000");
                then.status(404).body("unknown siret");
            })
            .await;

        assert_eq!(client_for(&server, None).fetch("000").await, LookupOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_rate_limited_with_and_without_header() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/siret/limited");
                then.status(429).header("retry-after", "7");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/siret/bare");
                then.status(429);
            })
            .await;

        let client = client_for(&server, None);
        assert_eq!(client.fetch("limited").await, LookupOutcome::RateLimited(7));
        assert_eq!(client.fetch("bare").await, LookupOutcome::RateLimited(60));
    }

    #[tokio::test]
    async fn test_server_error_is_transport_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/siret/boom");
                then.status(500).body("internal");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/siret/garbled");
                then.status(200).body("not json");
            })
            .await;

        let client = client_for(&server, None);
        assert!(matches!(client.fetch("boom").await, LookupOutcome::TransportError(_)));
        assert!(matches!(client.fetch("garbled").await, LookupOutcome::TransportError(_)));
    }

    #[tokio::test]
    async fn test_unreachable_registry_is_transport_error() {
        let config = RegistryConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 1,
            ..Default::default()
        };
        let client = RegistryClient::new(&config, None).unwrap();

        assert!(matches!(client.fetch("1").await, LookupOutcome::TransportError(_)));
        assert!(!client.check_connection().await);
    }

    #[tokio::test]
    async fn test_check_connection() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/informations");
                then.status(200).json_body(json!({"etatService": "UP"}));
            })
            .await;

        assert!(client_for(&server, Some("t")).check_connection().await);
        mock.assert_async().await;
    }
}
