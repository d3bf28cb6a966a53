use std::cell::Cell;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use tracing::debug;

const FORM_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

static RSD_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<link rel="EditURI" type="application/rsd\+xml" href="([^"]+)\?action=rsd""#)
        .expect("valid RSD regex")
});

/// Parameters of one API call, either as ordered pairs or as a pre-built
/// urlencoded query string (`action=query&list=backlinks&...`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiRequest {
    Params(Vec<(String, String)>),
    Query(String),
}

impl ApiRequest {
    pub fn params<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::Params(
            pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }

    pub fn query(query: impl Into<String>) -> Self {
        Self::Query(query.into())
    }

    /// Adds `key=value`, replacing an existing value for `key` in place.
    pub fn set_param(&mut self, key: &str, value: &str) {
        match self {
            Self::Params(pairs) => {
                if let Some(pair) = pairs.iter_mut().find(|(existing, _)| existing == key) {
                    pair.1 = value.to_string();
                } else {
                    pairs.push((key.to_string(), value.to_string()));
                }
            }
            Self::Query(query) => {
                let encoded = format!("{}={}", encode_component(key), encode_component(value));
                let mut replaced = false;
                let mut segments = Vec::new();
                for segment in query.split('&').filter(|segment| !segment.is_empty()) {
                    let segment_key = segment.split_once('=').map_or(segment, |(k, _)| k);
                    if !replaced && decode_component(segment_key) == key {
                        segments.push(encoded.clone());
                        replaced = true;
                    } else {
                        segments.push(segment.to_string());
                    }
                }
                if !replaced {
                    segments.push(encoded);
                }
                *query = segments.join("&");
            }
        }
    }

    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.set_param(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match self {
            Self::Params(pairs) => pairs
                .iter()
                .find(|(existing, _)| existing == key)
                .map(|(_, value)| value.clone()),
            Self::Query(query) => query.split('&').find_map(|segment| {
                let (segment_key, value) = segment.split_once('=').unwrap_or((segment, ""));
                (decode_component(segment_key) == key).then(|| decode_component(value))
            }),
        }
    }

    /// The urlencoded form body, without the `format` parameter.
    pub fn to_form_body(&self) -> String {
        match self {
            Self::Params(pairs) => pairs
                .iter()
                .map(|(key, value)| format!("{}={}", encode_component(key), encode_component(value)))
                .collect::<Vec<_>>()
                .join("&"),
            Self::Query(query) => query.clone(),
        }
    }
}

fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, FORM_VALUE).to_string()
}

fn decode_component(value: &str) -> String {
    percent_decode_str(&value.replace('+', " "))
        .decode_utf8_lossy()
        .into_owned()
}

/// One request/response round trip against a wiki's API endpoint.
pub trait Transport {
    fn issue_once(&self, request: &ApiRequest) -> Result<Value>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    pub api_endpoint: String,
    pub user_agent: String,
    pub timeout_ms: u64,
}

/// Blocking HTTP transport. Cookies set by the wiki (login session) are kept
/// in the client's cookie store and sent with every later request.
pub struct HttpTransport {
    client: Client,
    config: HttpTransportConfig,
    request_count: Cell<usize>,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_store(true)
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            config,
            request_count: Cell::new(0),
        })
    }
}

impl Transport for HttpTransport {
    fn issue_once(&self, request: &ApiRequest) -> Result<Value> {
        self.request_count.set(self.request_count.get() + 1);
        let action = request.get("action").unwrap_or_default();
        debug!(endpoint = %self.config.api_endpoint, %action, "issuing API request");

        let builder = self
            .client
            .post(&self.config.api_endpoint)
            .header("User-Agent", self.config.user_agent.clone());
        let builder = match request.clone().with_param("format", "json") {
            ApiRequest::Params(pairs) => builder.form(&pairs),
            request @ ApiRequest::Query(_) => builder
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(request.to_form_body()),
        };

        let response = builder.send().context("failed to call MediaWiki API")?;
        let status = response.status();
        if !status.is_success() {
            bail!("MediaWiki API request failed with HTTP {status}");
        }
        let payload: Value = response
            .json()
            .context("failed to decode MediaWiki API JSON response")?;
        Ok(payload)
    }

    fn request_count(&self) -> usize {
        self.request_count.get()
    }
}

/// Finds a wiki's `api.php` through the RSD `EditURI` link on its main page.
pub fn discover_api_endpoint(wiki_url: &str, user_agent: &str, timeout_ms: u64) -> Result<String> {
    let url = if wiki_url.contains("://") {
        wiki_url.to_string()
    } else {
        format!("http://{wiki_url}")
    };
    let client = Client::builder()
        .timeout(Duration::from_millis(timeout_ms))
        .build()
        .context("failed to build discovery HTTP client")?;
    let html = client
        .get(&url)
        .header("User-Agent", user_agent)
        .send()
        .and_then(|response| response.error_for_status())
        .and_then(|response| response.text())
        .with_context(|| format!("failed to fetch {url}"))?;
    extract_rsd_endpoint(&html)
        .with_context(|| format!("no EditURI link found at {url}; configure api_url explicitly"))
}

fn extract_rsd_endpoint(html: &str) -> Option<String> {
    RSD_LINK
        .captures(html)
        .and_then(|captures| captures.get(1))
        .map(|found| found.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::{ApiRequest, extract_rsd_endpoint};

    #[test]
    fn set_param_overwrites_existing_pair() {
        let mut request = ApiRequest::params([("action", "query"), ("blcontinue", "0|1")]);
        request.set_param("blcontinue", "0|42");
        request.set_param("list", "backlinks");
        assert_eq!(
            request,
            ApiRequest::params([
                ("action", "query"),
                ("blcontinue", "0|42"),
                ("list", "backlinks"),
            ])
        );
    }

    #[test]
    fn set_param_on_query_string_keeps_other_segments() {
        let mut request = ApiRequest::query("action=query&list=backlinks&bltitle=Main_Page");
        request.set_param("blcontinue", "0|Foo bar");
        assert_eq!(
            request,
            ApiRequest::query(
                "action=query&list=backlinks&bltitle=Main_Page&blcontinue=0%7CFoo%20bar"
            )
        );

        request.set_param("blcontinue", "1|Baz");
        assert_eq!(request.get("blcontinue").as_deref(), Some("1|Baz"));
        assert_eq!(request.get("bltitle").as_deref(), Some("Main_Page"));
        assert_eq!(request.to_form_body().matches("blcontinue").count(), 1);
    }

    #[test]
    fn format_parameter_is_overwritten_not_repeated() {
        let request = ApiRequest::params([("action", "query"), ("format", "xml")])
            .with_param("format", "json");
        assert_eq!(
            request,
            ApiRequest::params([("action", "query"), ("format", "json")])
        );

        let request = ApiRequest::query("format=xml&action=query").with_param("format", "json");
        assert_eq!(request.to_form_body(), "format=json&action=query");
    }

    #[test]
    fn form_body_encodes_reserved_characters() {
        let request = ApiRequest::params([("titles", "A&B"), ("text", "x=y z")]);
        assert_eq!(request.to_form_body(), "titles=A%26B&text=x%3Dy%20z");
    }

    #[test]
    fn extracts_rsd_endpoint_from_html() {
        let html = r#"<head><link rel="EditURI" type="application/rsd+xml" href="//en.wikipedia.org/w/api.php?action=rsd"/></head>"#;
        assert_eq!(
            extract_rsd_endpoint(html).as_deref(),
            Some("//en.wikipedia.org/w/api.php")
        );
        assert!(extract_rsd_endpoint("<html></html>").is_none());
    }
}
