// # HTTP IP Lookup
//
// `IpLookup` over public "what is my IP" services.
//
// ## Architecture
//
// Each `HttpLookup` is one service: a URL plus an extraction rule that pulls
// the candidate address out of the response body. Ordering, validation and
// fallback across services are owned by `IpResolver` in the core crate.
//
// ## Built-in services
//
// [`default_lookups()`] returns the ranked list used by the daemon. Services
// answer in three shapes: JSON, bare text, or an HTML/JS snippet, hence the
// three extraction rules.

use natter_srv_core::resolver::IpResolver;
use natter_srv_core::traits::IpLookup;
use natter_srv_core::{Error, Result};

use regex::Regex;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Per-request timeout for IP lookups
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// How to pull the candidate address out of a response body
#[derive(Clone)]
pub enum Extraction {
    /// Walk a dotted path of JSON object keys to a string value
    JsonPath(Vec<String>),
    /// The whole body, trimmed
    Text,
    /// Capture group 1 of a regular expression
    Regex(Regex),
}

impl Extraction {
    /// JSON path rule, e.g. `data.ip`
    pub fn json_path(path: &str) -> Self {
        Extraction::JsonPath(path.split('.').map(str::to_string).collect())
    }

    /// Regex rule; the pattern must have a capture group
    pub fn regex(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| Error::config(format!("invalid extraction pattern {}: {}", pattern, e)))?;
        if regex.captures_len() < 2 {
            return Err(Error::config(format!(
                "extraction pattern {} has no capture group",
                pattern
            )));
        }
        Ok(Extraction::Regex(regex))
    }

    /// Apply the rule to a response body
    pub fn extract(&self, body: &str) -> Option<String> {
        match self {
            Extraction::JsonPath(path) => {
                let value: serde_json::Value = serde_json::from_str(body).ok()?;
                let leaf = path.iter().try_fold(&value, |node, key| node.get(key))?;
                leaf.as_str().map(|s| s.trim().to_string())
            }
            Extraction::Text => {
                let text = body.trim();
                (!text.is_empty()).then(|| text.to_string())
            }
            Extraction::Regex(regex) => regex
                .captures(body)
                .and_then(|captures| captures.get(1))
                .map(|m| m.as_str().trim().to_string()),
        }
    }
}

impl fmt::Debug for Extraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Extraction::JsonPath(path) => write!(f, "JsonPath({})", path.join(".")),
            Extraction::Text => write!(f, "Text"),
            Extraction::Regex(regex) => write!(f, "Regex({})", regex.as_str()),
        }
    }
}

/// One external IP service
#[derive(Debug, Clone)]
pub struct HttpLookup {
    /// Service URL
    url: String,

    /// Extraction rule for the body
    extraction: Extraction,

    /// HTTP client (shared between lookups)
    client: reqwest::Client,
}

impl HttpLookup {
    /// Create a lookup with its own client
    pub fn new(url: impl Into<String>, extraction: Extraction) -> Result<Self> {
        Ok(Self::with_client(build_client()?, url, extraction))
    }

    /// Create a lookup on an existing client
    pub fn with_client(client: reqwest::Client, url: impl Into<String>, extraction: Extraction) -> Self {
        Self {
            url: url.into(),
            extraction,
            client,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl IpLookup for HttpLookup {
    async fn lookup(&self) -> Result<String> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::ip_lookup(format!("request to {} failed: {}", self.url, e)))?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(Error::ip_lookup(format!(
                "{} returned {}",
                self.url,
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::ip_lookup(format!("failed to read {}: {}", self.url, e)))?;

        let candidate = self.extraction.extract(&body).ok_or_else(|| {
            Error::ip_lookup(format!(
                "no address in response from {} ({:?})",
                self.url, self.extraction
            ))
        })?;

        debug!("{} answered {}", self.url, candidate);
        Ok(candidate)
    }

    fn name(&self) -> &str {
        &self.url
    }
}

fn build_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(LOOKUP_TIMEOUT)
        .build()
        .map_err(|e| Error::http(format!("failed to build HTTP client: {}", e)))
}

/// The built-in services, in the order they are tried
pub fn default_lookups() -> Result<Vec<Box<dyn IpLookup>>> {
    let client = build_client()?;

    let services = [
        ("https://myip.ipip.net/json", Extraction::json_path("data.ip")),
        ("https://api-ipv4.ip.sb/ip", Extraction::Text),
        ("http://ip.3322.net", Extraction::Text),
        (
            "https://ddns.oray.com/checkip",
            Extraction::regex(r"(\d+\.\d+\.\d+\.\d+)")?,
        ),
        (
            "http://pv.sohu.com/cityjson?ie=utf-8",
            Extraction::regex(r#""cip":\s*"([^"]+)""#)?,
        ),
        (
            "https://www.taobao.com/help/getip.php",
            Extraction::regex(r#""ip":\s*"([^"]+)""#)?,
        ),
    ];

    Ok(services
        .into_iter()
        .map(|(url, extraction)| {
            Box::new(HttpLookup::with_client(client.clone(), url, extraction)) as Box<dyn IpLookup>
        })
        .collect())
}

/// Resolver over the built-in services
pub fn default_resolver() -> Result<IpResolver> {
    Ok(IpResolver::new(default_lookups()?))
}
