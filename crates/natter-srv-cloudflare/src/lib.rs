// # Cloudflare DNS API
//
// `DnsApi` implementation over Cloudflare API v4.
//
// - ✅ One HTTP request per trait call
// - ✅ HTTP timeout configured (30 seconds)
// - ✅ Envelope errors (`success: false`) surfaced with code and message
// - ✅ Specific error text for HTTP status codes (401/403, 404, 429, 5xx)
// - ❌ NO retry or backoff (the next endpoint change is the retry)
// - ❌ NO record id caching (owned by `Reconciler`)
//
// ## Security Requirements
//
// - API token NEVER appears in logs or `Debug` output
// - Construction fails fast if the token is empty
//
// ## API Reference
//
// - List: GET `/zones/:zone_id/dns_records?type=...&name=...`
// - Create: POST `/zones/:zone_id/dns_records`
// - Update: PUT `/zones/:zone_id/dns_records/:record_id`
// - Get: GET `/zones/:zone_id/dns_records/:record_id`

use async_trait::async_trait;
use natter_srv_core::config::CloudflareConfig;
use natter_srv_core::traits::{ApiError, DnsApi, DnsRecord, RecordPayload, RecordType};
use natter_srv_core::{Error, Result};
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info};

/// Cloudflare API base URL
pub const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

const PROVIDER: &str = "cloudflare";

/// Envelope as it arrives on the wire
#[derive(Debug, Deserialize)]
struct RawEnvelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiError>,
    result: Option<T>,
}

/// Outcome carried by every Cloudflare response body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiResponse<T> {
    /// `success: true` with a result
    Success { result: T },
    /// `success: false`, or a success without a result
    Failure { errors: Vec<ApiError> },
}

impl<T: DeserializeOwned> ApiResponse<T> {
    /// Parse a response body
    pub fn from_body(body: &str) -> Result<Self> {
        let raw: RawEnvelope<T> = serde_json::from_str(body)?;
        Ok(match (raw.success, raw.result) {
            (true, Some(result)) => ApiResponse::Success { result },
            (true, None) => ApiResponse::Failure {
                errors: vec![ApiError {
                    code: None,
                    message: "response carried no result".to_string(),
                }],
            },
            (false, _) => ApiResponse::Failure { errors: raw.errors },
        })
    }

    /// Turn the envelope into a result for `operation`
    pub fn into_result(self, operation: &str) -> Result<T> {
        match self {
            ApiResponse::Success { result } => Ok(result),
            ApiResponse::Failure { errors } => Err(Error::api(operation, errors)),
        }
    }
}

/// Cloudflare DNS API client
///
/// # Trust Level: Untrusted
///
/// Stateless and single-shot. Record ids are cached by the caller.
pub struct CloudflareApi {
    /// Cloudflare API token
    /// ⚠️ NEVER log this value
    api_token: String,

    /// Zone holding the managed records
    zone_id: String,

    /// API root, overridable for tests
    base_url: String,

    /// HTTP client for API requests
    client: reqwest::Client,
}

// Custom Debug implementation that hides the API token
impl std::fmt::Debug for CloudflareApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareApi")
            .field("api_token", &"<REDACTED>")
            .field("zone_id", &self.zone_id)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl CloudflareApi {
    /// Create a new client
    ///
    /// # Parameters
    ///
    /// - `api_token`: Cloudflare API token with Zone:DNS:Edit permission
    /// - `zone_id`: Zone that holds both records
    ///
    /// # Security
    ///
    /// The API token will NEVER be logged or displayed in error messages.
    pub fn new(api_token: impl Into<String>, zone_id: impl Into<String>) -> Result<Self> {
        let api_token = api_token.into();
        if api_token.trim().is_empty() {
            return Err(Error::config("Cloudflare API token cannot be empty"));
        }

        let zone_id = zone_id.into();
        if zone_id.trim().is_empty() {
            return Err(Error::config("Cloudflare zone id cannot be empty"));
        }

        // Build HTTP client with timeout
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::http(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_token,
            zone_id,
            base_url: CLOUDFLARE_API_BASE.to_string(),
            client,
        })
    }

    /// Create a client from the `cloudflare` configuration section
    pub fn from_config(config: &CloudflareConfig) -> Result<Self> {
        Self::new(config.api_token.clone(), config.zone_id.clone())
    }

    /// Point the client at another API root
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn records_url(&self) -> String {
        format!("{}/zones/{}/dns_records", self.base_url, self.zone_id)
    }

    fn record_url(&self, id: &str) -> String {
        format!("{}/{}", self.records_url(), id)
    }

    /// Send one request and unwrap the response envelope
    async fn send<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T> {
        let response = request
            .bearer_auth(&self.api_token)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| Error::http(format!("{} failed: {}", operation, e.without_url())))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read response body".to_string());

        if !status.is_success() {
            return Err(status_error(operation, status, &body));
        }

        ApiResponse::<T>::from_body(&body)
            .map_err(|e| {
                Error::provider(
                    PROVIDER,
                    format!("{}: failed to parse response: {}", operation, e),
                )
            })?
            .into_result(operation)
    }
}

/// Map a non-2xx response to an error
///
/// Cloudflare usually still sends an envelope with an error list; when it
/// does, the list is kept.
fn status_error(operation: &str, status: StatusCode, body: &str) -> Error {
    let errors = serde_json::from_str::<RawEnvelope<serde_json::Value>>(body)
        .map(|raw| raw.errors)
        .unwrap_or_default();

    let detail = if errors.is_empty() {
        body.chars().take(200).collect::<String>()
    } else {
        natter_srv_core::error::render_api_errors(&errors)
    };

    let message = match status.as_u16() {
        401 | 403 => format!(
            "{}: authentication failed, check that the API token has Zone:DNS:Edit permission. Status: {} ({})",
            operation, status, detail
        ),
        404 => format!("{}: not found. Status: {} ({})", operation, status, detail),
        429 => format!(
            "{}: rate limit exceeded. Status: {} ({})",
            operation, status, detail
        ),
        500..=599 => format!(
            "{}: Cloudflare server error (transient). Status: {} ({})",
            operation, status, detail
        ),
        _ => format!("{}: failed. Status: {} ({})", operation, status, detail),
    };

    Error::provider(PROVIDER, message)
}

#[async_trait]
impl DnsApi for CloudflareApi {
    async fn find_record(&self, record_type: RecordType, name: &str) -> Result<Option<DnsRecord>> {
        debug!("Looking up {} record {}", record_type, name);

        let operation = format!("list {} records", record_type);
        let request = self
            .client
            .get(self.records_url())
            .query(&[("type", record_type.as_str()), ("name", name)]);

        let records: Vec<DnsRecord> = self.send(&operation, request).await?;
        let found = records.into_iter().next();

        match &found {
            Some(record) => debug!("Found {} record {}: {}", record_type, name, record.id),
            None => debug!("No {} record named {}", record_type, name),
        }
        Ok(found)
    }

    async fn create_record(&self, payload: &RecordPayload) -> Result<DnsRecord> {
        let operation = format!("create {} record", payload.record_type);
        let request = self.client.post(self.records_url()).json(payload);

        let record: DnsRecord = self.send(&operation, request).await?;
        info!(
            "Created {} record {} ({})",
            payload.record_type, payload.name, record.id
        );
        Ok(record)
    }

    async fn update_record(&self, id: &str, payload: &RecordPayload) -> Result<DnsRecord> {
        let operation = format!("update {} record", payload.record_type);
        let request = self.client.put(self.record_url(id)).json(payload);

        let record: DnsRecord = self.send(&operation, request).await?;
        info!(
            "Updated {} record {} ({})",
            payload.record_type, payload.name, id
        );
        Ok(record)
    }

    async fn get_record(&self, id: &str) -> Result<DnsRecord> {
        let request = self.client.get(self.record_url(id));
        self.send("get DNS record", request).await
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}
