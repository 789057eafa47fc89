// # DNS API Trait
//
// Defines the four record operations the reconciler depends on.
//
// ## Implementations
//
// - Cloudflare: `natter-srv-cloudflare` crate
//
// ## Usage
//
// ```rust,ignore
// use natter_srv_core::traits::{DnsApi, RecordPayload, RecordType};
//
// let api = /* DnsApi implementation */;
// let existing = api.find_record(RecordType::A, "natter-server.example.com").await?;
// if existing.is_none() {
//     api.create_record(&RecordPayload::a("natter-server.example.com", ip)).await?;
// }
// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// TTL applied to both managed records (seconds)
pub const RECORD_TTL: u32 = 120;

/// Record types managed by natter-srv
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordType {
    /// IPv4 address record
    A,
    /// Service locator record
    #[serde(rename = "SRV")]
    Srv,
}

impl RecordType {
    /// Wire name of the record type
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Srv => "SRV",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured SRV data sent on create/update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrvData {
    pub service: String,
    pub proto: String,
    pub name: String,
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    pub target: String,
}

/// Body of a create or update call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordPayload {
    #[serde(rename = "type")]
    pub record_type: RecordType,

    pub name: String,

    /// Record content (A records)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Structured data (SRV records)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<SrvData>,

    pub ttl: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxied: Option<bool>,
}

impl RecordPayload {
    /// A record pointing `name` at `ip`, never proxied
    pub fn a(name: impl Into<String>, ip: Ipv4Addr) -> Self {
        Self {
            record_type: RecordType::A,
            name: name.into(),
            content: Some(ip.to_string()),
            data: None,
            ttl: RECORD_TTL,
            proxied: Some(false),
        }
    }

    /// SRV record carrying structured data
    pub fn srv(name: impl Into<String>, data: SrvData) -> Self {
        Self {
            record_type: RecordType::Srv,
            name: name.into(),
            content: None,
            data: Some(data),
            ttl: RECORD_TTL,
            proxied: None,
        }
    }
}

/// SRV data as reported back by the provider
///
/// Providers may omit fields, so everything is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportedSrvData {
    #[serde(default)]
    pub priority: Option<u16>,
    #[serde(default)]
    pub weight: Option<u16>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub target: Option<String>,
}

/// A record as stored by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    /// Provider-assigned identifier
    pub id: String,

    pub name: String,

    #[serde(rename = "type")]
    pub record_type: String,

    #[serde(default)]
    pub content: Option<String>,

    #[serde(default)]
    pub data: Option<ReportedSrvData>,

    #[serde(default)]
    pub ttl: Option<u32>,
}

/// One entry of a provider's error list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{}: {}", code, self.message),
            None => write!(f, "N/A: {}", self.message),
        }
    }
}

/// Trait for DNS provider implementations
///
/// Implementations translate each call into exactly one provider request
/// and report every failure (transport error, non-2xx status, or a logical
/// failure inside a 2xx body) as `Err`.
///
/// # Trust Level: Untrusted
///
/// ## Allowed Capabilities
/// - ✅ Perform HTTP/HTTPS API calls to their endpoints only
/// - ✅ Parse provider-specific responses
///
/// ## Forbidden Capabilities
/// - ❌ Retry or back off (the next endpoint change is the retry)
/// - ❌ Cache record ids (owned by `Reconciler`)
/// - ❌ Spawn tasks
///
/// # Thread Safety
///
/// Implementations must be usable across async tasks.
#[async_trait]
pub trait DnsApi: Send + Sync {
    /// Find a record by exact type and name
    ///
    /// # Returns
    ///
    /// - `Ok(Some(record))`: the first matching record
    /// - `Ok(None)`: no record matches
    /// - `Err(Error)`: the lookup itself failed
    async fn find_record(
        &self,
        record_type: RecordType,
        name: &str,
    ) -> Result<Option<DnsRecord>, crate::Error>;

    /// Create a record and return it with its assigned id
    async fn create_record(&self, payload: &RecordPayload) -> Result<DnsRecord, crate::Error>;

    /// Replace the record with the given id
    async fn update_record(
        &self,
        id: &str,
        payload: &RecordPayload,
    ) -> Result<DnsRecord, crate::Error>;

    /// Read a record back by id
    async fn get_record(&self, id: &str) -> Result<DnsRecord, crate::Error>;

    /// Get the provider name (for logging/debugging)
    fn provider_name(&self) -> &'static str;
}
