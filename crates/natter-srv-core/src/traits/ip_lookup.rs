// # IP Lookup Trait
//
// Defines one strategy for learning the current public IPv4 address.
//
// ## Implementations
//
// - HTTP services: `natter-srv-ip-http` crate
//
// A lookup only produces a candidate string. Validating that the candidate
// is a dotted quad and choosing between strategies is the job of
// [`IpResolver`](crate::resolver::IpResolver).

use async_trait::async_trait;

/// Trait for external IP lookup strategies
///
/// # Trust Level: Semi-Trusted
///
/// ## Allowed Capabilities
/// - ✅ One bounded-timeout request per call
/// - ✅ Parse the response into a candidate string
///
/// ## Forbidden Capabilities
/// - ❌ Retry or fall back to other services (owned by `IpResolver`)
/// - ❌ Decide whether the address changed (owned by `IpWatcher`)
#[async_trait]
pub trait IpLookup: Send + Sync {
    /// Fetch a candidate address
    ///
    /// # Returns
    ///
    /// - `Ok(String)`: the extracted candidate (not yet validated)
    /// - `Err(Error)`: network error, non-200 response, or extraction miss
    async fn lookup(&self) -> Result<String, crate::Error>;

    /// Human-readable identifier (usually the URL) for logs
    fn name(&self) -> &str;
}
