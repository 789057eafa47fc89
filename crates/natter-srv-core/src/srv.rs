//! SRV name handling
//!
//! The SRV record name `_service._proto.domain` is split once and reused
//! for both records: the SRV payload carries the three parts, and the A
//! record that the SRV target points at lives under the same domain.

use crate::error::{Error, Result};
use tracing::{info, warn};

/// Host label of the A record the SRV target points at
pub const A_RECORD_HOST_LABEL: &str = "natter-server";

const FALLBACK_SERVICE: &str = "_minecraft";
const FALLBACK_PROTO: &str = "_tcp";

/// `_service._proto.domain` decomposition of the configured SRV name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvName {
    /// Full record name as configured
    pub full: String,
    /// Service label, e.g. `_minecraft`
    pub service: String,
    /// Protocol label, e.g. `_tcp`
    pub proto: String,
    /// Everything after the first two labels
    pub domain: String,
}

impl SrvName {
    /// Split a configured SRV name
    ///
    /// Names with fewer than three labels fall back to `_minecraft._tcp`
    /// under `fallback_domain`.
    pub fn parse(full: &str, fallback_domain: &str) -> Self {
        let parts: Vec<&str> = full.splitn(3, '.').collect();
        match parts.as_slice() {
            [service, proto, domain] => Self {
                full: full.to_string(),
                service: service.to_string(),
                proto: proto.to_string(),
                domain: domain.to_string(),
            },
            _ => Self {
                full: full.to_string(),
                service: FALLBACK_SERVICE.to_string(),
                proto: FALLBACK_PROTO.to_string(),
                domain: fallback_domain.to_string(),
            },
        }
    }

    /// Name of the A record the SRV target points at
    pub fn target_host(&self) -> String {
        format!("{}.{}", A_RECORD_HOST_LABEL, self.domain)
    }
}

/// Check the shape of a configured SRV name
///
/// The name must start with `_` and have at least three labels. A protocol
/// label without a leading `_` is accepted with a warning.
pub fn validate_srv_name(name: &str) -> Result<()> {
    if !name.starts_with('_') {
        return Err(Error::config(format!(
            "SRV name must start with '_': {}. Example: _minecraft._tcp.example.com",
            name
        )));
    }

    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() < 3 {
        return Err(Error::config(format!(
            "SRV name must look like '_service._proto.domain', got: {}. \
            Example: _minecraft._tcp.example.com",
            name
        )));
    }

    if !parts[1].starts_with('_') {
        warn!(
            "SRV protocol label should start with '_' (e.g. _tcp or _udp), got: {}",
            parts[1]
        );
    }

    info!("SRV record name accepted: {}", name);
    Ok(())
}
