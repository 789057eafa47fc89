//! External IP resolver
//!
//! Walks a ranked list of [`IpLookup`] strategies and returns the first
//! candidate that is a strict dotted quad. Individual failures are logged
//! at debug level and skipped; only exhausting the whole list is an error.

use crate::error::{Error, Result};
use crate::traits::IpLookup;
use regex::Regex;
use std::net::Ipv4Addr;
use std::sync::LazyLock;
use tracing::debug;

static DOTTED_QUAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}$").expect("dotted quad is a valid regex")
});

/// Ranked list of IP lookup strategies
pub struct IpResolver {
    lookups: Vec<Box<dyn IpLookup>>,
}

impl IpResolver {
    /// Create a resolver; earlier lookups take precedence
    pub fn new(lookups: Vec<Box<dyn IpLookup>>) -> Self {
        Self { lookups }
    }

    /// Number of configured strategies
    pub fn len(&self) -> usize {
        self.lookups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookups.is_empty()
    }

    /// Resolve the current public IPv4 address
    ///
    /// # Returns
    ///
    /// - `Ok(Ipv4Addr)`: the first accepted candidate
    /// - `Err(Error)`: every strategy failed; the address is unknown, not absent
    pub async fn resolve(&self) -> Result<Ipv4Addr> {
        for lookup in &self.lookups {
            match lookup.lookup().await {
                Ok(candidate) => match accept_candidate(&candidate) {
                    Some(ip) => {
                        debug!("External IP {} from {}", ip, lookup.name());
                        return Ok(ip);
                    }
                    None => {
                        debug!(
                            "Rejected candidate '{}' from {}: not a dotted quad",
                            candidate,
                            lookup.name()
                        );
                    }
                },
                Err(e) => {
                    debug!("Failed to get IP from {}: {}", lookup.name(), e);
                }
            }
        }

        Err(Error::ip_lookup(format!(
            "all {} lookup services failed",
            self.lookups.len()
        )))
    }
}

/// Accept a candidate only if it is a strict dotted quad
///
/// Groups of 1–3 digits are required; a group above 255 passes the syntax
/// check but cannot become an address, so it is rejected as well.
pub fn accept_candidate(candidate: &str) -> Option<Ipv4Addr> {
    if !DOTTED_QUAD.is_match(candidate) {
        return None;
    }
    candidate.parse().ok()
}
