// # Endpoint and natter output parsing
//
// natter prints its mapping as
//
// ```text
// tcp://192.168.1.10:11451 <--Natter--> tcp://203.0.113.9:54321
// ```
//
// The address after the marker is the public endpoint.

use regex::Regex;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::LazyLock;

/// Token natter prints in front of the public address
pub const NATTER_MARKER: &str = "<--Natter-->";

static MAPPING_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<--Natter-->\s+tcp://(\d+\.\d+\.\d+\.\d+):(\d+)")
        .expect("mapping pattern is a valid regex")
});

/// Public endpoint reported by natter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Public IPv4 address
    pub ip: Ipv4Addr,
    /// Public port
    pub port: u16,
}

impl Endpoint {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Extract the public endpoint from one line of natter output
///
/// Returns `None` for any line that does not carry a well-formed mapping,
/// including octets above 255 and ports that do not fit in 16 bits.
pub fn parse_line(line: &str) -> Option<Endpoint> {
    let captures = MAPPING_PATTERN.captures(line)?;
    let ip = captures.get(1)?.as_str().parse::<Ipv4Addr>().ok()?;
    let port = captures.get(2)?.as_str().parse::<u16>().ok()?;
    Some(Endpoint { ip, port })
}
