//! Configuration types for natter-srv
//!
//! This module defines the configuration structure consumed by every
//! component. It is built once at startup (the daemon loads it from YAML)
//! and then injected, immutable, into each component.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Values shipped in the example configuration that must be replaced
const PLACEHOLDER_MARKERS: &[&str] = &["your_", "replace_me", "changeme"];

/// Longest accepted IP check interval (30 days)
pub const MAX_IP_CHECK_INTERVAL: u64 = 30 * 24 * 60 * 60;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// DNS provider credentials and zone
    pub cloudflare: CloudflareConfig,

    /// SRV record settings
    pub srv: SrvConfig,

    /// Child process settings
    pub natter: NatterConfig,

    /// Minimum interval between external IP checks (in seconds)
    #[serde(default = "default_ip_check_interval")]
    pub ip_check_interval: u64,
}

impl SupervisorConfig {
    /// Validate the configuration
    ///
    /// Checks that every required value is present and that the credentials
    /// are not the placeholders from the example configuration.
    /// Filesystem checks (the natter script) are left to the caller.
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.cloudflare.validate()?;

        if self.srv.name.trim().is_empty() {
            return Err(crate::Error::config("srv.name cannot be empty"));
        }

        if self.natter.port == 0 {
            return Err(crate::Error::config("natter.port must be > 0"));
        }

        if self.natter.interpreter.trim().is_empty() {
            return Err(crate::Error::config("natter.interpreter cannot be empty"));
        }

        if self.natter.script.as_os_str().is_empty() {
            return Err(crate::Error::config("natter.script cannot be empty"));
        }

        if self.ip_check_interval == 0 {
            return Err(crate::Error::config("ip_check_interval must be > 0"));
        }

        if self.ip_check_interval > MAX_IP_CHECK_INTERVAL {
            return Err(crate::Error::config(format!(
                "ip_check_interval must be at most {} seconds (30 days), got {}",
                MAX_IP_CHECK_INTERVAL, self.ip_check_interval
            )));
        }

        Ok(())
    }

    /// The IP check interval as a Duration
    pub fn ip_check_interval(&self) -> Duration {
        Duration::from_secs(self.ip_check_interval)
    }
}

/// Cloudflare credentials and zone
#[derive(Clone, Serialize, Deserialize)]
pub struct CloudflareConfig {
    /// API token with Zone:DNS:Edit permission
    /// ⚠️ NEVER log this value
    pub api_token: String,

    /// Zone ID that holds both records
    pub zone_id: String,

    /// Primary domain, used when the SRV name carries no domain part
    pub domain: String,
}

impl CloudflareConfig {
    /// Validate credentials and zone settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.api_token.trim().is_empty() {
            return Err(crate::Error::config("cloudflare.api_token cannot be empty"));
        }
        if is_placeholder(&self.api_token) {
            return Err(crate::Error::config(
                "cloudflare.api_token is still the example placeholder. \
                Create an API token with Zone:DNS:Edit permission and put it in config.yaml",
            ));
        }

        if self.zone_id.trim().is_empty() {
            return Err(crate::Error::config("cloudflare.zone_id cannot be empty"));
        }
        if is_placeholder(&self.zone_id) {
            return Err(crate::Error::config(
                "cloudflare.zone_id is still the example placeholder. \
                Copy the Zone ID from the domain's overview page",
            ));
        }

        if self.domain.trim().is_empty() {
            return Err(crate::Error::config("cloudflare.domain cannot be empty"));
        }

        Ok(())
    }
}

// Custom Debug implementation that hides the API token
impl std::fmt::Debug for CloudflareConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareConfig")
            .field("api_token", &"<REDACTED>")
            .field("zone_id", &self.zone_id)
            .field("domain", &self.domain)
            .finish()
    }
}

/// SRV record settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SrvConfig {
    /// Full SRV record name, e.g. `_minecraft._tcp.mc.example.com`
    pub name: String,

    /// SRV priority
    #[serde(default)]
    pub priority: u16,

    /// SRV weight
    #[serde(default = "default_srv_weight")]
    pub weight: u16,
}

/// Child process settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatterConfig {
    /// Path to natter.py
    pub script: PathBuf,

    /// Interpreter used to run the script
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Local port natter maps (`-p`)
    #[serde(default = "default_natter_port")]
    pub port: u16,

    /// Extra arguments appended verbatim
    #[serde(default)]
    pub args: Vec<String>,
}

/// Fixed delays used by the supervisor loop
///
/// These are not part of the configuration file. The defaults are the
/// production values; tests shorten them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// How often the IP watcher wakes up to see whether a check is due
    pub ip_wake_interval: Duration,

    /// Delay before retrying a failed spawn
    pub spawn_retry: Duration,

    /// Delay before restarting after an abnormal exit
    pub abnormal_exit_backoff: Duration,

    /// Pause between stop and start during a restart
    pub restart_pause: Duration,

    /// Grace period between SIGTERM and SIGKILL
    pub stop_grace: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            ip_wake_interval: Duration::from_secs(30),
            spawn_retry: Duration::from_secs(60),
            abnormal_exit_backoff: Duration::from_secs(10),
            restart_pause: Duration::from_secs(2),
            stop_grace: Duration::from_secs(5),
        }
    }
}

/// Check whether a credential still looks like an example value
pub fn is_placeholder(value: &str) -> bool {
    let lower = value.trim().to_lowercase();
    PLACEHOLDER_MARKERS.iter().any(|marker| lower.contains(marker))
}

fn default_ip_check_interval() -> u64 {
    600
}

fn default_srv_weight() -> u16 {
    5
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_natter_port() -> u16 {
    11451
}
