// # natter-srv-core
//
// Core library for supervising natter and publishing its mapping as DNS.
//
// ## Architecture Overview
//
// - **Supervisor**: runs natter, reads its output, parses the public endpoint
// - **Reconciler**: keeps one A record and one SRV record in line with it
// - **IpResolver**: ranked external IP lookups
// - **IpWatcher**: restarts natter when the external IP changes
// - **Orchestrator**: the run loop tying the four together
//
// ## Boundaries
//
// - **DnsApi**: provider record operations (`natter-srv-cloudflare`)
// - **IpLookup**: one external IP service (`natter-srv-ip-http`)
// - **EndpointSink**: where the supervisor hands new endpoints
//
// ## Design Principles
//
// 1. **Library-First**: the daemon only loads config and calls `Orchestrator::run`
// 2. **Idempotency**: record ids are cached; a repeated endpoint means updates, not creates
// 3. **No retry storms**: failed DNS writes wait for the next endpoint change

pub mod config;
pub mod control;
pub mod endpoint;
pub mod error;
pub mod orchestrator;
pub mod reconciler;
pub mod resolver;
pub mod srv;
pub mod supervisor;
pub mod traits;
pub mod watcher;

// Re-export core types for convenience
pub use config::{CloudflareConfig, NatterConfig, SrvConfig, SupervisorConfig, Timings};
pub use control::Control;
pub use endpoint::{Endpoint, parse_line};
pub use error::{Error, Result};
pub use orchestrator::{Orchestrator, SupervisorEvent};
pub use reconciler::{ReconcileReport, Reconciler, UpsertOutcome, Verification};
pub use resolver::IpResolver;
pub use srv::{SrvName, validate_srv_name};
pub use supervisor::{ChildCommand, ChildHandle, MonitorOutcome, Supervisor};
pub use traits::{DnsApi, EndpointSink, IpLookup};
pub use watcher::{CheckOutcome, ExternalIp, IpWatcher};
