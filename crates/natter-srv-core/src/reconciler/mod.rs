//! DNS reconciler
//!
//! Makes the provider's records match the latest endpoint:
//!
//! ```text
//!  Endpoint ──► A record  natter-server.<domain>  = ip
//!                  ▲
//!                  │ target
//!               SRV record <srv name>             = port
//! ```
//!
//! ## Pass
//!
//! 1. Look up the A record id if it is not cached yet
//! 2. Update the A record if the id is known, create it otherwise
//! 3. Look up the SRV record id if it is not cached yet
//! 4. Update or create the SRV record
//! 5. Read the SRV record back and compare its port
//!
//! Any failing call aborts the rest of the pass. Cached ids are never
//! dropped on failure; the next endpoint change runs the pass again.

use crate::config::SupervisorConfig;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::srv::SrvName;
use crate::traits::{DnsApi, RecordPayload, SrvData};
use tracing::{debug, error, info, warn};

/// Cached provider id of one managed record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordHandle {
    id: Option<String>,
}

impl RecordHandle {
    /// The cached id, if the record is known to exist
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

/// What an upsert did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No record existed, a new one was created
    Created { id: String },
    /// An existing record was replaced
    Updated { id: String },
}

impl UpsertOutcome {
    pub fn id(&self) -> &str {
        match self {
            UpsertOutcome::Created { id } | UpsertOutcome::Updated { id } => id,
        }
    }
}

/// Result of reading the SRV record back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// The provider reports the expected port
    Match { port: u16 },
    /// The provider reports a different (or no) port
    Mismatch { expected: u16, reported: Option<u16> },
    /// The read-back call failed
    Unavailable { reason: String },
}

/// Summary of one successful reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub endpoint: Endpoint,
    pub a_record: UpsertOutcome,
    pub srv_record: UpsertOutcome,
    pub verification: Verification,
}

/// Keeps one A record and one SRV record in line with the endpoint
pub struct Reconciler {
    /// Provider API
    api: Box<dyn DnsApi>,

    /// Decomposed SRV name
    srv: SrvName,

    /// Hostname of the A record (and SRV target)
    a_record_name: String,

    /// SRV priority
    priority: u16,

    /// SRV weight
    weight: u16,

    /// Cached A record id
    a_record: RecordHandle,

    /// Cached SRV record id
    srv_record: RecordHandle,
}

impl Reconciler {
    /// Create a reconciler for the configured SRV name
    ///
    /// No provider calls are made until the first [`reconcile`](Self::reconcile).
    pub fn new(api: Box<dyn DnsApi>, config: &SupervisorConfig) -> Self {
        let srv = SrvName::parse(&config.srv.name, &config.cloudflare.domain);
        let a_record_name = srv.target_host();

        Self {
            api,
            srv,
            a_record_name,
            priority: config.srv.priority,
            weight: config.srv.weight,
            a_record: RecordHandle::default(),
            srv_record: RecordHandle::default(),
        }
    }

    /// Hostname of the managed A record
    pub fn a_record_name(&self) -> &str {
        &self.a_record_name
    }

    /// Cached A record handle
    pub fn a_record(&self) -> &RecordHandle {
        &self.a_record
    }

    /// Cached SRV record handle
    pub fn srv_record(&self) -> &RecordHandle {
        &self.srv_record
    }

    /// Run one reconciliation pass for `endpoint`
    ///
    /// Safe to call repeatedly with the same endpoint: once both ids are
    /// cached, every call is two updates and one read.
    ///
    /// # Returns
    ///
    /// - `Ok(ReconcileReport)`: both records were written
    /// - `Err(Error)`: a lookup, create or update failed; later steps were skipped
    pub async fn reconcile(&mut self, endpoint: &Endpoint) -> Result<ReconcileReport> {
        if endpoint.port == 0 {
            warn!("natter reported port 0 for {}, skipping DNS update", endpoint.ip);
            return Err(Error::invalid_input(format!(
                "refusing to publish port 0 for {}",
                endpoint.ip
            )));
        }

        info!(
            "Reconciling {} records for {}",
            self.api.provider_name(),
            endpoint
        );

        let a_payload = RecordPayload::a(self.a_record_name.clone(), endpoint.ip);
        let a_record = upsert(self.api.as_ref(), &mut self.a_record, &a_payload)
            .await
            .inspect_err(|e| {
                error!(
                    "A record {} could not be written, skipping SRV update: {}",
                    self.a_record_name, e
                )
            })?;
        info!(
            "A record {} -> {} ({:?})",
            self.a_record_name, endpoint.ip, a_record
        );

        let srv_payload = RecordPayload::srv(self.srv.full.clone(), self.srv_data(endpoint.port));
        debug!(
            "SRV payload: {}",
            serde_json::to_string(&srv_payload).unwrap_or_default()
        );
        let srv_record = upsert(self.api.as_ref(), &mut self.srv_record, &srv_payload)
            .await
            .inspect_err(|e| error!("SRV record {} could not be written: {}", self.srv.full, e))?;
        info!(
            "SRV record {} -> {}:{} ({:?})",
            self.srv.full, self.a_record_name, endpoint.port, srv_record
        );

        let verification = self.verify(srv_record.id(), endpoint.port).await;

        Ok(ReconcileReport {
            endpoint: *endpoint,
            a_record,
            srv_record,
            verification,
        })
    }

    fn srv_data(&self, port: u16) -> SrvData {
        SrvData {
            service: self.srv.service.clone(),
            proto: self.srv.proto.clone(),
            name: self.srv.domain.clone(),
            priority: self.priority,
            weight: self.weight,
            port,
            target: self.a_record_name.clone(),
        }
    }

    /// Read the SRV record back and compare the published port
    ///
    /// A mismatch is reported, never retried.
    async fn verify(&self, id: &str, expected: u16) -> Verification {
        debug!("Verifying SRV record {}", id);

        let record = match self.api.get_record(id).await {
            Ok(record) => record,
            Err(e) => {
                error!("Failed to read back SRV record {}: {}", id, e);
                return Verification::Unavailable {
                    reason: e.to_string(),
                };
            }
        };

        let reported_port = record.data.as_ref().and_then(|data| data.port);
        let reported_target = record.data.as_ref().and_then(|data| data.target.clone());

        info!(
            "SRV record {} ({}): target={}, port={}, content={}, expected port={}",
            record.name,
            record.id,
            reported_target.as_deref().unwrap_or("unknown"),
            reported_port.map_or_else(|| "unknown".to_string(), |p| p.to_string()),
            record.content.as_deref().unwrap_or("unknown"),
            expected
        );

        match reported_port {
            Some(port) if port == expected => {
                info!("✓ SRV port matches ({})", port);
                Verification::Match { port }
            }
            reported => {
                warn!(
                    "✗ SRV port mismatch: provider reports {:?}, expected {}",
                    reported, expected
                );
                Verification::Mismatch { expected, reported }
            }
        }
    }
}

/// Update the record if its id is known, otherwise look it up and create it if absent
async fn upsert(
    api: &dyn DnsApi,
    handle: &mut RecordHandle,
    payload: &RecordPayload,
) -> Result<UpsertOutcome> {
    if handle.id.is_none() {
        match api.find_record(payload.record_type, &payload.name).await? {
            Some(existing) => {
                info!(
                    "Found existing {} record {}: {}",
                    payload.record_type, payload.name, existing.id
                );
                handle.id = Some(existing.id);
            }
            None => {
                info!(
                    "No {} record named {}, will create it",
                    payload.record_type, payload.name
                );
            }
        }
    }

    match handle.id.clone() {
        Some(id) => {
            api.update_record(&id, payload).await?;
            Ok(UpsertOutcome::Updated { id })
        }
        None => {
            let created = api.create_record(payload).await?;
            handle.id = Some(created.id.clone());
            Ok(UpsertOutcome::Created { id: created.id })
        }
    }
}

