//! Test doubles and common utilities for contract tests
//!
//! The doubles keep just enough state to check call patterns; they do not
//! model the provider beyond records-by-id.

#![allow(dead_code)]

use natter_srv_core::config::{
    CloudflareConfig, NatterConfig, SrvConfig, SupervisorConfig, Timings,
};
use natter_srv_core::endpoint::Endpoint;
use natter_srv_core::error::{Error, Result};
use natter_srv_core::traits::{
    ApiError, DnsApi, DnsRecord, EndpointSink, IpLookup, RecordPayload, RecordType,
    ReportedSrvData,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mapping line as natter prints it
pub const MAPPING_LINE: &str =
    "tcp://192.168.1.10:11451 <--stun--> tcp://10.0.0.2:11451 <--Natter--> tcp://203.0.113.9:54321";

/// Endpoint carried by [`MAPPING_LINE`]
pub fn mapped_endpoint() -> Endpoint {
    Endpoint::new(Ipv4Addr::new(203, 0, 113, 9), 54321)
}

/// One call made against [`MockDnsApi`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    Find(RecordType, String),
    Create(RecordType, String),
    Update(RecordType, String),
    Get(String),
}

/// Operation selector for failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiOp {
    Find,
    Create,
    Update,
}

#[derive(Default)]
struct MockState {
    records: HashMap<String, DnsRecord>,
    next_id: usize,
    calls: Vec<ApiCall>,
    failures: HashSet<(ApiOp, RecordType)>,
    fail_get: bool,
    reported_port: Option<u16>,
}

/// In-memory DnsApi that records every call
pub struct MockDnsApi {
    state: Arc<Mutex<MockState>>,
}

impl MockDnsApi {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Create a MockDnsApi that shares records, calls and failures with `other`
    pub fn sharing_state_with(other: &Self) -> Self {
        Self {
            state: Arc::clone(&other.state),
        }
    }

    /// Seed an existing record, as if created by an earlier run
    pub fn preload(&self, id: &str, record_type: RecordType, name: &str) {
        let record = DnsRecord {
            id: id.to_string(),
            name: name.to_string(),
            record_type: record_type.as_str().to_string(),
            content: None,
            data: None,
            ttl: Some(120),
        };
        self.state
            .lock()
            .unwrap()
            .records
            .insert(id.to_string(), record);
    }

    /// Make every `op` on records of `record_type` fail
    pub fn fail(&self, op: ApiOp, record_type: RecordType) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert((op, record_type));
    }

    /// Make the read-back call fail
    pub fn fail_get(&self) {
        self.state.lock().unwrap().fail_get = true;
    }

    /// Remove every injected failure
    pub fn clear_failures(&self) {
        let mut state = self.state.lock().unwrap();
        state.failures.clear();
        state.fail_get = false;
    }

    /// Report this port on read-back regardless of what was written
    pub fn report_port(&self, port: u16) {
        self.state.lock().unwrap().reported_port = Some(port);
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn find_count(&self, record_type: RecordType) -> usize {
        self.count(|call| matches!(call, ApiCall::Find(t, _) if *t == record_type))
    }

    pub fn create_count(&self, record_type: RecordType) -> usize {
        self.count(|call| matches!(call, ApiCall::Create(t, _) if *t == record_type))
    }

    pub fn update_count(&self, record_type: RecordType) -> usize {
        self.count(|call| matches!(call, ApiCall::Update(t, _) if *t == record_type))
    }

    pub fn get_count(&self) -> usize {
        self.count(|call| matches!(call, ApiCall::Get(_)))
    }

    /// Number of stored records of `record_type`
    pub fn record_count(&self, record_type: RecordType) -> usize {
        self.state
            .lock()
            .unwrap()
            .records
            .values()
            .filter(|r| r.record_type == record_type.as_str())
            .count()
    }

    /// Stored record by name
    pub fn record_named(&self, name: &str) -> Option<DnsRecord> {
        self.state
            .lock()
            .unwrap()
            .records
            .values()
            .find(|r| r.name == name)
            .cloned()
    }

    fn count(&self, pred: impl Fn(&ApiCall) -> bool) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|call| pred(call))
            .count()
    }
}

fn injected(operation: String) -> Error {
    Error::api(
        operation,
        vec![ApiError {
            code: Some(1004),
            message: "injected failure".to_string(),
        }],
    )
}

fn apply(record: &mut DnsRecord, payload: &RecordPayload) {
    record.name = payload.name.clone();
    record.record_type = payload.record_type.as_str().to_string();
    record.content = payload.content.clone();
    record.data = payload.data.as_ref().map(|data| ReportedSrvData {
        priority: Some(data.priority),
        weight: Some(data.weight),
        port: Some(data.port),
        target: Some(data.target.clone()),
    });
    record.ttl = Some(payload.ttl);
}

#[async_trait::async_trait]
impl DnsApi for MockDnsApi {
    async fn find_record(&self, record_type: RecordType, name: &str) -> Result<Option<DnsRecord>> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(ApiCall::Find(record_type, name.to_string()));

        if state.failures.contains(&(ApiOp::Find, record_type)) {
            return Err(injected(format!("list {} records", record_type)));
        }

        Ok(state
            .records
            .values()
            .find(|r| r.name == name && r.record_type == record_type.as_str())
            .cloned())
    }

    async fn create_record(&self, payload: &RecordPayload) -> Result<DnsRecord> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(ApiCall::Create(payload.record_type, payload.name.clone()));

        if state
            .failures
            .contains(&(ApiOp::Create, payload.record_type))
        {
            return Err(injected(format!("create {} record", payload.record_type)));
        }

        state.next_id += 1;
        let mut record = DnsRecord {
            id: format!("rec-{}", state.next_id),
            name: String::new(),
            record_type: String::new(),
            content: None,
            data: None,
            ttl: None,
        };
        apply(&mut record, payload);
        state.records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn update_record(&self, id: &str, payload: &RecordPayload) -> Result<DnsRecord> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(ApiCall::Update(payload.record_type, id.to_string()));

        if state
            .failures
            .contains(&(ApiOp::Update, payload.record_type))
        {
            return Err(injected(format!("update {} record", payload.record_type)));
        }

        let Some(record) = state.records.get_mut(id) else {
            return Err(Error::api(
                format!("update {} record", payload.record_type),
                vec![ApiError {
                    code: Some(81044),
                    message: "Record does not exist.".to_string(),
                }],
            ));
        };
        apply(record, payload);
        Ok(record.clone())
    }

    async fn get_record(&self, id: &str) -> Result<DnsRecord> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(ApiCall::Get(id.to_string()));

        if state.fail_get {
            return Err(Error::http("connection reset"));
        }

        let reported_port = state.reported_port;
        let mut record = state
            .records
            .get(id)
            .cloned()
            .ok_or_else(|| Error::http("404 Not Found"))?;

        if let (Some(port), Some(data)) = (reported_port, record.data.as_mut()) {
            data.port = Some(port);
        }
        Ok(record)
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

/// IpLookup that replays a fixed script of answers
///
/// Each call takes the next answer; the last one repeats forever.
pub struct ScriptedLookup {
    name: String,
    answers: Mutex<VecDeque<std::result::Result<String, String>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedLookup {
    pub fn new(name: &str, answers: Vec<std::result::Result<&str, &str>>) -> Self {
        Self {
            name: name.to_string(),
            answers: Mutex::new(
                answers
                    .into_iter()
                    .map(|a| a.map(str::to_string).map_err(str::to_string))
                    .collect(),
            ),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Always answers `candidate`
    pub fn fixed(name: &str, candidate: &str) -> Self {
        Self::new(name, vec![Ok(candidate)])
    }

    /// Always fails
    pub fn failing(name: &str) -> Self {
        Self::new(name, vec![Err("connection timed out")])
    }

    /// Shared call counter, readable after the lookup is boxed
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait::async_trait]
impl IpLookup for ScriptedLookup {
    async fn lookup(&self) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut answers = self.answers.lock().unwrap();
        let answer = if answers.len() > 1 {
            answers.pop_front()
        } else {
            answers.front().cloned()
        };

        match answer {
            Some(Ok(candidate)) => Ok(candidate),
            Some(Err(message)) => Err(Error::ip_lookup(message)),
            None => Err(Error::ip_lookup("no scripted answer")),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// EndpointSink that only remembers what it was given
#[derive(Default)]
pub struct RecordingSink {
    pub endpoints: Vec<Endpoint>,
}

#[async_trait::async_trait]
impl EndpointSink for RecordingSink {
    async fn endpoint_changed(&mut self, endpoint: Endpoint) {
        self.endpoints.push(endpoint);
    }
}

/// Helper to create a valid configuration for testing
pub fn test_config(srv_name: &str, script: &Path) -> SupervisorConfig {
    SupervisorConfig {
        cloudflare: CloudflareConfig {
            api_token: "cf-test-token-0123456789".to_string(),
            zone_id: "023e105f4ecef8ad9ca31a8372d0c353".to_string(),
            domain: "example.com".to_string(),
        },
        srv: SrvConfig {
            name: srv_name.to_string(),
            priority: 0,
            weight: 5,
        },
        natter: NatterConfig {
            script: script.to_path_buf(),
            interpreter: "sh".to_string(),
            port: 11451,
            args: Vec::new(),
        },
        ip_check_interval: 600,
    }
}

/// Delays short enough for tests that spawn real processes
pub fn fast_timings() -> Timings {
    Timings {
        ip_wake_interval: Duration::from_millis(50),
        spawn_retry: Duration::from_millis(100),
        abnormal_exit_backoff: Duration::from_millis(100),
        restart_pause: Duration::from_millis(50),
        stop_grace: Duration::from_secs(2),
    }
}

/// Write a shell script standing in for natter
///
/// Scripts that should stay up must `exec sleep` so the terminate signal
/// reaches the process holding the pipes.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

/// Script that prints the mapping once and stays up
pub fn long_running_natter(dir: &Path) -> PathBuf {
    write_script(
        dir,
        "natter.sh",
        &format!("echo 'Natter starting'\necho '{}'\nexec sleep 30\n", MAPPING_LINE),
    )
}
