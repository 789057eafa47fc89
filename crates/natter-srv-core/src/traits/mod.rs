// Core traits for natter-srv
//
// These traits define the boundaries between the supervisor core and the
// external collaborators it talks to.

pub mod dns_api;
pub mod endpoint_sink;
pub mod ip_lookup;

pub use dns_api::{
    ApiError, DnsApi, DnsRecord, RecordPayload, RecordType, ReportedSrvData, SrvData,
};
pub use endpoint_sink::EndpointSink;
pub use ip_lookup::IpLookup;
