// # Endpoint Sink Trait
//
// The supervisor hands every newly observed endpoint to a sink. The
// production sink reconciles DNS in-line; because the supervisor only sees
// this trait, reconciliation can move to a queue without touching the
// parser or the supervisor.

use crate::endpoint::Endpoint;
use async_trait::async_trait;

/// Receiver of endpoint changes
#[async_trait]
pub trait EndpointSink: Send {
    /// Called once per change, in output order
    ///
    /// Failures are the sink's to log; the monitoring loop keeps reading.
    async fn endpoint_changed(&mut self, endpoint: Endpoint);
}
