use tracing::{debug, info, warn};

use super::error::ClientError;

/// Sink for connection lifecycle events.  The worker never logs directly;
/// everything per-connection goes through here so embedders can attach
/// their own metrics.
pub trait ConnectionObserver: Send + Sync
{
    fn connection_opened(&self, _peer: &str) {}

    fn connection_closed(&self, _peer: &str, _requests_served: u64) {}

    fn request_completed(&self, _peer: &str, _request_id: u16) {}

    fn client_error(&self, _peer: &str, _error: &ClientError) {}
}

/// Default observer: structured log events.
pub struct LogObserver;

impl ConnectionObserver for LogObserver {
    fn connection_opened(&self, peer: &str)
    {
        debug!(peer, "connection opened");
    }

    fn connection_closed(&self, peer: &str, requests_served: u64)
    {
        info!(peer, requests_served, "connection closed");
    }

    fn request_completed(&self, peer: &str, request_id: u16)
    {
        debug!(peer, request_id, "request completed");
    }

    fn client_error(&self, peer: &str, error: &ClientError)
    {
        warn!(peer, %error, "connection failed");
    }
}
