//! Client metric names and registration.
//!
//! Counters and the API latency histogram are recorded through the
//! `metrics` facade; whichever exporter the embedding server installs
//! picks them up. [`describe_metrics`] documents units and help text and
//! should be called once at startup.

use metrics::{describe_counter, describe_histogram, Unit};

pub const CLIENT_NUM_MSG_QUEUED: &str = "client_num_msg_queued";
pub const CLIENT_NUM_MSG_SENT: &str = "client_num_msg_sent";
pub const CLIENT_NUM_MSG_PUBLISHED: &str = "client_num_msg_published";
pub const CLIENT_BYTES_IN: &str = "client_bytes_in";
pub const CLIENT_BYTES_OUT: &str = "client_bytes_out";
pub const CLIENT_API_NUM_REQUESTS: &str = "client_api_num_requests";
pub const CLIENT_NUM_CONNECT: &str = "client_num_connect";
pub const CLIENT_NUM_SUBSCRIBE: &str = "client_num_subscribe";

/// API frame handling latency, recorded in microseconds.
pub const CLIENT_API: &str = "client_api";

/// Registers descriptions and units for all client metrics.
pub fn describe_metrics() {
    describe_counter!(
        CLIENT_NUM_MSG_QUEUED,
        "Frames enqueued into client outbound queues"
    );
    describe_counter!(CLIENT_NUM_MSG_SENT, "Frames written to client transports");
    describe_counter!(
        CLIENT_NUM_MSG_PUBLISHED,
        "Messages published by clients into channels"
    );
    describe_counter!(CLIENT_BYTES_IN, Unit::Bytes, "Inbound frame bytes");
    describe_counter!(CLIENT_BYTES_OUT, Unit::Bytes, "Outbound frame bytes");
    describe_counter!(CLIENT_API_NUM_REQUESTS, "Inbound client frames handled");
    describe_counter!(CLIENT_NUM_CONNECT, "Connect commands received");
    describe_counter!(CLIENT_NUM_SUBSCRIBE, "Subscribe commands received");
    describe_histogram!(
        CLIENT_API,
        Unit::Microseconds,
        "Client frame handling latency"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_metrics_is_idempotent() {
        // Describing twice must not panic even without an installed recorder.
        describe_metrics();
        describe_metrics();
    }
}
