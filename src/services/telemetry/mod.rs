//! Live telemetry pollers.
//!
//! Two independent periodic tasks read the session store, sample while the
//! session is connected and write results back. They live as long as the
//! agent and idle while disconnected.

pub mod latency;
pub mod throughput;

pub use latency::LatencyPoller;
pub use throughput::ThroughputPoller;
