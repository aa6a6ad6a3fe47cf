//! The seam between the chat protocol and the two concurrency strategies.
//!
//! Framing and broadcast are shared code; what differs is how accepted
//! connections are driven. Each strategy implements [`ConnectionScheduler`]
//! and is selected once at startup.

use std::io;
use std::time::Duration;
use tokio::net::TcpListener;

/// Backoff after a rejected admission or an idle accept pass.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Pause between two scan rounds of a sharded-poll worker.
pub const WORKER_SCAN_INTERVAL: Duration = Duration::from_millis(50);

/// Bound on one readiness wait for the listening socket; keeps the acceptor
/// loop responsive even when nobody connects.
pub const LISTENER_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Cooldown while every shard is full. Deliberately much longer than the
/// regular backoff: a full server should not busy-spin on admission.
pub const CAPACITY_COOLDOWN: Duration = Duration::from_secs(3);

/// A scheduling/admission policy that drives all connection reads.
///
/// `run` owns the listening socket and serves until a fatal listener fault
/// (anything other than a transient readiness miss). Per-connection errors
/// are handled internally and never end the server.
#[allow(async_fn_in_trait)]
pub trait ConnectionScheduler {
    async fn run(self, listener: TcpListener) -> io::Result<()>;
}
