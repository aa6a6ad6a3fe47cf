use log::error;
use std::io;
use std::net::SocketAddr;

/// Logs a failed socket call against a peer, including the OS error code
/// when one is attached. Per-connection failures are logged here and the
/// connection torn down; they never abort the server.
pub fn log_io_error(call: &str, peer: SocketAddr, err: &io::Error) {
    match err.raw_os_error() {
        Some(code) => error!("{}({}) failed: ({}) {}", call, peer, code, err),
        None => error!("{}({}) failed: {}", call, peer, err),
    }
}

/// Number of hardware execution units, with a floor of one.
pub fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
