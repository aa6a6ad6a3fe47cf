//! One accepted client socket and its lifecycle.
//!
//! A `Connection` pairs the non-blocking stream with the peer address
//! captured at accept time and a monotonic lifecycle status. Exactly one
//! reader (a dedicated task or the owning shard worker) drives the socket's
//! reads; the status atomics exist so the reaping side can observe progress
//! without sharing the read path.

use shared::READ_CHUNK_SIZE;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use tokio::net::TcpStream;

/// Lifecycle of a connection. Transitions are one-way:
/// `Active -> Draining -> Closed`.
///
/// `Draining` means disconnect has been observed (peer EOF, `.exit`, or a
/// fatal read error) but the socket has not been reaped yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionStatus {
    Active = 0,
    Draining = 1,
    Closed = 2,
}

impl ConnectionStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionStatus::Active,
            1 => ConnectionStatus::Draining,
            _ => ConnectionStatus::Closed,
        }
    }
}

/// Outcome of one non-blocking chunk read.
#[derive(Debug)]
pub enum ReadOutcome {
    /// This many bytes landed in the chunk.
    Data(usize),
    /// Nothing available right now; retry after the next readiness signal.
    WouldBlock,
    /// Orderly shutdown by the peer. Not an error.
    Eof,
}

pub struct Connection {
    stream: TcpStream,
    addr: SocketAddr,
    status: AtomicU8,
    failed: AtomicBool,
}

impl Connection {
    pub fn new(stream: TcpStream, addr: SocketAddr) -> Self {
        Self {
            stream,
            addr,
            status: AtomicU8::new(ConnectionStatus::Active as u8),
            failed: AtomicBool::new(false),
        }
    }

    /// Peer address captured at accept time.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Moves the lifecycle forward. Regressions are ignored, so concurrent
    /// observers can never resurrect a draining connection.
    pub fn advance(&self, to: ConnectionStatus) {
        self.status.fetch_max(to as u8, Ordering::AcqRel);
    }

    /// Records that the reader hit a fatal error (as opposed to orderly EOF
    /// or an explicit exit command).
    pub fn mark_failed(&self) {
        self.failed.store(true, Ordering::Release);
    }

    pub fn failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Waits until the socket reports readable.
    pub async fn readable(&self) -> io::Result<()> {
        self.stream.readable().await
    }

    /// Attempts one fixed-size chunk read without blocking.
    ///
    /// `WouldBlock` and EOF are classified rather than surfaced as errors;
    /// anything else is a fatal per-connection fault for the caller to act
    /// on. A partial chunk leaves no residue: whatever arrived is in
    /// `chunk[..n]` and the next call picks up where the stream left off.
    pub fn read_chunk(&self, chunk: &mut [u8; READ_CHUNK_SIZE]) -> io::Result<ReadOutcome> {
        match self.stream.try_read(chunk) {
            Ok(0) => Ok(ReadOutcome::Eof),
            Ok(n) => Ok(ReadOutcome::Data(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(ReadOutcome::WouldBlock),
            Err(e) => Err(e),
        }
    }

    /// Writes one whole frame.
    ///
    /// `try_write` consults cached readiness, which a freshly accepted
    /// stream does not have yet, so a `WouldBlock` before the first byte
    /// waits for write-readiness and retries. A `WouldBlock` mid-frame is a
    /// genuinely full send buffer and surfaces as the per-recipient failure;
    /// the broadcast router logs it and moves on, matching the delivery
    /// contract (one slow receiver must not stall the fan-out). A failure
    /// mid-frame leaves the recipient with an undelimited prefix that merges
    /// into its next frame, one garbled line until the next delimiter
    /// resyncs the stream.
    pub async fn send_frame(&self, frame: &[u8]) -> io::Result<()> {
        let mut written = 0;
        while written < frame.len() {
            match self.stream.try_write(&frame[written..]) {
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock && written == 0 => {
                    self.stream.writable().await?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("addr", &self.addr)
            .field("status", &self.status())
            .field("failed", &self.failed())
            .finish()
    }
}
