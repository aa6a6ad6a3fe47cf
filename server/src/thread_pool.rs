//! Thread-pool strategy: one dedicated reader task per connection, bounded
//! by hardware parallelism.
//!
//! The acceptor loop alternates between reaping finished readers and
//! accepting new connections. Admission is strict: at capacity the accepted
//! socket is dropped on the spot (rejected, not queued) and the loop backs
//! off. A connection's reader runs until orderly EOF, an `.exit` frame, or a
//! fatal read error, then flags itself `Draining` for the next sweep.

use crate::broadcast::{self, TagStyle};
use crate::connection::{Connection, ConnectionStatus, ReadOutcome};
use crate::scheduler::{ConnectionScheduler, ACCEPT_BACKOFF};
use crate::utils;
use log::{error, info, warn};
use shared::{FrameBuffer, EXIT_COMMAND, READ_CHUNK_SIZE};
use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

/// A pooled connection and the task currently reading it.
struct PooledConnection {
    conn: Arc<Connection>,
    reader: JoinHandle<()>,
}

type Pool = Arc<Mutex<Vec<PooledConnection>>>;

pub struct ThreadPoolScheduler {
    capacity: usize,
    pool: Pool,
    broadcast_lock: Arc<Mutex<()>>,
}

impl ThreadPoolScheduler {
    /// Capacity is one connection per hardware execution unit in the
    /// reference configuration ([`crate::utils::default_parallelism`]).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            pool: Arc::new(Mutex::new(Vec::new())),
            broadcast_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Joins every reader that has stopped and erases its connection.
    ///
    /// Only entries whose task has already finished are touched, so the
    /// join can never block the acceptor behind a live reader, and erasure
    /// can never race the reader's buffer.
    async fn reap(&self) {
        let mut pool = self.pool.lock().await;
        let mut index = 0;
        while index < pool.len() {
            let done = pool[index].conn.status() >= ConnectionStatus::Draining
                && pool[index].reader.is_finished();
            if !done {
                index += 1;
                continue;
            }

            let PooledConnection { conn, reader } = pool.remove(index);
            if let Err(e) = reader.await {
                error!("reader task for {} aborted: {}", conn.addr(), e);
            }
            conn.advance(ConnectionStatus::Closed);
            if conn.failed() {
                info!("{} removed after read failure", conn.addr());
            } else {
                info!("{} disconnected", conn.addr());
            }
            // Dropping the entry closes the socket.
        }
    }
}

impl ConnectionScheduler for ThreadPoolScheduler {
    async fn run(self, listener: TcpListener) -> io::Result<()> {
        info!(
            "thread-pool scheduler serving on {} (capacity {})",
            listener.local_addr()?,
            self.capacity
        );

        loop {
            self.reap().await;

            // Bounded wait so the sweep keeps running while the listener is
            // idle; an elapsed timeout is the non-blocking accept miss.
            let (stream, addr) = match timeout(ACCEPT_BACKOFF, listener.accept()).await {
                Ok(Ok(accepted)) => accepted,
                Ok(Err(e)) => return Err(e),
                Err(_) => continue,
            };

            let mut pool = self.pool.lock().await;
            if pool.len() >= self.capacity {
                warn!("pool full ({} connections); rejecting {}", self.capacity, addr);
                drop(stream);
                drop(pool);
                sleep(ACCEPT_BACKOFF).await;
                continue;
            }

            let conn = Arc::new(Connection::new(stream, addr));
            info!("{} connected", addr);
            let reader = tokio::spawn(reader_loop(
                Arc::clone(&conn),
                Arc::clone(&self.pool),
                Arc::clone(&self.broadcast_lock),
            ));
            pool.push(PooledConnection { conn, reader });
        }
    }
}

/// Drives one connection until disconnect.
///
/// Lock order during a broadcast is broadcast lock first, then the pool
/// list; the acceptor takes the pool lock alone, so the orders cannot form
/// a cycle.
async fn reader_loop(conn: Arc<Connection>, pool: Pool, broadcast_lock: Arc<Mutex<()>>) {
    let mut frames = FrameBuffer::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    while conn.status() == ConnectionStatus::Active {
        if let Err(e) = conn.readable().await {
            utils::log_io_error("readable", conn.addr(), &e);
            conn.mark_failed();
            break;
        }

        let frame = match conn.read_chunk(&mut chunk) {
            Ok(ReadOutcome::WouldBlock) => continue,
            Ok(ReadOutcome::Eof) => break,
            Ok(ReadOutcome::Data(n)) => frames.push_chunk(&chunk[..n]),
            Err(e) => {
                utils::log_io_error("recv", conn.addr(), &e);
                conn.mark_failed();
                break;
            }
        };

        let Some(frame) = frame else { continue };

        // This strategy treats the exit command as a pure disconnect: it is
        // not rebroadcast to the other clients.
        if frame == EXIT_COMMAND.as_bytes() {
            break;
        }

        let payload = String::from_utf8_lossy(&frame);
        let line = broadcast::format_line(TagStyle::Plain, conn.addr(), &payload);

        let _console = broadcast_lock.lock().await;
        let pool = pool.lock().await;
        let recipients: Vec<&Connection> = pool
            .iter()
            .filter(|entry| entry.conn.status() == ConnectionStatus::Active)
            .map(|entry| entry.conn.as_ref())
            .collect();
        broadcast::deliver(recipients, &line).await;
    }

    conn.advance(ConnectionStatus::Draining);
}
