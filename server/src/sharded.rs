//! Sharded-poll strategy: a fixed worker pool polling partitioned
//! connection lists.
//!
//! `W` long-lived workers each own one shard of up to `M` connections;
//! thread count is decoupled from connection count. A worker's scan round
//! holds the broadcast-wide lock and its own shard lock together, so
//! neither the acceptor nor another worker can mutate the shard mid-scan,
//! and no two fan-outs interleave. The acceptor runs separately, assigning
//! each accepted connection to the next shard with a free slot.

use crate::broadcast::{self, TagStyle};
use crate::connection::{Connection, ConnectionStatus, ReadOutcome};
use crate::scheduler::{
    ConnectionScheduler, ACCEPT_BACKOFF, CAPACITY_COOLDOWN, LISTENER_POLL_TIMEOUT,
    WORKER_SCAN_INTERVAL,
};
use crate::utils;
use log::{info, warn};
use shared::{encode_frame, FrameBuffer, EXIT_COMMAND, READ_CHUNK_SIZE};
use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};

/// Connections per shard in the reference configuration.
pub const DEFAULT_CONNECTIONS_PER_SHARD: usize = 32;

/// A shard member: the connection plus its partial-frame buffer. The buffer
/// lives here because the owning worker is the only reader.
struct ShardEntry {
    conn: Connection,
    frames: FrameBuffer,
}

type Shards = Arc<Vec<Mutex<Vec<ShardEntry>>>>;

pub struct ShardedScheduler {
    per_shard: usize,
    shards: Shards,
    broadcast_lock: Arc<Mutex<()>>,
}

impl ShardedScheduler {
    /// `worker_count` shards of `per_shard` connections each; total capacity
    /// is their product, independent of how many clients are connected.
    pub fn new(worker_count: usize, per_shard: usize) -> Self {
        let shards = (0..worker_count.max(1))
            .map(|_| Mutex::new(Vec::new()))
            .collect();
        Self {
            per_shard: per_shard.max(1),
            shards: Arc::new(shards),
            broadcast_lock: Arc::new(Mutex::new(())),
        }
    }
}

impl ConnectionScheduler for ShardedScheduler {
    async fn run(self, listener: TcpListener) -> io::Result<()> {
        info!(
            "sharded scheduler serving on {} ({} workers x {} connections per shard)",
            listener.local_addr()?,
            self.shards.len(),
            self.per_shard
        );

        for index in 0..self.shards.len() {
            tokio::spawn(worker_loop(
                index,
                Arc::clone(&self.shards),
                Arc::clone(&self.broadcast_lock),
            ));
        }

        acceptor_loop(listener, self.shards, self.per_shard).await
    }
}

/// Accepts connections and assigns them round-robin to shards with space.
///
/// The acceptor is the only inserter and workers only ever shrink their
/// shard, so a shard observed with a free slot cannot fill up between the
/// occupancy scan and the insert.
async fn acceptor_loop(listener: TcpListener, shards: Shards, per_shard: usize) -> io::Result<()> {
    let mut next_shard = 0usize;

    loop {
        let (stream, addr) = match timeout(LISTENER_POLL_TIMEOUT, listener.accept()).await {
            Ok(Ok(accepted)) => accepted,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };

        loop {
            let mut occupancy = Vec::with_capacity(shards.len());
            for shard in shards.iter() {
                occupancy.push(shard.lock().await.len());
            }

            match next_free_shard(&occupancy, per_shard, next_shard) {
                Some(index) => {
                    next_shard = index;
                    let mut shard = shards[index].lock().await;
                    shard.push(ShardEntry {
                        conn: Connection::new(stream, addr),
                        frames: FrameBuffer::new(),
                    });
                    info!("{} connected (shard {})", addr, index);
                    break;
                }
                None => {
                    // Admission is deferred, not refused: the accepted socket
                    // is held until a shard drains a slot.
                    warn!(
                        "server at capacity ({} shards x {} connections)",
                        shards.len(),
                        per_shard
                    );
                    sleep(CAPACITY_COOLDOWN).await;
                }
            }
        }
    }
}

/// Round-robin shard selection starting from the shard used last.
fn next_free_shard(occupancy: &[usize], per_shard: usize, start: usize) -> Option<usize> {
    (0..occupancy.len())
        .map(|offset| (start + offset) % occupancy.len())
        .find(|&index| occupancy[index] < per_shard)
}

/// One worker's scan loop over its own shard.
async fn worker_loop(index: usize, shards: Shards, broadcast_lock: Arc<Mutex<()>>) {
    loop {
        {
            let _fanout = broadcast_lock.lock().await;
            let mut shard = shards[index].lock().await;
            scan_shard(index, &shards, &mut shard).await;
        }
        sleep(WORKER_SCAN_INTERVAL).await;
    }
}

/// Polls every connection in the shard, broadcasts each completed frame to
/// all shards, then erases the connections marked for removal.
async fn scan_shard(
    index: usize,
    shards: &Shards,
    shard: &mut Vec<ShardEntry>,
) {
    let mut marked: Vec<usize> = Vec::new();

    for slot in 0..shard.len() {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        // Drain everything the socket has right now; partial frames stay in
        // the entry's buffer for the next round.
        loop {
            match shard[slot].conn.read_chunk(&mut chunk) {
                Ok(ReadOutcome::WouldBlock) => break,
                Ok(ReadOutcome::Eof) => {
                    marked.push(slot);
                    break;
                }
                Err(e) => {
                    let peer = shard[slot].conn.addr();
                    utils::log_io_error(&format!("worker[{}]: recv", index), peer, &e);
                    marked.push(slot);
                    break;
                }
                Ok(ReadOutcome::Data(n)) => {
                    let Some(frame) = shard[slot].frames.push_chunk(&chunk[..n]) else {
                        continue;
                    };

                    let sender = shard[slot].conn.addr();
                    let payload = String::from_utf8_lossy(&frame).into_owned();
                    let line = broadcast::format_line(TagStyle::Parenthesized, sender, &payload);

                    // Unlike the thread-pool strategy, the exit frame itself
                    // is broadcast before the sender goes away.
                    fan_out(shards, index, shard, &line).await;

                    if frame.starts_with(EXIT_COMMAND.as_bytes()) {
                        marked.push(slot);
                        break;
                    }
                }
            }
        }
    }

    marked.dedup();
    for slot in marked.into_iter().rev() {
        let entry = shard.remove(slot);
        entry.conn.advance(ConnectionStatus::Closed);
        info!("{} disconnected", entry.conn.addr());
        // Dropping the entry closes the socket.
    }
}

/// Cross-shard delivery of one line, sender's shard included.
///
/// The caller already holds the broadcast lock and its own shard lock; the
/// own shard is addressed through the held guard instead of re-locking it.
async fn fan_out(shards: &Shards, own_index: usize, own_shard: &[ShardEntry], line: &str) {
    println!("{}", line);
    let frame = encode_frame(line);

    for (index, shard) in shards.iter().enumerate() {
        if index == own_index {
            for entry in own_shard {
                broadcast::send_line(&entry.conn, &frame).await;
            }
        } else {
            let other = shard.lock().await;
            for entry in other.iter() {
                broadcast::send_line(&entry.conn, &frame).await;
            }
        }
    }
}
