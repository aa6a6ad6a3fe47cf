//! Integration tests for the chat server's connection core.
//!
//! Every test spawns a real in-process server on an ephemeral port and talks
//! to it over real TCP sockets. Sleeps give the schedulers time to admit
//! connections and run their scan rounds; they are upper bounds on the
//! documented backoff intervals, not exact timings.

use server::scheduler::ConnectionScheduler;
use server::sharded::ShardedScheduler;
use server::thread_pool::ThreadPoolScheduler;
use shared::{encode_frame, EXIT_COMMAND};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};

/// Generous bound for one admission + scan round on a loaded test machine.
const SETTLE: Duration = Duration::from_millis(400);

async fn spawn_thread_pool(capacity: usize) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = ThreadPoolScheduler::new(capacity).run(listener).await;
    });
    addr
}

async fn spawn_sharded(workers: usize, per_shard: usize) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = ShardedScheduler::new(workers, per_shard).run(listener).await;
    });
    addr
}

async fn send_line(stream: &mut TcpStream, line: &str) {
    stream.write_all(&encode_frame(line)).await.unwrap();
}

/// Reads one NUL-terminated frame. `None` means the deadline passed or the
/// connection closed without producing a frame.
async fn read_frame_within(stream: &mut TcpStream, deadline: Duration) -> Option<String> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match timeout(deadline, stream.read(&mut byte)).await {
            Ok(Ok(0)) => return None,
            Ok(Ok(_)) => {
                if byte[0] == 0 {
                    return Some(String::from_utf8_lossy(&buf).into_owned());
                }
                buf.push(byte[0]);
            }
            Ok(Err(_)) | Err(_) => return None,
        }
    }
}

async fn read_frame(stream: &mut TcpStream) -> Option<String> {
    read_frame_within(stream, Duration::from_secs(2)).await
}

/// Reads until EOF or deadline; true when the peer closed the connection.
async fn reaches_eof(stream: &mut TcpStream) -> bool {
    let mut buf = [0u8; 64];
    loop {
        match timeout(Duration::from_secs(2), stream.read(&mut buf)).await {
            Ok(Ok(0)) => return true,
            Ok(Ok(_)) => continue,
            Ok(Err(_)) => return true,
            Err(_) => return false,
        }
    }
}

mod thread_pool_tests {
    use super::*;

    /// Every live connection, sender included, receives the message tagged
    /// `<addr> <payload>`.
    #[tokio::test]
    async fn broadcast_reaches_everyone_including_sender() {
        let server = spawn_thread_pool(4).await;

        let mut c1 = TcpStream::connect(server).await.unwrap();
        let mut c2 = TcpStream::connect(server).await.unwrap();
        let mut c3 = TcpStream::connect(server).await.unwrap();
        let c1_addr = c1.local_addr().unwrap();
        sleep(SETTLE).await;

        send_line(&mut c1, "hello").await;

        let expected = format!("{} hello", c1_addr);
        assert_eq!(read_frame(&mut c1).await.as_deref(), Some(expected.as_str()));
        assert_eq!(read_frame(&mut c2).await.as_deref(), Some(expected.as_str()));
        assert_eq!(read_frame(&mut c3).await.as_deref(), Some(expected.as_str()));
    }

    /// The exit command disconnects silently in this strategy: no other
    /// client ever sees the `.exit` frame.
    #[tokio::test]
    async fn exit_is_not_broadcast() {
        let server = spawn_thread_pool(4).await;

        let mut c1 = TcpStream::connect(server).await.unwrap();
        let mut c2 = TcpStream::connect(server).await.unwrap();
        let c2_addr = c2.local_addr().unwrap();
        sleep(SETTLE).await;

        send_line(&mut c1, EXIT_COMMAND).await;
        sleep(SETTLE).await;

        // The first frame c2 sees must be its own ping, not the exit.
        send_line(&mut c2, "ping").await;
        let expected = format!("{} ping", c2_addr);
        assert_eq!(read_frame(&mut c2).await.as_deref(), Some(expected.as_str()));

        // And the exiting client's socket gets closed by the reap sweep.
        assert!(reaches_eof(&mut c1).await);
    }

    /// At capacity the accepted socket is dropped immediately; the client
    /// observes a clean close rather than a leaked, never-served socket.
    #[tokio::test]
    async fn connection_beyond_capacity_is_dropped() {
        let server = spawn_thread_pool(1).await;

        let mut c1 = TcpStream::connect(server).await.unwrap();
        let c1_addr = c1.local_addr().unwrap();
        sleep(SETTLE).await;

        // Confirm the first client actually holds the slot.
        send_line(&mut c1, "a").await;
        let expected = format!("{} a", c1_addr);
        assert_eq!(read_frame(&mut c1).await.as_deref(), Some(expected.as_str()));

        let mut c2 = TcpStream::connect(server).await.unwrap();
        assert!(reaches_eof(&mut c2).await, "rejected client should see EOF");

        // The slot frees up once the first client leaves.
        send_line(&mut c1, EXIT_COMMAND).await;
        sleep(SETTLE).await;

        let mut c3 = TcpStream::connect(server).await.unwrap();
        let c3_addr = c3.local_addr().unwrap();
        sleep(SETTLE).await;
        send_line(&mut c3, "b").await;
        let expected = format!("{} b", c3_addr);
        assert_eq!(read_frame(&mut c3).await.as_deref(), Some(expected.as_str()));
    }

    /// A fatal read error on one connection tears down only that
    /// connection; the rest keep broadcasting.
    #[tokio::test]
    async fn reader_failure_is_isolated() {
        let server = spawn_thread_pool(4).await;

        let mut c1 = TcpStream::connect(server).await.unwrap();
        let mut c2 = TcpStream::connect(server).await.unwrap();
        let c3 = TcpStream::connect(server).await.unwrap();
        let c1_addr = c1.local_addr().unwrap();
        sleep(SETTLE).await;

        // Linger(0) turns the close into a RST: a fatal error on the
        // server's reader rather than an orderly EOF.
        c3.set_linger(Some(Duration::ZERO)).unwrap();
        drop(c3);
        sleep(SETTLE).await;

        send_line(&mut c1, "still here").await;
        let expected = format!("{} still here", c1_addr);
        assert_eq!(read_frame(&mut c1).await.as_deref(), Some(expected.as_str()));
        assert_eq!(read_frame(&mut c2).await.as_deref(), Some(expected.as_str()));
    }

    /// Partial frames survive arbitrary write boundaries on the wire.
    #[tokio::test]
    async fn split_frame_is_reassembled() {
        let server = spawn_thread_pool(2).await;

        let mut c1 = TcpStream::connect(server).await.unwrap();
        let c1_addr = c1.local_addr().unwrap();
        sleep(SETTLE).await;

        c1.write_all(b"abc").await.unwrap();
        sleep(Duration::from_millis(100)).await;
        c1.write_all(b"def\0").await.unwrap();

        let expected = format!("{} abcdef", c1_addr);
        assert_eq!(read_frame(&mut c1).await.as_deref(), Some(expected.as_str()));
    }

    /// Full session: hello to three clients, one leaves, world to the
    /// remaining two.
    #[tokio::test]
    async fn three_client_session() {
        let server = spawn_thread_pool(4).await;

        let mut c1 = TcpStream::connect(server).await.unwrap();
        let mut c2 = TcpStream::connect(server).await.unwrap();
        let mut c3 = TcpStream::connect(server).await.unwrap();
        let c1_addr = c1.local_addr().unwrap();
        sleep(SETTLE).await;

        send_line(&mut c1, "hello").await;
        let hello = format!("{} hello", c1_addr);
        assert_eq!(read_frame(&mut c1).await.as_deref(), Some(hello.as_str()));
        assert_eq!(read_frame(&mut c2).await.as_deref(), Some(hello.as_str()));
        assert_eq!(read_frame(&mut c3).await.as_deref(), Some(hello.as_str()));

        send_line(&mut c2, EXIT_COMMAND).await;
        sleep(SETTLE).await;

        send_line(&mut c1, "world").await;
        let world = format!("{} world", c1_addr);
        assert_eq!(read_frame(&mut c1).await.as_deref(), Some(world.as_str()));
        assert_eq!(read_frame(&mut c3).await.as_deref(), Some(world.as_str()));
        assert!(reaches_eof(&mut c2).await);
    }
}

mod sharded_tests {
    use super::*;

    /// Fan-out crosses shard boundaries and includes the sender; the tag is
    /// parenthesized in this strategy.
    #[tokio::test]
    async fn broadcast_crosses_shards() {
        // Two workers, so three clients are guaranteed to span both shards.
        let server = spawn_sharded(2, 32).await;

        let mut c1 = TcpStream::connect(server).await.unwrap();
        let mut c2 = TcpStream::connect(server).await.unwrap();
        let mut c3 = TcpStream::connect(server).await.unwrap();
        let c1_addr = c1.local_addr().unwrap();
        sleep(SETTLE).await;

        send_line(&mut c1, "hello").await;

        let expected = format!("({}) hello", c1_addr);
        assert_eq!(read_frame(&mut c1).await.as_deref(), Some(expected.as_str()));
        assert_eq!(read_frame(&mut c2).await.as_deref(), Some(expected.as_str()));
        assert_eq!(read_frame(&mut c3).await.as_deref(), Some(expected.as_str()));
    }

    /// Unlike the thread-pool strategy, the exit frame itself is broadcast
    /// before the sender is disconnected.
    #[tokio::test]
    async fn exit_is_broadcast_before_disconnect() {
        let server = spawn_sharded(1, 32).await;

        let mut c1 = TcpStream::connect(server).await.unwrap();
        let mut c2 = TcpStream::connect(server).await.unwrap();
        let c1_addr = c1.local_addr().unwrap();
        sleep(SETTLE).await;

        send_line(&mut c1, EXIT_COMMAND).await;

        let expected = format!("({}) {}", c1_addr, EXIT_COMMAND);
        assert_eq!(read_frame(&mut c2).await.as_deref(), Some(expected.as_str()));

        // The sender receives its own exit echo, then EOF.
        assert_eq!(read_frame(&mut c1).await.as_deref(), Some(expected.as_str()));
        assert!(reaches_eof(&mut c1).await);
    }

    /// A fatal read error on one shard member tears down only that member;
    /// the rest of the shard keeps broadcasting.
    #[tokio::test]
    async fn reader_failure_is_isolated() {
        let server = spawn_sharded(2, 32).await;

        let mut c1 = TcpStream::connect(server).await.unwrap();
        let mut c2 = TcpStream::connect(server).await.unwrap();
        let c3 = TcpStream::connect(server).await.unwrap();
        let c1_addr = c1.local_addr().unwrap();
        sleep(SETTLE).await;

        // Linger(0) turns the close into a RST: a fatal error on the
        // scanning worker rather than an orderly EOF.
        c3.set_linger(Some(Duration::ZERO)).unwrap();
        drop(c3);
        sleep(SETTLE).await;

        send_line(&mut c1, "still here").await;
        let expected = format!("({}) still here", c1_addr);
        assert_eq!(read_frame(&mut c1).await.as_deref(), Some(expected.as_str()));
        assert_eq!(read_frame(&mut c2).await.as_deref(), Some(expected.as_str()));
    }

    /// Orderly EOF removes the connection; the survivors keep going.
    #[tokio::test]
    async fn eof_disconnect_leaves_others_serving() {
        let server = spawn_sharded(2, 32).await;

        let mut c1 = TcpStream::connect(server).await.unwrap();
        let c2 = TcpStream::connect(server).await.unwrap();
        let c1_addr = c1.local_addr().unwrap();
        sleep(SETTLE).await;

        drop(c2);
        sleep(SETTLE).await;

        send_line(&mut c1, "after").await;
        let expected = format!("({}) after", c1_addr);
        assert_eq!(read_frame(&mut c1).await.as_deref(), Some(expected.as_str()));
    }

    /// With every shard full, admission is deferred: the waiting client is
    /// neither served nor broadcast to, and the admitted one is unaffected.
    #[tokio::test]
    async fn full_shards_defer_admission() {
        let server = spawn_sharded(1, 1).await;

        let mut c1 = TcpStream::connect(server).await.unwrap();
        let c1_addr = c1.local_addr().unwrap();
        sleep(SETTLE).await;

        let mut c2 = TcpStream::connect(server).await.unwrap();
        send_line(&mut c2, "probe").await;
        sleep(SETTLE).await;

        // The probe from the unadmitted client must not be processed.
        send_line(&mut c1, "b").await;
        let expected = format!("({}) b", c1_addr);
        assert_eq!(read_frame(&mut c1).await.as_deref(), Some(expected.as_str()));

        // And the unadmitted client sees no traffic at all.
        assert_eq!(
            read_frame_within(&mut c2, Duration::from_millis(500)).await,
            None
        );
    }

    /// A frame split across scan rounds stays buffered per connection.
    #[tokio::test]
    async fn split_frame_survives_scan_rounds() {
        let server = spawn_sharded(1, 32).await;

        let mut c1 = TcpStream::connect(server).await.unwrap();
        let c1_addr = c1.local_addr().unwrap();
        sleep(SETTLE).await;

        // 200ms straddles several 50ms scan rounds.
        c1.write_all(b"abc").await.unwrap();
        sleep(Duration::from_millis(200)).await;
        c1.write_all(b"def\0").await.unwrap();

        let expected = format!("({}) abcdef", c1_addr);
        assert_eq!(read_frame(&mut c1).await.as_deref(), Some(expected.as_str()));
    }

    /// End-to-end scenario under the sharded strategy.
    #[tokio::test]
    async fn three_client_session() {
        let server = spawn_sharded(2, 32).await;

        let mut c1 = TcpStream::connect(server).await.unwrap();
        let mut c2 = TcpStream::connect(server).await.unwrap();
        let mut c3 = TcpStream::connect(server).await.unwrap();
        let c1_addr = c1.local_addr().unwrap();
        let c2_addr = c2.local_addr().unwrap();
        sleep(SETTLE).await;

        send_line(&mut c1, "hello").await;
        let hello = format!("({}) hello", c1_addr);
        assert_eq!(read_frame(&mut c1).await.as_deref(), Some(hello.as_str()));
        assert_eq!(read_frame(&mut c2).await.as_deref(), Some(hello.as_str()));
        assert_eq!(read_frame(&mut c3).await.as_deref(), Some(hello.as_str()));

        send_line(&mut c2, EXIT_COMMAND).await;
        // This strategy broadcasts the exit frame before removal.
        let exit = format!("({}) {}", c2_addr, EXIT_COMMAND);
        assert_eq!(read_frame(&mut c1).await.as_deref(), Some(exit.as_str()));
        assert_eq!(read_frame(&mut c3).await.as_deref(), Some(exit.as_str()));
        sleep(SETTLE).await;

        send_line(&mut c1, "world").await;
        let world = format!("({}) world", c1_addr);
        assert_eq!(read_frame(&mut c1).await.as_deref(), Some(world.as_str()));
        assert_eq!(read_frame(&mut c3).await.as_deref(), Some(world.as_str()));
    }
}
