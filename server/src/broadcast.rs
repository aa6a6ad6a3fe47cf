//! Fan-out of one decoded message to every live connection.
//!
//! Delivery is serialized by a broadcast-wide lock owned by the scheduler:
//! callers hold it across the whole fan-out (and the single console print),
//! so two broadcasts never interleave their writes.

use crate::connection::Connection;
use crate::utils;
use shared::encode_frame;
use std::net::SocketAddr;

/// How the sender's address tags the outbound line. The two schedulers use
/// different tagging with identical semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagStyle {
    /// `<addr> <message>` (thread-pool strategy)
    Plain,
    /// `(<addr>) <message>` (sharded-poll strategy)
    Parenthesized,
}

/// Builds the broadcast line: the sender's address followed by the payload.
pub fn format_line(style: TagStyle, sender: SocketAddr, payload: &str) -> String {
    match style {
        TagStyle::Plain => format!("{} {}", sender, payload),
        TagStyle::Parenthesized => format!("({}) {}", sender, payload),
    }
}

/// Writes one framed line to a single recipient, logging (never propagating)
/// a send failure so the rest of the fan-out proceeds.
pub async fn send_line(conn: &Connection, frame: &[u8]) {
    if let Err(e) = conn.send_frame(frame).await {
        utils::log_io_error("send", conn.addr(), &e);
    }
}

/// Delivers one broadcast line to every recipient, sender included, and
/// echoes it to the server console exactly once.
///
/// The caller must hold the broadcast lock.
pub async fn deliver<'a, I>(recipients: I, line: &str)
where
    I: IntoIterator<Item = &'a Connection>,
{
    println!("{}", line);
    let frame = encode_frame(line);
    for conn in recipients {
        send_line(conn, &frame).await;
    }
}
