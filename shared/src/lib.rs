//! Wire protocol shared between the chat server and client.
//!
//! The protocol is a raw TCP byte stream framed by a trailing NUL byte: a
//! message is every byte up to (not including) the next `\0`. There is no
//! length prefix and no escaping, so two messages landing in one read merge
//! into a single frame with an embedded NUL. That is a protocol constraint,
//! not something this crate papers over.

/// TCP port the server listens on and the client connects to.
pub const DEFAULT_PORT: u16 = 54673;

/// Frame terminator. The only delimiter the protocol knows.
pub const FRAME_DELIMITER: u8 = 0;

/// Sockets are drained in fixed chunks of this many bytes.
pub const READ_CHUNK_SIZE: usize = 16;

/// A frame carrying exactly this text asks the server to disconnect the
/// sender. Case-sensitive.
pub const EXIT_COMMAND: &str = ".exit";

/// Incremental frame decoder.
///
/// `FrameBuffer` does no I/O itself: callers read whatever the socket has
/// available (typically [`READ_CHUNK_SIZE`] bytes at a time) and push it in.
/// Bytes accumulate until a chunk lands the delimiter at the end of the
/// buffer, at which point one complete frame comes out and the buffer resets.
/// Feeding the same byte sequence split at arbitrary chunk boundaries yields
/// the same frames.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Appends a chunk of received bytes.
    ///
    /// Returns a complete frame (without its trailing delimiter) when the
    /// buffer now ends in [`FRAME_DELIMITER`], otherwise `None` while the
    /// frame is still partial. Only the last byte is inspected; an embedded
    /// NUL mid-buffer is carried along inside the eventual frame.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Option<Vec<u8>> {
        self.buf.extend_from_slice(chunk);

        match self.buf.last() {
            Some(&FRAME_DELIMITER) => {
                let mut frame = std::mem::take(&mut self.buf);
                frame.pop();
                Some(frame)
            }
            _ => None,
        }
    }

    /// Number of buffered bytes still waiting for their delimiter.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Encodes one outgoing message: payload bytes plus the trailing delimiter.
pub fn encode_frame(payload: &str) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 1);
    frame.extend_from_slice(payload.as_bytes());
    frame.push(FRAME_DELIMITER);
    frame
}
