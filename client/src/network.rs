use log::{error, info};
use shared::{encode_frame, FrameBuffer, EXIT_COMMAND, READ_CHUNK_SIZE};
use std::io::{self, Write};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;

/// One connected chat session.
pub struct Client {
    stream: TcpStream,
}

impl Client {
    pub async fn connect(addr: &str) -> io::Result<Self> {
        info!("Connecting to {}...", addr);
        let stream = TcpStream::connect(addr).await?;
        info!("Connected!");
        Ok(Self { stream })
    }

    /// Runs the session until `.exit` is sent, stdin closes, or the server
    /// side goes away.
    pub async fn run(self) -> io::Result<()> {
        let (reader, mut writer) = self.stream.into_split();
        let mut incoming = tokio::spawn(print_incoming(reader));

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            prompt()?;

            tokio::select! {
                result = lines.next_line() => {
                    let Some(line) = result? else {
                        // stdin closed; nothing more to send.
                        break;
                    };
                    writer.write_all(&encode_frame(&line)).await?;
                    if line == EXIT_COMMAND {
                        break;
                    }
                }
                _ = &mut incoming => break,
            }
        }

        incoming.abort();
        Ok(())
    }
}

fn prompt() -> io::Result<()> {
    print!("> ");
    io::stdout().flush()
}

/// Decodes and prints broadcasts until the server disconnects or echoes an
/// exit frame back.
async fn print_incoming(reader: OwnedReadHalf) {
    let mut frames = FrameBuffer::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        if let Err(e) = reader.readable().await {
            error!("readable(...) failed: {}", e);
            return;
        }

        match reader.try_read(&mut chunk) {
            Ok(0) => {
                info!("Server closed the connection");
                return;
            }
            Ok(n) => {
                if let Some(frame) = frames.push_chunk(&chunk[..n]) {
                    if frame == EXIT_COMMAND.as_bytes() {
                        return;
                    }
                    println!("{}", String::from_utf8_lossy(&frame));
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => {
                error!("recv(...) failed: {}", e);
                return;
            }
        }
    }
}
