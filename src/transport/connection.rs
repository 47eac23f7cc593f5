//! Server-side connection handling using tokio

use super::{TransportError, codec};
use crate::protocol::ControlMessage;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

/// A connected control client
pub struct Connection {
    pub lines: Lines<BufReader<OwnedReadHalf>>,
    pub writer: OwnedWriteHalf,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    /// Read and decode the next control message, `None` once the client
    /// hangs up.
    ///
    /// Cancel safe, so it can sit in a `select!` next to outgoing writes.
    /// Malformed lines surface as [`TransportError::Serialization`] so the
    /// caller can skip them and keep the connection.
    pub async fn read_control_message(&mut self) -> Result<Option<ControlMessage>, TransportError> {
        match self.lines.next_line().await? {
            None => Ok(None), // EOF - connection closed
            Some(line) => Ok(Some(codec::decode_control_message(&line)?)),
        }
    }

    /// Write pre-encoded bytes to the client
    pub async fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }
}
