//! Physical link to the LED controller
//!
//! The sender only needs a byte stream in each direction. [`Connector`] opens
//! one; [`SerialConnector`] is the real serial port.

use super::SenderError;
use std::future::Future;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::SerialPortBuilderExt;

/// Telemetry half of an open link
pub type LinkReader = Box<dyn AsyncRead + Send + Unpin>;
/// Frame half of an open link
pub type LinkWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Opens a fresh link each time the sender (re)connects
pub trait Connector: Send + Sync + 'static {
    fn connect(&self) -> impl Future<Output = Result<(LinkReader, LinkWriter), SenderError>> + Send;
}

/// Serial port at a fixed path and baud rate
#[derive(Debug, Clone)]
pub struct SerialConnector {
    path: String,
    baud_rate: u32,
}

impl SerialConnector {
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
        }
    }
}

impl Connector for SerialConnector {
    async fn connect(&self) -> Result<(LinkReader, LinkWriter), SenderError> {
        let stream = tokio_serial::new(&self.path, self.baud_rate)
            .open_native_async()
            .map_err(|e| SenderError::Open {
                path: self.path.clone(),
                source: e.into(),
            })?;

        log::info!("Opened {} at {} baud", self.path, self.baud_rate);
        let (reader, writer) = tokio::io::split(stream);
        Ok((Box::new(reader), Box::new(writer)))
    }
}
