//! Serial sender
//!
//! Owns the link to the LED controller. Frames from the streamer's queue are
//! resized to the strip length, colour filtered and written as
//! `'*' brightness R G B ...`. A concurrent task reads telemetry back and
//! adjusts the brightness used for the next frame.
//!
//! Any link failure closes the link, waits [`RETRY_DELAY`] and reconnects.
//! The sender only returns once the frame queue is closed.

mod link;
mod telemetry;

use crate::envelope::{AudioLevels, DEFAULT_NOISE_FLOOR};
use crate::pixels::{PixelBuffer, PixelError};
use crate::protocol::{FRAME_START, Status};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};

use telemetry::TelemetryReader;

pub use link::{Connector, LinkReader, LinkWriter, SerialConnector};

/// Pause between a link failure and the next connection attempt
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Sender error types
#[derive(Error, Debug)]
pub enum SenderError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("link stopped accepting bytes partway through a {expected} byte write")]
    ShortWrite { expected: usize },
    #[error("link closed by the controller")]
    Disconnected,
    #[error("bad frame: {0}")]
    Frame(#[from] PixelError),
}

/// Live settings shared between the write loop, the telemetry loop and
/// control clients.
///
/// Readers may see a value one frame late; nothing here blocks the write
/// loop.
pub struct SenderConfig {
    num_pixels: usize,
    brightness: AtomicU8,
    max_brightness: AtomicU8,
    audio_dimming: AtomicU8,
    color_filter: watch::Sender<Option<PixelBuffer>>,
}

impl SenderConfig {
    pub fn new(num_pixels: usize, max_brightness: u8, audio_dimming: u8) -> Self {
        Self {
            num_pixels,
            brightness: AtomicU8::new(max_brightness),
            max_brightness: AtomicU8::new(max_brightness),
            audio_dimming: AtomicU8::new(audio_dimming),
            color_filter: watch::Sender::new(None),
        }
    }

    /// Bytes in one frame payload
    pub fn frame_len(&self) -> usize {
        self.num_pixels * 3
    }

    /// Brightness sent with the next frame
    pub fn brightness(&self) -> u8 {
        self.brightness.load(Ordering::Relaxed)
    }

    pub fn set_brightness(&self, brightness: u8) {
        self.brightness.store(brightness, Ordering::Relaxed);
    }

    pub fn max_brightness(&self) -> u8 {
        self.max_brightness.load(Ordering::Relaxed)
    }

    /// Set the brightness ceiling.
    ///
    /// Also applied immediately, so the change shows even when the
    /// controller sends no telemetry.
    pub fn set_max_brightness(&self, brightness: u8) {
        self.max_brightness.store(brightness, Ordering::Relaxed);
        self.brightness.store(brightness, Ordering::Relaxed);
    }

    pub fn audio_dimming(&self) -> u8 {
        self.audio_dimming.load(Ordering::Relaxed)
    }

    /// 0 disables audio dimming, 255 lets silence dim the strip to black
    pub fn set_audio_dimming(&self, dimming: u8) {
        self.audio_dimming.store(dimming, Ordering::Relaxed);
    }

    /// Set a colour multiplied into every frame. Pure white clears it.
    pub fn set_color_filter(&self, rgb: [u8; 3]) -> Result<(), PixelError> {
        if rgb == [0xff, 0xff, 0xff] {
            self.clear_color_filter();
            return Ok(());
        }

        let filter = PixelBuffer::new(rgb.to_vec()).resize(self.frame_len())?;
        self.color_filter.send_replace(Some(filter));
        Ok(())
    }

    pub fn clear_color_filter(&self) {
        self.color_filter.send_replace(None);
    }

    pub fn has_color_filter(&self) -> bool {
        self.color_filter.borrow().is_some()
    }

    /// Apply the active colour filter, if it matches the frame size
    fn filter(&self, frame: PixelBuffer) -> PixelBuffer {
        let filter = self.color_filter.borrow();
        match filter.as_ref() {
            Some(mask) if mask.len() == frame.len() => frame.mult(mask).unwrap_or(frame),
            _ => frame,
        }
    }
}

/// Writes frames to the controller and reads its telemetry
pub struct FrameSender<C> {
    connector: C,
    config: Arc<SenderConfig>,
    status: Option<mpsc::Sender<Status>>,
    noise_floor: i32,
    retry_delay: Duration,
}

impl<C: Connector> FrameSender<C> {
    pub fn new(connector: C, config: Arc<SenderConfig>) -> Self {
        Self {
            connector,
            config,
            status: None,
            noise_floor: DEFAULT_NOISE_FLOOR,
            retry_delay: RETRY_DELAY,
        }
    }

    /// Push a [`Status`] per telemetry line into `status`
    pub fn with_status(mut self, status: mpsc::Sender<Status>) -> Self {
        self.status = Some(status);
        self
    }

    /// Baseline amplitude under which audio is ignored
    pub fn with_noise_floor(mut self, noise_floor: i32) -> Self {
        self.noise_floor = noise_floor;
        self
    }

    /// Stream frames to the controller until the frame queue closes,
    /// reconnecting after every failure.
    pub async fn run(&self, mut frames: mpsc::Receiver<PixelBuffer>) {
        loop {
            match self.send(&mut frames).await {
                Ok(()) => {
                    log::info!("Frame queue closed, sender stopping");
                    return;
                }
                Err(e) => {
                    log::error!("Sender returned: {}", e);
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }

    /// One connection's lifetime: returns `Ok` only when the queue closes
    async fn send(&self, frames: &mut mpsc::Receiver<PixelBuffer>) -> Result<(), SenderError> {
        let (reader, mut writer) = self.connector.connect().await?;

        let telemetry = TelemetryReader {
            config: Arc::clone(&self.config),
            status: self.status.clone(),
            levels: AudioLevels::new(self.noise_floor),
        };
        let mut reader_task = tokio::spawn(telemetry.run(reader));

        let result = loop {
            tokio::select! {
                joined = &mut reader_task => {
                    break Err(joined.unwrap_or_else(|e| SenderError::Io(std::io::Error::other(e))));
                }

                frame = frames.recv() => {
                    let Some(frame) = frame else {
                        break Ok(());
                    };
                    if let Err(e) = self.write_frame(&mut writer, frame).await {
                        break Err(e);
                    }
                }
            }
        };

        reader_task.abort();
        result
    }

    async fn write_frame<W>(&self, writer: &mut W, frame: PixelBuffer) -> Result<(), SenderError>
    where
        W: AsyncWrite + Unpin,
    {
        if frame.is_empty() {
            log::trace!("Skipping empty frame");
            return Ok(());
        }

        let frame = self.config.filter(frame.resize(self.config.frame_len())?);

        write_segment(writer, &[FRAME_START, self.config.brightness()]).await?;
        write_segment(writer, frame.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Write all of `bytes`. A link that stops accepting bytes partway through
/// would desync the controller, so it counts as a failure.
async fn write_segment<W>(writer: &mut W, bytes: &[u8]) -> Result<(), SenderError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(bytes).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::WriteZero {
            SenderError::ShortWrite {
                expected: bytes.len(),
            }
        } else {
            SenderError::Io(e)
        }
    })
}
