//! Frame pacing
//!
//! The streamer pulls one frame per tick from the active [`FrameSource`] and
//! pushes it into the bounded frame queue read by the sender. A full queue
//! stalls the streamer rather than dropping frames. Sources can be swapped
//! at any time through a [`StreamerHandle`]; a swap takes effect between
//! ticks.

use crate::pixels::PixelBuffer;
use crate::source::FrameSource;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

/// `None` asks the streamer to shut down
type Swap = Option<Box<dyn FrameSource>>;

#[derive(Error, Debug)]
pub enum StreamerError {
    #[error("streamer is no longer running")]
    Closed,
}

/// Cloneable handle for swapping the streamer's frame source
#[derive(Clone)]
pub struct StreamerHandle {
    swaps: mpsc::Sender<Swap>,
}

impl StreamerHandle {
    /// Hand a new source to the streamer.
    ///
    /// Only one swap can be pending; a second call waits until the streamer
    /// has picked up the first.
    pub async fn set_source(&self, source: Box<dyn FrameSource>) -> Result<(), StreamerError> {
        self.swaps
            .send(Some(source))
            .await
            .map_err(|_| StreamerError::Closed)
    }

    /// Stop the streamer. It releases its source and closes the frame queue.
    pub async fn shutdown(&self) -> Result<(), StreamerError> {
        self.swaps.send(None).await.map_err(|_| StreamerError::Closed)
    }
}

pub struct Streamer {
    swaps: mpsc::Receiver<Swap>,
    interval: Duration,
}

impl Streamer {
    /// Create a streamer ticking every `interval` and the handle that feeds it
    pub fn new(interval: Duration) -> (Self, StreamerHandle) {
        let (tx, rx) = mpsc::channel(1);
        (
            Self {
                swaps: rx,
                interval,
            },
            StreamerHandle { swaps: tx },
        )
    }

    /// Run until shut down, pushing frames into `frames`.
    ///
    /// Waits for a first source before the clock starts. The frame queue is
    /// closed when this returns.
    pub async fn run(mut self, frames: mpsc::Sender<PixelBuffer>) {
        let Some(Some(mut source)) = self.swaps.recv().await else {
            log::info!("Streamer stopped before receiving a source");
            return;
        };

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                swap = self.swaps.recv() => {
                    // A closed channel means every handle is gone.
                    let Some(next) = swap.flatten() else {
                        break;
                    };
                    log::debug!("Swapping frame source");
                    source.release();
                    source = next;
                }

                _ = ticker.tick() => {
                    let frame = source.next_frame();
                    if frames.send(frame).await.is_err() {
                        log::warn!("Frame queue closed, stopping streamer");
                        break;
                    }
                }
            }
        }

        source.release();
        log::info!("Streamer stopped");
    }
}
