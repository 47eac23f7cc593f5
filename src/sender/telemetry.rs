//! Telemetry read loop
//!
//! Reads newline-delimited JSON from the controller, folds the audio levels
//! into the envelopes and publishes the resulting brightness for the write
//! loop. Each good line also produces one [`Status`] for connected clients.

use super::{LinkReader, SenderConfig, SenderError};
use crate::envelope::AudioLevels;
use crate::protocol::{Status, Telemetry};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::mpsc;

/// Longest telemetry line accepted; anything longer is line noise
pub(super) const MAX_TELEMETRY_LINE: usize = 4096;

pub(super) struct TelemetryReader {
    pub config: Arc<SenderConfig>,
    pub status: Option<mpsc::Sender<Status>>,
    pub levels: AudioLevels,
}

impl TelemetryReader {
    /// Read until the link fails or reaches end of file
    pub async fn run(mut self, reader: LinkReader) -> SenderError {
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();
        // Set while skipping the rest of an overlong line
        let mut discarding = false;

        loop {
            line.clear();
            let read = (&mut reader)
                .take(MAX_TELEMETRY_LINE as u64)
                .read_until(b'\n', &mut line)
                .await;

            match read {
                Ok(0) => return SenderError::Disconnected,
                Ok(_) => {
                    let complete = line.last() == Some(&b'\n');
                    if discarding {
                        discarding = !complete;
                    } else if !complete && line.len() == MAX_TELEMETRY_LINE {
                        log::warn!(
                            "Skipping telemetry line longer than {} bytes",
                            MAX_TELEMETRY_LINE
                        );
                        discarding = true;
                    } else {
                        self.handle_line(&line);
                    }
                }
                Err(e) => return SenderError::Io(e),
            }
        }
    }

    fn handle_line(&mut self, line: &[u8]) {
        let line = line.trim_ascii();
        if line.is_empty() {
            return;
        }

        let telemetry: Telemetry = match serde_json::from_slice(line) {
            Ok(telemetry) => telemetry,
            Err(e) => {
                log::warn!("Skipping malformed telemetry: {}", e);
                return;
            }
        };

        self.levels.update(&telemetry.audio);
        let brightness = self
            .levels
            .brightness(self.config.max_brightness(), self.config.audio_dimming());
        self.config.set_brightness(brightness);

        if let Some(status) = &self.status {
            // Status is best effort: a slow consumer just misses updates.
            if status
                .try_send(Status::from_telemetry(&telemetry, &self.levels))
                .is_err()
            {
                log::debug!("Status sink full, dropping status");
            }
        }
    }
}
