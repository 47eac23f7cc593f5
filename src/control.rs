//! Control message handling
//!
//! Turns client control messages into changes on the running pipeline: a new
//! scene for the streamer, or new brightness, dimming and colour filter values
//! for the sender.

use crate::protocol::ControlMessage;
use crate::sender::SenderConfig;
use crate::source::ImageWalker;
use crate::streamer::StreamerHandle;
use std::path::PathBuf;
use std::sync::Arc;

/// Applies control messages to the streamer and sender
pub struct Controller {
    streamer: StreamerHandle,
    config: Arc<SenderConfig>,
    image_root: PathBuf,
}

impl Controller {
    pub fn new(streamer: StreamerHandle, config: Arc<SenderConfig>, image_root: PathBuf) -> Self {
        Self {
            streamer,
            config,
            image_root,
        }
    }

    /// Apply every field present in `message`. Invalid fields are logged and
    /// skipped; the rest still apply.
    pub async fn apply(&self, message: ControlMessage) {
        if let Some(value) = message.brightness.as_deref() {
            match parse_level(value) {
                Some(level) => {
                    log::info!("Max brightness set to {}", level);
                    self.config.set_max_brightness(level);
                }
                None => log::warn!("Ignoring brightness {:?}", value),
            }
        }

        if let Some(value) = message.audio_dimming.as_deref() {
            match parse_level(value) {
                Some(level) => {
                    log::info!("Audio dimming set to {}", level);
                    self.config.set_audio_dimming(level);
                }
                None => log::warn!("Ignoring audio dimming {:?}", value),
            }
        }

        if let Some(scene) = message.image.as_deref() {
            self.load_scene(scene).await;
        }

        if let Some(value) = message.color.as_deref() {
            match parse_color(value) {
                Some(rgb) => {
                    match self.config.set_color_filter(rgb) {
                        Ok(()) if self.config.has_color_filter() => {
                            log::info!("Color filter set to {}", value)
                        }
                        Ok(()) => log::info!("Color filter cleared"),
                        Err(e) => log::warn!("Failed to set color filter: {}", e),
                    }
                }
                None => log::warn!("Ignoring color {:?}", value),
            }
        }
    }

    /// Load `<image_root>/<scene>` and hand it to the streamer.
    ///
    /// A scene that fails to load leaves the current one playing.
    async fn load_scene(&self, scene: &str) {
        if !is_scene_name(scene) {
            log::warn!("Ignoring scene name {:?}", scene);
            return;
        }

        let dir = self.image_root.join(scene);
        // Listing and decoding the first image touches the disk.
        let opened = tokio::task::spawn_blocking(move || ImageWalker::open(dir)).await;

        match opened {
            Ok(Ok(walker)) => {
                if self.streamer.set_source(Box::new(walker)).await.is_err() {
                    log::warn!("Streamer stopped, dropping scene {}", scene);
                }
            }
            Ok(Err(e)) => log::error!("Failed to load scene {}: {}", scene, e),
            Err(e) => log::error!("Scene loader for {} failed: {}", scene, e),
        }
    }
}

/// Parse an integer level, clamped to 0..=255
fn parse_level(value: &str) -> Option<u8> {
    let level: i64 = value.trim().parse().ok()?;
    Some(level.clamp(0, 255) as u8)
}

/// Parse `#RRGGBB`
fn parse_color(value: &str) -> Option<[u8; 3]> {
    let hex = value.strip_prefix('#')?;
    hex::decode(hex).ok()?.try_into().ok()
}

/// Scene names must stay inside the image root
fn is_scene_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}
