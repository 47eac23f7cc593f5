use crate::envelope::AudioLevels;
use serde::{Deserialize, Serialize};

/// Command byte that starts every frame on the serial link
pub const FRAME_START: u8 = b'*';

/// Audio levels as reported by the controller, in millivolts
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct AudioSample {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub count: f32,
    pub min: f32,
    pub avg: f32,
    pub max: f32,
}

fn is_zero(value: &f32) -> bool {
    *value == 0.0
}

/// Telemetry line sent back by the controller
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Telemetry {
    pub brightness: i32,
    #[serde(rename = "supply_mw")]
    pub supply_milliwatts: i32,
    #[serde(rename = "audio_mv")]
    pub audio: AudioSample,
}

/// Status summary pushed to connected clients, one per telemetry line
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Status {
    /// Brightness reported by the controller, as a percentage of 255
    pub brightness: i32,
    #[serde(rename = "watts")]
    pub supply_watts: i32,
    pub audio_volts: f32,
    pub audio_amplitude: f32,
    pub audio_max_amplitude: f32,
}

impl Status {
    /// Build a status record from a telemetry line and the updated envelopes
    pub fn from_telemetry(telemetry: &Telemetry, levels: &AudioLevels) -> Self {
        Status {
            brightness: telemetry.brightness.clamp(0, 255) * 100 / 255,
            supply_watts: telemetry.supply_milliwatts / 1000,
            audio_volts: levels.slow.avg.trunc() / 1000.0,
            audio_amplitude: levels.fast.amplitude() as f32 / 1000.0,
            audio_max_amplitude: levels.slow.amplitude() as f32 / 1000.0,
        }
    }
}

/// Control message sent by a client.
///
/// Every field is optional; values arrive as strings and are validated when
/// applied.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ControlMessage {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub brightness: Option<String>,
    #[serde(default)]
    pub audio_dimming: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}
