//! Audio envelope followers
//!
//! The controller reports min/avg/max audio levels a few times a second. Two
//! exponentially smoothed envelopes track them: a slow one establishing the
//! ambient amplitude of the room and a fast one following the current level.
//! Their ratio drives the audio dimming of the strip.

use crate::protocol::AudioSample;

/// Window of the slow (baseline) envelope
pub const SLOW_WINDOW: u32 = 512;
/// Window of the fast (live) envelope
pub const FAST_WINDOW: u32 = 16;
/// Baseline amplitude below which audio is treated as noise, in millivolts
pub const DEFAULT_NOISE_FLOOR: i32 = 200;

/// Exponentially smoothed min/avg/max accumulator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub count: f32,
    pub min: f32,
    pub avg: f32,
    pub max: f32,
    window: f32,
}

impl Envelope {
    /// Create an envelope folding in new samples with weight `1/window`.
    ///
    /// Starts wide open (min above max) so the first real samples pull it in.
    pub fn new(window: u32) -> Self {
        Self {
            count: 0.0,
            min: 5000.0,
            avg: 2500.0,
            max: 0.0,
            window: window.max(1) as f32,
        }
    }

    /// Fold one telemetry sample into the envelope.
    ///
    /// A new minimum or maximum is taken immediately; otherwise both edges
    /// decay towards the sample at the envelope's rate.
    pub fn update(&mut self, sample: &AudioSample) {
        let n = self.window;
        let blend = |old: f32, new: f32| (old * (n - 1.0) + new) / n;

        self.count = blend(self.count, sample.count);
        self.avg = blend(self.avg, sample.avg);
        self.min = if sample.min < self.min {
            sample.min
        } else {
            blend(self.min, sample.min)
        };
        self.max = if sample.max > self.max {
            sample.max
        } else {
            blend(self.max, sample.max)
        };
    }

    /// `max - min`, rounded
    pub fn amplitude(&self) -> i32 {
        (self.max - self.min).round() as i32
    }
}

/// Slow and fast envelope pair feeding the brightness control loop
#[derive(Debug, Clone)]
pub struct AudioLevels {
    pub slow: Envelope,
    pub fast: Envelope,
    noise_floor: i32,
}

impl AudioLevels {
    pub fn new(noise_floor: i32) -> Self {
        Self {
            slow: Envelope::new(SLOW_WINDOW),
            fast: Envelope::new(FAST_WINDOW),
            noise_floor,
        }
    }

    pub fn update(&mut self, sample: &AudioSample) {
        self.slow.update(sample);
        self.fast.update(sample);
    }

    /// Brightness to use for the next frame given the current settings
    pub fn brightness(&self, max_brightness: u8, audio_dimming: u8) -> u8 {
        dimmed_brightness(
            max_brightness,
            audio_dimming,
            self.slow.amplitude(),
            self.fast.amplitude(),
            self.noise_floor,
        )
    }
}

/// The audio dimming control law.
///
/// Below the noise floor the strip runs at `max_brightness`. Otherwise the
/// brightness floors at `max - reduction` in silence and rises back to `max`
/// as the live amplitude reaches the baseline.
pub fn dimmed_brightness(
    max_brightness: u8,
    audio_dimming: u8,
    baseline: i32,
    live: i32,
    noise_floor: i32,
) -> u8 {
    if baseline < noise_floor || baseline <= 0 {
        return max_brightness;
    }

    let max = max_brightness as i64;
    let reduction = max * audio_dimming as i64 / 255;
    let brightness = max - reduction + live as i64 * reduction / baseline as i64;
    brightness.clamp(0, 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(min: f32, avg: f32, max: f32) -> AudioSample {
        AudioSample {
            count: 10.0,
            min,
            avg,
            max,
        }
    }

    #[test]
    fn test_avg_converges_to_repeated_sample() {
        for start in [0.0, 2500.0, 90000.0] {
            let mut envelope = Envelope::new(16);
            envelope.avg = start;
            for _ in 0..2000 {
                envelope.update(&sample(1000.0, 1234.0, 1500.0));
            }
            assert!(
                (envelope.avg - 1234.0).abs() < 0.5,
                "avg {} from start {}",
                envelope.avg,
                start
            );
            assert!((envelope.count - 10.0).abs() < 0.01);
        }
    }

    #[test]
    fn test_edges_attack_immediately() {
        let mut envelope = Envelope::new(512);
        envelope.update(&sample(1000.0, 1200.0, 1400.0));
        assert_eq!(envelope.min, 1000.0);
        assert_eq!(envelope.max, 1400.0);
        assert_eq!(envelope.amplitude(), 400);
    }

    #[test]
    fn test_edges_release_slowly() {
        let mut envelope = Envelope::new(4);
        envelope.update(&sample(1000.0, 1200.0, 1400.0));
        envelope.update(&sample(1200.0, 1200.0, 1200.0));
        assert_eq!(envelope.min, 1050.0);
        assert_eq!(envelope.max, 1350.0);
        assert_eq!(envelope.amplitude(), 300);
    }

    #[test]
    fn test_fresh_envelope_is_inverted() {
        assert!(Envelope::new(16).amplitude() < 0);
    }

    #[test]
    fn test_below_noise_floor_is_full_brightness() {
        assert_eq!(dimmed_brightness(255, 255, 150, 20, 200), 255);
        assert_eq!(dimmed_brightness(180, 255, -5000, 0, 200), 180);
    }

    #[test]
    fn test_live_at_baseline_is_full_swing() {
        assert_eq!(dimmed_brightness(255, 255, 800, 800, 200), 255);
        assert_eq!(dimmed_brightness(200, 128, 800, 800, 200), 200);
    }

    #[test]
    fn test_silence_floors_brightness() {
        // reduction = 255 * 255 / 255 = 255
        assert_eq!(dimmed_brightness(255, 255, 800, 0, 200), 0);
        // reduction = 200 * 100 / 255 = 78
        assert_eq!(dimmed_brightness(200, 100, 800, 0, 200), 122);
        assert_eq!(dimmed_brightness(200, 100, 800, 400, 200), 161);
    }

    #[test]
    fn test_dimming_disabled() {
        assert_eq!(dimmed_brightness(255, 0, 800, 0, 200), 255);
    }

    #[test]
    fn test_loud_peaks_are_clamped() {
        assert_eq!(dimmed_brightness(255, 255, 400, 1600, 200), 255);
    }

    #[test]
    fn test_levels_follow_steady_signal() {
        let mut levels = AudioLevels::new(DEFAULT_NOISE_FLOOR);
        for _ in 0..5000 {
            levels.update(&sample(1000.0, 1500.0, 2000.0));
        }
        assert_eq!(levels.slow.amplitude(), 1000);
        assert_eq!(levels.fast.amplitude(), 1000);
        assert_eq!(levels.brightness(255, 255), 255);
    }

    #[test]
    fn test_levels_quiet_room_is_full_brightness() {
        let mut levels = AudioLevels::new(DEFAULT_NOISE_FLOOR);
        for _ in 0..5000 {
            levels.update(&sample(1000.0, 1010.0, 1020.0));
        }
        assert_eq!(levels.brightness(255, 255), 255);
    }
}
