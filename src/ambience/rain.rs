use rodio::Source;
use std::f32::consts::TAU;
use std::time::Duration;

use super::brown_noise::{BrownWalk, SAMPLE_RATE};

/// Band-passed brown noise with a slow swell, heard as steady rain.
pub struct RainSound {
    walk: BrownWalk,
    // Two-pole band-pass state.
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
    swell_phase: f32,
}

impl RainSound {
    pub fn new() -> Self {
        Self {
            walk: BrownWalk::new(),
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
            swell_phase: 0.0,
        }
    }

    fn band_pass(&mut self, input: f32) -> f32 {
        const B0: f32 = 0.1;
        const B2: f32 = -0.1;
        const A1: f32 = -1.8;
        const A2: f32 = 0.85;

        let output = B0 * input + B2 * self.x2 - A1 * self.y1 - A2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;
        output
    }
}

impl Default for RainSound {
    fn default() -> Self {
        Self::new()
    }
}

impl Iterator for RainSound {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        let brown = self.walk.step();
        let filtered = self.band_pass(brown);

        self.swell_phase += TAU * 0.3 / SAMPLE_RATE as f32;
        if self.swell_phase > TAU {
            self.swell_phase -= TAU;
        }
        let swell = 0.7 + 0.3 * self.swell_phase.sin();

        // A little unfiltered rumble under the patter.
        let mix = filtered * 0.8 + brown * 0.2;
        Some(mix * swell * 0.4)
    }
}

impl Source for RainSound {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        1
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}
