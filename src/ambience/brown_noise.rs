use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rodio::Source;
use std::time::Duration;

pub(crate) const SAMPLE_RATE: u32 = 44100;

/// Random walk over white noise. Power falls 6 dB per octave, a deep rumble.
pub struct BrownNoise {
    walk: BrownWalk,
}

impl BrownNoise {
    pub fn new() -> Self {
        Self {
            walk: BrownWalk::new(),
        }
    }
}

impl Default for BrownNoise {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared with the rain generator, which filters the same walk.
pub(crate) struct BrownWalk {
    last_value: f32,
    rng: StdRng,
}

impl BrownWalk {
    pub(crate) fn new() -> Self {
        Self {
            last_value: 0.0,
            rng: StdRng::from_entropy(),
        }
    }

    /// Next point of the walk, in [-1, 1].
    pub(crate) fn step(&mut self) -> f32 {
        let white: f32 = self.rng.gen_range(-1.0..1.0);
        self.last_value = (self.last_value + white * 0.02).clamp(-1.0, 1.0);
        // Leak toward zero so the walk does not sit on a DC offset.
        self.last_value *= 0.9999;
        self.last_value
    }
}

impl Iterator for BrownNoise {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.walk.step() * 0.3)
    }
}

impl Source for BrownNoise {
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
