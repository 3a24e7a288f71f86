use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rodio::Source;
use std::f32::consts::TAU;
use std::time::Duration;

use super::brown_noise::SAMPLE_RATE;

/// A minor-seventh chord, A3 C4 E4 G4.
const CHORD_HZ: [f32; 4] = [220.0, 261.63, 329.63, 392.0];
const WOBBLE_HZ: f32 = 0.25;

/// Soft sine-chord pad with a slow tape wobble and a touch of vinyl hiss.
///
/// Phases are accumulated per sample so long sessions do not lose pitch to
/// float precision.
pub struct LofiPad {
    phases: [f32; 4],
    wobble_phase: f32,
    rng: StdRng,
}

impl LofiPad {
    pub fn new() -> Self {
        Self {
            phases: [0.0; 4],
            wobble_phase: 0.0,
            rng: StdRng::from_entropy(),
        }
    }
}

impl Default for LofiPad {
    fn default() -> Self {
        Self::new()
    }
}

fn advance(phase: &mut f32, hz: f32) {
    *phase += TAU * hz / SAMPLE_RATE as f32;
    if *phase > TAU {
        *phase -= TAU;
    }
}

impl Iterator for LofiPad {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        let mut tone = 0.0;
        for (phase, hz) in self.phases.iter_mut().zip(CHORD_HZ) {
            tone += phase.sin();
            advance(phase, hz);
        }
        tone /= CHORD_HZ.len() as f32;

        advance(&mut self.wobble_phase, WOBBLE_HZ);
        let wobble = 0.8 + 0.2 * self.wobble_phase.sin();
        let hiss: f32 = self.rng.gen_range(-1.0..1.0) * 0.01;

        Some(tone * wobble * 0.15 + hiss)
    }
}

impl Source for LofiPad {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_is_soft_and_audible() {
        let samples: Vec<f32> = LofiPad::new().take(SAMPLE_RATE as usize).collect();
        assert!(samples.iter().all(|s| s.abs() <= 0.16));
        let peak = samples.iter().fold(0.0f32, |peak, s| peak.max(s.abs()));
        assert!(peak > 0.03);
    }
}
