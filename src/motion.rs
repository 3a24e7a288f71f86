//! Accelerometer z-axis interpretation.
//!
//! Two readers share the stream. While a session is Preparing, the engine
//! compares each sample against the user's flip sensitivity. Outside
//! Preparing, [`FlipDetector`] tracks face-down/face-up with a dead zone so
//! a phone resting near the boundary does not chatter.

use serde::Serialize;

pub const FACE_DOWN_ABOVE: f64 = 0.9;
pub const FACE_UP_BELOW: f64 = 0.8;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Orientation {
    FaceDown,
    FaceUp,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlipDetector {
    face_down: bool,
    down_above: f64,
    up_below: f64,
}

impl Default for FlipDetector {
    fn default() -> Self {
        Self::new(FACE_DOWN_ABOVE, FACE_UP_BELOW)
    }
}

impl FlipDetector {
    /// `up_below` must not exceed `down_above`; the gap between them is the dead zone.
    pub fn new(down_above: f64, up_below: f64) -> Self {
        Self {
            face_down: false,
            down_above,
            up_below: up_below.min(down_above),
        }
    }

    pub fn is_face_down(&self) -> bool {
        self.face_down
    }

    /// Feeds one sample and returns the edge it crossed, if any.
    pub fn observe(&mut self, z: f64) -> Option<Orientation> {
        if z > self.down_above {
            if !self.face_down {
                self.face_down = true;
                return Some(Orientation::FaceDown);
            }
        } else if z < self.up_below && self.face_down {
            self.face_down = false;
            return Some(Orientation::FaceUp);
        }
        None
    }
}

/// Whether a Preparing session should start on this sample.
pub fn crosses_flip_threshold(z: f64, sensitivity: f64) -> bool {
    z > sensitivity
}
