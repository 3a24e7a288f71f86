//! Background sound looped while a session is running.
//!
//! The engine talks to an [`AmbientPlayer`] only through an
//! [`AmbienceChannel`]: calls run in order on a dedicated thread and a failing
//! player never touches the session.

#[cfg(feature = "ambience")]
pub mod brown_noise;
#[cfg(feature = "ambience")]
pub mod lofi;
#[cfg(feature = "ambience")]
mod player;
#[cfg(feature = "ambience")]
pub mod rain;
#[cfg(feature = "ambience")]
pub mod white_noise;

#[cfg(feature = "ambience")]
pub use player::RodioAmbience;

use std::sync::Arc;

use anyhow::Result;

use crate::{models::AmbientSound, utils::serial::SerialWorker};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

pub trait AmbientPlayer: Send + Sync + 'static {
    /// Replaces whatever is playing with `sound`, looped until [`stop`](Self::stop).
    fn play(&self, sound: AmbientSound) -> Result<()>;

    fn stop(&self) -> Result<()>;
}

/// Used when the host was built without an audio backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentAmbience;

impl AmbientPlayer for SilentAmbience {
    fn play(&self, sound: AmbientSound) -> Result<()> {
        log_debug!("No audio backend; not playing {sound}");
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmbientCall {
    Play(AmbientSound),
    Stop,
}

impl AmbientCall {
    /// `Play(None)` is a stop.
    pub fn for_sound(sound: AmbientSound) -> Self {
        if sound.is_silent() {
            AmbientCall::Stop
        } else {
            AmbientCall::Play(sound)
        }
    }
}

pub struct AmbienceChannel {
    worker: SerialWorker<AmbientCall>,
}

impl AmbienceChannel {
    pub fn new(player: Arc<dyn AmbientPlayer>) -> Self {
        let worker = SerialWorker::spawn("flipfocus-ambience", move |call: AmbientCall| {
            let result = match call {
                AmbientCall::Play(sound) => player.play(sound),
                AmbientCall::Stop => player.stop(),
            };
            if let Err(err) = result {
                log_warn!("Ambient sound {call:?} failed: {err:#}");
            }
        });
        Self { worker }
    }

    pub fn send(&self, call: AmbientCall) {
        self.worker.send(call);
    }
}
