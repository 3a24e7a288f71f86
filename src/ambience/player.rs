use std::{
    sync::{
        mpsc::{self, Sender},
        Mutex,
    },
    thread,
};

use anyhow::{anyhow, Context, Result};
use rodio::{OutputStream, Sink};

use super::{
    brown_noise::BrownNoise, lofi::LofiPad, rain::RainSound, white_noise::WhiteNoise,
    AmbientPlayer,
};
use crate::models::AmbientSound;

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

enum AudioCommand {
    Play(AmbientSound),
    Stop,
}

/// Loops the generated sounds through rodio.
///
/// The output stream is not `Send`, so it lives on its own thread and is
/// only opened while something plays.
pub struct RodioAmbience {
    tx: Mutex<Sender<AudioCommand>>,
}

impl RodioAmbience {
    pub fn new() -> Result<Self> {
        let (tx, rx) = mpsc::channel::<AudioCommand>();

        thread::Builder::new()
            .name("flipfocus-ambience-audio".to_string())
            .spawn(move || {
                let mut _stream: Option<OutputStream> = None;
                let mut sink: Option<Sink> = None;

                while let Ok(command) = rx.recv() {
                    if let Some(old) = sink.take() {
                        old.stop();
                    }
                    _stream = None;

                    let sound = match command {
                        AudioCommand::Play(sound) if !sound.is_silent() => sound,
                        _ => continue,
                    };

                    let (stream, handle) = match OutputStream::try_default() {
                        Ok(pair) => pair,
                        Err(err) => {
                            log_warn!("Failed to create audio output stream: {err}");
                            continue;
                        }
                    };
                    let new_sink = match Sink::try_new(&handle) {
                        Ok(new_sink) => new_sink,
                        Err(err) => {
                            log_warn!("Failed to create audio sink: {err}");
                            continue;
                        }
                    };

                    match sound {
                        AmbientSound::WhiteNoise => new_sink.append(WhiteNoise::new()),
                        AmbientSound::BrownNoise => new_sink.append(BrownNoise::new()),
                        AmbientSound::Rain => new_sink.append(RainSound::new()),
                        AmbientSound::Lofi => new_sink.append(LofiPad::new()),
                        AmbientSound::None => {}
                    }
                    log_info!("Playing {sound}");
                    _stream = Some(stream);
                    sink = Some(new_sink);
                }
            })
            .context("failed to spawn ambience audio thread")?;

        Ok(Self { tx: Mutex::new(tx) })
    }

    fn send(&self, command: AudioCommand) -> Result<()> {
        self.tx
            .lock()
            .map_err(|_| anyhow!("ambience sender poisoned"))?
            .send(command)
            .map_err(|_| anyhow!("ambience audio thread is gone"))
    }
}

impl AmbientPlayer for RodioAmbience {
    fn play(&self, sound: AmbientSound) -> Result<()> {
        self.send(AudioCommand::Play(sound))
    }

    fn stop(&self) -> Result<()> {
        self.send(AudioCommand::Stop)
    }
}
