use std::sync::Arc;

use anyhow::Result;

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Sound/haptic cues around a session. Best effort, like the presence indicator.
pub trait SessionFeedback: Send + Sync + 'static {
    /// A flip started the session.
    fn flip_detected(&self) -> Result<()>;

    /// A finished session made it into history.
    fn session_recorded(&self) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SilentFeedback;

impl SessionFeedback for SilentFeedback {
    fn flip_detected(&self) -> Result<()> {
        log_info!("Flip detected");
        Ok(())
    }

    fn session_recorded(&self) -> Result<()> {
        log_info!("Session recorded");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackCue {
    FlipDetected,
    SessionRecorded,
}

pub fn dispatch(
    feedback: &Arc<dyn SessionFeedback>,
    cue: FeedbackCue,
) -> tokio::task::JoinHandle<()> {
    let feedback = Arc::clone(feedback);
    tokio::task::spawn_blocking(move || {
        let result = match cue {
            FeedbackCue::FlipDetected => feedback.flip_detected(),
            FeedbackCue::SessionRecorded => feedback.session_recorded(),
        };
        if let Err(err) = result {
            log_warn!("Feedback cue {cue:?} failed: {err:#}");
        }
    })
}

#[cfg(feature = "chime")]
pub use chime::ChimeFeedback;

#[cfg(feature = "chime")]
mod chime {
    use std::{
        sync::{
            mpsc::{self, Sender},
            Mutex,
        },
        thread,
        time::Duration,
    };

    use anyhow::{anyhow, Context, Result};
    use rodio::{source::SineWave, OutputStream, Sink, Source};

    use super::SessionFeedback;

    const FLIP_TONE_HZ: f32 = 660.0;
    const RECORDED_TONES_HZ: [f32; 2] = [880.0, 1320.0];
    const TONE_MS: u64 = 180;
    const VOLUME: f32 = 0.25;

    enum ChimeCommand {
        Play(Vec<f32>),
    }

    /// Plays short sine chimes on a dedicated audio thread.
    ///
    /// rodio's output stream is not `Send`, so it stays on its own thread and
    /// callers only push commands.
    pub struct ChimeFeedback {
        tx: Mutex<Sender<ChimeCommand>>,
    }

    impl ChimeFeedback {
        pub fn new() -> Result<Self> {
            let (tx, rx) = mpsc::channel::<ChimeCommand>();

            thread::Builder::new()
                .name("flipfocus-chime".to_string())
                .spawn(move || {
                    let (_stream, handle) = match OutputStream::try_default() {
                        Ok(pair) => pair,
                        Err(err) => {
                            log::warn!("Failed to create audio output stream: {err}");
                            return;
                        }
                    };

                    while let Ok(ChimeCommand::Play(tones)) = rx.recv() {
                        let sink = match Sink::try_new(&handle) {
                            Ok(sink) => sink,
                            Err(err) => {
                                log::warn!("Failed to create audio sink: {err}");
                                continue;
                            }
                        };
                        for hz in tones {
                            sink.append(
                                SineWave::new(hz)
                                    .take_duration(Duration::from_millis(TONE_MS))
                                    .amplify(VOLUME),
                            );
                        }
                        sink.sleep_until_end();
                    }
                })
                .context("failed to spawn chime thread")?;

            Ok(Self { tx: Mutex::new(tx) })
        }

        fn play(&self, tones: &[f32]) -> Result<()> {
            self.tx
                .lock()
                .map_err(|_| anyhow!("chime sender poisoned"))?
                .send(ChimeCommand::Play(tones.to_vec()))
                .map_err(|_| anyhow!("chime thread is gone"))
        }
    }

    impl SessionFeedback for ChimeFeedback {
        fn flip_detected(&self) -> Result<()> {
            self.play(&[FLIP_TONE_HZ])
        }

        fn session_recorded(&self) -> Result<()> {
            self.play(&RECORDED_TONES_HZ)
        }
    }
}
