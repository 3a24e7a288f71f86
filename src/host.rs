//! Line-oriented host around the session engine.
//!
//! Each stdin line is one command; engine events and command replies are
//! written to stdout as one JSON object per line. Logs go to stderr.

use std::{str::FromStr, time::Duration};

use anyhow::{anyhow, bail, Context, Error, Result};
use chrono::Local;
use serde::Serialize;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};

use crate::{
    clock::elapsed_seconds,
    db::KeyValueStore,
    lifecycle::LifecycleSignal,
    models::{AmbientSound, FocusSession, PendingCompletedRecord, SessionTag},
    session::{SessionEngine, SessionState, SessionSummary},
    settings::{AppSettings, SettingsPatch},
    stats::{format_duration, format_timer, FocusStats},
};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

const PRINTER_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq)]
pub enum HostCommand {
    Start,
    Cancel,
    Stop,
    Dismiss,
    Tag(SessionTag),
    Sound(AmbientSound),
    Lifecycle(LifecycleSignal),
    Motion(f64),
    Link(String),
    /// Stands in for the native surface ending a session on its own.
    Pending { start_ms: i64, end_ms: i64 },
    History,
    Delete(String),
    Clear,
    Stats,
    /// `None` shows the current settings.
    Settings(Option<SettingsPatch>),
    State,
    Quit,
}

impl FromStr for HostCommand {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };

        let command = match verb.to_ascii_lowercase().as_str() {
            "start" => HostCommand::Start,
            "cancel" => HostCommand::Cancel,
            "stop" => HostCommand::Stop,
            "dismiss" => HostCommand::Dismiss,
            "tag" => HostCommand::Tag(required(verb, rest)?.parse()?),
            "sound" => HostCommand::Sound(required(verb, rest)?.parse()?),
            "lifecycle" => HostCommand::Lifecycle(required(verb, rest)?.parse()?),
            "motion" => HostCommand::Motion(
                required(verb, rest)?
                    .parse()
                    .with_context(|| format!("invalid z value '{rest}'"))?,
            ),
            "link" => HostCommand::Link(required(verb, rest)?.to_string()),
            "pending" => {
                let mut parts = rest.split_whitespace();
                let mut next = |name: &str| -> Result<i64> {
                    let raw = parts
                        .next()
                        .ok_or_else(|| anyhow!("pending needs <start_ms> <end_ms>"))?;
                    raw.parse()
                        .with_context(|| format!("invalid {name} '{raw}'"))
                };
                let start_ms = next("start_ms")?;
                let end_ms = next("end_ms")?;
                HostCommand::Pending { start_ms, end_ms }
            }
            "history" => HostCommand::History,
            "delete" => HostCommand::Delete(required(verb, rest)?.to_string()),
            "clear" => HostCommand::Clear,
            "stats" => HostCommand::Stats,
            "settings" if rest.is_empty() => HostCommand::Settings(None),
            "settings" => HostCommand::Settings(Some(
                serde_json::from_str(rest).context("settings patch must be a JSON object")?,
            )),
            "state" => HostCommand::State,
            "quit" | "exit" => HostCommand::Quit,
            "" => bail!("empty command"),
            other => bail!("unknown command '{other}'"),
        };
        Ok(command)
    }
}

fn required<'a>(verb: &str, rest: &'a str) -> Result<&'a str> {
    if rest.is_empty() {
        bail!("{verb} needs an argument");
    }
    Ok(rest)
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "reply", rename_all = "camelCase")]
pub enum Reply {
    Ack {
        command: &'static str,
        accepted: bool,
    },
    Stopped {
        summary: Option<SessionSummary>,
    },
    History {
        sessions: Vec<FocusSession>,
    },
    Stats {
        stats: FocusStats,
        today: String,
        total: String,
    },
    Settings {
        settings: AppSettings,
    },
    State {
        state: SessionState,
        timer: String,
    },
    Error {
        message: String,
    },
}

#[derive(Debug)]
pub enum Step {
    Continue(Reply),
    Quit,
}

pub async fn execute<S: KeyValueStore>(engine: &SessionEngine<S>, command: HostCommand) -> Step {
    let ack = |command, accepted| Step::Continue(Reply::Ack { command, accepted });

    match command {
        HostCommand::Start => ack("start", engine.start_intention().await),
        HostCommand::Cancel => ack("cancel", engine.cancel_intention().await),
        HostCommand::Stop => Step::Continue(Reply::Stopped {
            summary: engine.stop_session().await,
        }),
        HostCommand::Dismiss => ack("dismiss", engine.dismiss_summary().await),
        HostCommand::Tag(tag) => {
            engine.set_tag(tag).await;
            ack("tag", true)
        }
        HostCommand::Sound(sound) => {
            engine.set_sound(sound).await;
            ack("sound", true)
        }
        HostCommand::Lifecycle(signal) => {
            engine.handle_lifecycle(signal).await;
            ack("lifecycle", true)
        }
        HostCommand::Motion(z) => {
            engine.handle_motion(z).await;
            ack("motion", true)
        }
        HostCommand::Link(url) => ack("link", engine.handle_deep_link(&url).await),
        HostCommand::Pending { start_ms, end_ms } => {
            let record = PendingCompletedRecord {
                start_time: start_ms,
                end_time: end_ms,
                duration: elapsed_seconds(start_ms, end_ms),
            };
            match engine.session_records().push_pending(record).await {
                Ok(()) => ack("pending", true),
                Err(err) => error_reply(err),
            }
        }
        HostCommand::History => Step::Continue(Reply::History {
            sessions: engine.history().await,
        }),
        HostCommand::Delete(id) => match engine.delete_session(&id).await {
            Ok(()) => ack("delete", true),
            Err(err) => error_reply(err),
        },
        HostCommand::Clear => match engine.clear_history().await {
            Ok(()) => ack("clear", true),
            Err(err) => error_reply(err),
        },
        HostCommand::Stats => {
            let history = engine.history().await;
            let goal = engine.settings().await.daily_goal_minutes;
            let stats = FocusStats::from_sessions(&history, &Local::now(), goal);
            Step::Continue(Reply::Stats {
                today: format_duration(stats.today_seconds),
                total: format_duration(stats.total_seconds),
                stats,
            })
        }
        HostCommand::Settings(None) => Step::Continue(Reply::Settings {
            settings: engine.settings().await,
        }),
        HostCommand::Settings(Some(patch)) => match engine.update_settings(patch).await {
            Ok(settings) => Step::Continue(Reply::Settings { settings }),
            Err(err) => error_reply(err),
        },
        HostCommand::State => {
            let state = engine.snapshot().await;
            Step::Continue(Reply::State {
                timer: format_timer(state.elapsed_seconds),
                state,
            })
        }
        HostCommand::Quit => Step::Quit,
    }
}

fn error_reply(err: Error) -> Step {
    log_error!("Command failed: {err:#}");
    Step::Continue(Reply::Error {
        message: format!("{err:#}"),
    })
}

fn print_json(value: &impl Serialize) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{line}"),
        Err(err) => log_error!("Failed to serialize output: {err}"),
    }
}

/// Runs until stdin closes, `quit` is read, or Ctrl-C.
pub async fn serve<S: KeyValueStore>(
    engine: SessionEngine<S>,
    initial_url: Option<String>,
) -> Result<()> {
    let mut events = engine.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_json(&event),
                Err(RecvError::Lagged(skipped)) => {
                    log_warn!("Output fell behind; dropped {skipped} event(s)")
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    engine.initialize().await;
    if let Some(url) = initial_url.as_deref() {
        engine.handle_deep_link(url).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let result = loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => {
                log_info!("Interrupted");
                break Ok(());
            }
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break Ok(()),
            Err(err) => break Err(Error::from(err).context("failed to read stdin")),
        };
        if line.trim().is_empty() {
            continue;
        }

        let step = match line.parse::<HostCommand>() {
            Ok(command) => execute(&engine, command).await,
            Err(err) => Step::Continue(Reply::Error {
                message: format!("{err:#}"),
            }),
        };
        match step {
            Step::Continue(reply) => print_json(&reply),
            Step::Quit => break Ok(()),
        }
    };

    engine.shutdown().await;
    drop(engine);
    // Lets already queued events reach stdout once the sender side is gone.
    if tokio::time::timeout(PRINTER_DRAIN_TIMEOUT, printer).await.is_err() {
        log_warn!("Event printer did not finish in time");
    }
    result
}
