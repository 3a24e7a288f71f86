use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Result;
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    ambience::{AmbienceChannel, AmbientCall, AmbientPlayer, SilentAmbience},
    clock::{elapsed_seconds, Clock, SystemClock},
    db::{HistoryStore, KeyValueStore, SessionRecordStore},
    feedback::{self, FeedbackCue, SessionFeedback, SilentFeedback},
    lifecycle::{is_start_session_link, LifecycleSignal},
    models::{
        ActiveSessionRecord, AmbientSound, FocusSession, SessionStatus, SessionTag, StartTrigger,
    },
    motion::{crosses_flip_threshold, FlipDetector},
    presence::{IndicatorCall, PresenceChannel, PresenceIndicator, UnlinkedIndicator},
    settings::{AppSettings, SettingsPatch, SettingsStore},
};

use super::{EngineEvent, SessionPhase, SessionState, SessionSummary};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub tick_interval: Duration,
    /// Log a heartbeat every N display ticks.
    pub heartbeat_every_ticks: u32,
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            heartbeat_every_ticks: 10,
            event_capacity: 64,
        }
    }
}

struct Ticker {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl Ticker {
    fn stop(self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

/// Owns the focus-session state machine.
///
/// Handlers are safe to call concurrently: each one checks and mutates the
/// phase inside a single lock scope before it touches storage, so a second
/// signal that arrives mid-persistence sees the new phase and backs off.
/// Leaf failures (storage, indicator, sound) are logged and swallowed.
#[derive(Clone)]
pub struct SessionEngine<S: KeyValueStore> {
    state: Arc<Mutex<SessionState>>,
    records: SessionRecordStore<S>,
    history: HistoryStore<S>,
    settings_store: SettingsStore<S>,
    settings: Arc<Mutex<AppSettings>>,
    /// In-memory copy of history; also serializes the engine's history writes.
    sessions: Arc<Mutex<Vec<FocusSession>>>,
    /// Orders active-record writes the same way the transitions happened.
    record_lock: Arc<Mutex<()>>,
    flip_detector: Arc<Mutex<FlipDetector>>,
    clock: Arc<dyn Clock>,
    /// Indicator and ambience calls keep the order they were sent in.
    presence: Arc<PresenceChannel>,
    ambience: Arc<AmbienceChannel>,
    feedback: Arc<dyn SessionFeedback>,
    events: broadcast::Sender<EngineEvent>,
    ticker: Arc<Mutex<Option<Ticker>>>,
    initialized: Arc<AtomicBool>,
    config: EngineConfig,
}

impl<S: KeyValueStore> SessionEngine<S> {
    pub fn new(store: S, config: EngineConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        Self {
            state: Arc::new(Mutex::new(SessionState::new())),
            records: SessionRecordStore::new(store.clone()),
            history: HistoryStore::new(store.clone()),
            settings_store: SettingsStore::new(store),
            settings: Arc::new(Mutex::new(AppSettings::default())),
            sessions: Arc::new(Mutex::new(Vec::new())),
            record_lock: Arc::new(Mutex::new(())),
            flip_detector: Arc::new(Mutex::new(FlipDetector::default())),
            clock: Arc::new(SystemClock),
            presence: Arc::new(PresenceChannel::new(Arc::new(UnlinkedIndicator))),
            ambience: Arc::new(AmbienceChannel::new(Arc::new(SilentAmbience))),
            feedback: Arc::new(SilentFeedback),
            events,
            ticker: Arc::new(Mutex::new(None)),
            initialized: Arc::new(AtomicBool::new(false)),
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_indicator(mut self, indicator: Arc<dyn PresenceIndicator>) -> Self {
        self.presence = Arc::new(PresenceChannel::new(indicator));
        self
    }

    pub fn with_ambience(mut self, player: Arc<dyn AmbientPlayer>) -> Self {
        self.ambience = Arc::new(AmbienceChannel::new(player));
        self
    }

    pub fn with_feedback(mut self, feedback: Arc<dyn SessionFeedback>) -> Self {
        self.feedback = feedback;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Store used by out-of-process actors to queue sessions they ended.
    pub fn session_records(&self) -> &SessionRecordStore<S> {
        &self.records
    }

    /// Loads settings and history, merges pending sessions, and closes any
    /// session a previous process left running.
    ///
    /// The moment this is called is the end time of a recovered session.
    pub async fn initialize(&self) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            log_warn!("Session engine already initialized; ignoring");
            return;
        }
        let process_start_ms = self.clock.now_ms();

        let (settings, active, history) = tokio::join!(
            self.settings_store.load(),
            self.records.load_active(),
            self.history.list(),
        );

        match settings {
            Ok(settings) => *self.settings.lock().await = settings,
            Err(err) => log_error!("Failed to load settings, using defaults: {err:#}"),
        }
        match history {
            Ok(history) => *self.sessions.lock().await = history,
            Err(err) => log_error!("Failed to load session history: {err:#}"),
        }

        self.sync_pending().await;

        match active {
            Ok(Some(record)) => self.recover_session(record, process_start_ms).await,
            Ok(None) => {}
            Err(err) => log_error!("Failed to check for an interrupted session: {err:#}"),
        }
    }

    pub async fn phase(&self) -> SessionPhase {
        self.state.lock().await.phase
    }

    pub async fn snapshot(&self) -> SessionState {
        let mut guard = self.state.lock().await;
        guard.sync_elapsed(self.clock.now_ms());
        guard.clone()
    }

    pub async fn history(&self) -> Vec<FocusSession> {
        self.sessions.lock().await.clone()
    }

    pub async fn settings(&self) -> AppSettings {
        self.settings.lock().await.clone()
    }

    /// User asked to focus: Idle -> Preparing.
    pub async fn start_intention(&self) -> bool {
        {
            let mut state = self.state.lock().await;
            if !state.prepare() {
                log_debug!("Ignoring start request in {:?}", state.phase);
                return false;
            }
        }

        log_info!("Preparing focus session");
        self.presence.send(IndicatorCall::EnableProximity);
        self.emit_state_changed().await;
        // Flip sensitivity may have changed since the last session.
        self.refresh_settings().await;
        true
    }

    /// Preparing -> Idle.
    pub async fn cancel_intention(&self) -> bool {
        {
            let mut state = self.state.lock().await;
            if !state.cancel_preparing() {
                return false;
            }
        }

        log_info!("Focus intention cancelled");
        self.presence.send(IndicatorCall::DisableProximity);
        self.emit_state_changed().await;
        true
    }

    /// Explicit stop. Ends a running session; while Preparing it cancels.
    pub async fn stop_session(&self) -> Option<SessionSummary> {
        match self.phase().await {
            SessionPhase::Focusing => self.finish_focus().await,
            SessionPhase::Preparing => {
                self.cancel_intention().await;
                None
            }
            phase => {
                log_debug!("Ignoring stop in {phase:?}");
                None
            }
        }
    }

    /// Summary -> Idle.
    pub async fn dismiss_summary(&self) -> bool {
        {
            let mut state = self.state.lock().await;
            if !state.dismiss() {
                return false;
            }
        }
        self.emit_state_changed().await;
        true
    }

    pub async fn set_tag(&self, tag: SessionTag) {
        {
            let mut state = self.state.lock().await;
            if state.selected_tag == tag {
                return;
            }
            state.selected_tag = tag;
        }
        self.emit_state_changed().await;
    }

    /// Picks the ambient sound. A running session switches to it right away.
    pub async fn set_sound(&self, sound: AmbientSound) {
        {
            let mut state = self.state.lock().await;
            if state.selected_sound == sound {
                return;
            }
            state.selected_sound = sound;
            // Sent under the lock so it cannot overtake the session's own play/stop.
            if state.phase == SessionPhase::Focusing {
                self.ambience.send(AmbientCall::for_sound(sound));
            }
        }
        log_debug!("Ambient sound set to {sound}");
        self.emit_state_changed().await;
    }

    pub async fn handle_lifecycle(&self, signal: LifecycleSignal) {
        let phase = self.phase().await;
        log_debug!("Lifecycle {signal} in {phase:?}");

        match signal {
            LifecycleSignal::Inactive => {
                if self.begin_focus(StartTrigger::Lock).await {
                    log_info!("Session started on inactive transition");
                }
            }
            LifecycleSignal::Background => {
                if self.begin_focus(StartTrigger::Lock).await {
                    log_info!("Session started on background fallback");
                }
            }
            LifecycleSignal::Active => {
                self.finish_focus().await;
                self.sync_pending().await;
            }
        }
    }

    /// One z-axis sample.
    pub async fn handle_motion(&self, z: f64) {
        if !z.is_finite() {
            return;
        }

        if self.phase().await == SessionPhase::Preparing {
            let threshold = self.settings.lock().await.flip_threshold();
            if crosses_flip_threshold(z, threshold) && self.begin_focus(StartTrigger::Flip).await {
                log_info!("Session started by flip (z={z:.2})");
            }
            return;
        }

        let edge = self.flip_detector.lock().await.observe(z);
        if let Some(orientation) = edge {
            log_debug!("Orientation changed: {orientation:?}");
            let _ = self.events.send(EngineEvent::Orientation { orientation });
        }
    }

    /// Only the start-session link is recognized, and only from Idle.
    pub async fn handle_deep_link(&self, url: &str) -> bool {
        if !is_start_session_link(url) {
            log_debug!("Ignoring unrecognized link {url}");
            return false;
        }
        log_info!("Start-session link received");
        self.start_intention().await
    }

    /// Moves sessions ended by the native surface into history.
    ///
    /// The queue is cleared only after every entry was appended; a crash in
    /// between replays the whole queue next time.
    pub async fn sync_pending(&self) -> usize {
        let mut cache = self.sessions.lock().await;

        let pending = match self.records.load_pending().await {
            Ok(pending) => pending,
            Err(err) => {
                log_error!("Failed to read pending sessions: {err:#}");
                return 0;
            }
        };
        if pending.is_empty() {
            return 0;
        }

        let mut appended = 0;
        for record in &pending {
            let session = FocusSession::ended_at(
                record.start_time,
                record.end_time,
                record.duration,
                SessionStatus::Completed,
                None,
            );
            match self.history.append(session).await {
                Ok(updated) => {
                    *cache = updated;
                    appended += 1;
                }
                Err(err) => {
                    log_error!(
                        "Failed to merge pending session {}/{}; queue left for retry: {err:#}",
                        appended + 1,
                        pending.len()
                    );
                    break;
                }
            }
        }

        let count = cache.len();
        if appended == pending.len() {
            if let Err(err) = self.records.clear_pending().await {
                log_error!("Failed to clear pending queue, entries will be merged again: {err:#}");
            }
            log_info!("Merged {appended} pending session(s)");
        }
        drop(cache);

        if appended > 0 {
            let _ = self.events.send(EngineEvent::HistoryUpdated { count });
        }
        appended
    }

    pub async fn update_settings(&self, patch: SettingsPatch) -> Result<AppSettings> {
        let settings = self.settings_store.update(patch).await?;
        *self.settings.lock().await = settings.clone();
        Ok(settings)
    }

    pub async fn delete_session(&self, id: &str) -> Result<()> {
        let count = {
            let mut cache = self.sessions.lock().await;
            *cache = self.history.delete(id).await?;
            cache.len()
        };
        let _ = self.events.send(EngineEvent::HistoryUpdated { count });
        Ok(())
    }

    pub async fn clear_history(&self) -> Result<()> {
        {
            let mut cache = self.sessions.lock().await;
            self.history.clear().await?;
            cache.clear();
        }
        let _ = self.events.send(EngineEvent::HistoryUpdated { count: 0 });
        Ok(())
    }

    pub async fn ticker_running(&self) -> bool {
        self.ticker
            .lock()
            .await
            .as_ref()
            .is_some_and(|ticker| !ticker.handle.is_finished())
    }

    /// Stops the display ticker. Persisted state is left as is, so a session
    /// still Focusing is recovered on the next start.
    pub async fn shutdown(&self) {
        self.cancel_ticker().await;
        self.ambience.send(AmbientCall::Stop);
        log_info!("Session engine shut down");
    }

    async fn begin_focus(&self, trigger: StartTrigger) -> bool {
        let now = self.clock.now_ms();

        let (tag, record_guard) = {
            let mut state = self.state.lock().await;
            if !state.begin_focus(now, trigger) {
                return false;
            }
            if !state.selected_sound.is_silent() {
                self.ambience.send(AmbientCall::Play(state.selected_sound));
            }
            (state.selected_tag, self.record_lock.clone().lock_owned().await)
        };

        // Requested before persisting; the host may suspend us any moment now.
        self.presence.send(IndicatorCall::Start(now));
        self.presence.send(IndicatorCall::DisableProximity);
        if trigger == StartTrigger::Flip {
            feedback::dispatch(&self.feedback, FeedbackCue::FlipDetected);
        }
        self.spawn_ticker(now).await;

        let record = ActiveSessionRecord {
            start_time: now,
            started_via: trigger,
            tag: Some(tag),
        };
        if let Err(err) = self.records.save_active(&record).await {
            log_error!("Session running without crash recovery: {err:#}");
        }
        drop(record_guard);

        self.emit_state_changed().await;
        true
    }

    async fn finish_focus(&self) -> Option<SessionSummary> {
        let end_ms = self.clock.now_ms();

        let (summary, record_guard) = {
            let mut state = self.state.lock().await;
            let summary = state.finish_focus(end_ms)?;
            if !state.selected_sound.is_silent() {
                self.ambience.send(AmbientCall::Stop);
            }
            (summary, self.record_lock.clone().lock_owned().await)
        };

        if let Err(err) = self.records.clear_active().await {
            log_error!("Failed to clear active session record: {err:#}");
        }
        drop(record_guard);

        self.cancel_ticker().await;
        self.presence.send(IndicatorCall::Stop);
        self.presence.send(IndicatorCall::DisableProximity);
        log_info!("Session ended after {}s", summary.duration_seconds);
        self.emit_state_changed().await;

        let recorded = self.record_finished(&summary, SessionStatus::Completed).await;
        Some(SessionSummary { recorded, ..summary })
    }

    async fn recover_session(&self, record: ActiveSessionRecord, end_ms: i64) {
        let (summary, record_guard) = {
            let mut state = self.state.lock().await;
            let Some(summary) = state.recover(&record, end_ms) else {
                log_warn!("Leftover active session found while {:?}; ignoring", state.phase);
                return;
            };
            (summary, self.record_lock.clone().lock_owned().await)
        };

        log_warn!(
            "Recovered interrupted session started at {}; closing after {}s",
            summary.start_time,
            summary.duration_seconds
        );

        if let Err(err) = self.records.clear_active().await {
            log_error!("Failed to clear recovered session record: {err:#}");
        }
        drop(record_guard);

        // The native indicator may have outlived the killed process.
        self.presence.send(IndicatorCall::Stop);
        self.emit_state_changed().await;

        self.record_finished(&summary, SessionStatus::Interrupted).await;
    }

    /// Appends the session to history when it is longer than the configured
    /// minimum. Returns whether it was recorded.
    async fn record_finished(&self, summary: &SessionSummary, status: SessionStatus) -> bool {
        // Re-read: the minimum may have been changed mid-session.
        let settings = self.refresh_settings().await;
        if summary.duration_seconds <= settings.min_session_seconds {
            log_info!(
                "Discarding {}s session (minimum is {}s)",
                summary.duration_seconds,
                settings.min_session_seconds
            );
            return false;
        }

        let session = FocusSession::ended_at(
            summary.start_time,
            summary.end_time,
            summary.duration_seconds,
            status,
            Some(summary.tag),
        );

        let count = {
            let mut cache = self.sessions.lock().await;
            match self.history.append(session.clone()).await {
                Ok(updated) => {
                    *cache = updated;
                    feedback::dispatch(&self.feedback, FeedbackCue::SessionRecorded);
                    cache.len()
                }
                Err(err) => {
                    log_error!("Failed to record session {}: {err:#}", session.id);
                    return false;
                }
            }
        };

        self.state
            .lock()
            .await
            .mark_recorded(summary.start_time, summary.end_time);

        let _ = self.events.send(EngineEvent::SessionCompleted { session });
        let _ = self.events.send(EngineEvent::HistoryUpdated { count });
        true
    }

    async fn refresh_settings(&self) -> AppSettings {
        match self.settings_store.load().await {
            Ok(settings) => {
                *self.settings.lock().await = settings.clone();
                settings
            }
            Err(err) => {
                log_warn!("Failed to reload settings, keeping cached values: {err:#}");
                self.settings.lock().await.clone()
            }
        }
    }

    async fn spawn_ticker(&self, start_ms: i64) {
        let mut ticker_guard = self.ticker.lock().await;
        if let Some(previous) = ticker_guard.take() {
            previous.stop();
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let state = self.state.clone();
        let events = self.events.clone();
        let clock = self.clock.clone();
        let tick_interval = self.config.tick_interval;
        let heartbeat_every = self.config.heartbeat_every_ticks.max(1);

        let handle = tokio::spawn(async move {
            let mut interval = time::interval(tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut ticks: u32 = 0;

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = token.cancelled() => break,
                }

                let elapsed = {
                    let mut guard = state.lock().await;
                    // A ticker that outlived its session must not touch the next one.
                    if token.is_cancelled()
                        || guard.phase != SessionPhase::Focusing
                        || guard.start_time != Some(start_ms)
                    {
                        break;
                    }
                    let elapsed = elapsed_seconds(start_ms, clock.now_ms());
                    guard.elapsed_seconds = elapsed;
                    elapsed
                };

                let _ = events.send(EngineEvent::Tick {
                    elapsed_seconds: elapsed,
                });

                ticks = ticks.wrapping_add(1);
                if ticks % heartbeat_every == 0 {
                    log_debug!("Focus heartbeat: {elapsed}s");
                }
            }
        });

        *ticker_guard = Some(Ticker { handle, cancel });
    }

    async fn cancel_ticker(&self) {
        if let Some(ticker) = self.ticker.lock().await.take() {
            ticker.stop();
        }
    }

    async fn emit_state_changed(&self) {
        let state = self.snapshot().await;
        let _ = self.events.send(EngineEvent::PhaseChanged { state });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        db::{
            repositories::{ACTIVE_SESSION_KEY, PENDING_COMPLETED_KEY, SESSIONS_KEY},
            MemoryStore, StoreOp,
        },
        models::PendingCompletedRecord,
        motion::Orientation,
        settings::SETTINGS_KEY,
    };
    use anyhow::bail;
    use std::sync::Mutex as StdMutex;

    const T: i64 = 1_700_000_000_000;

    #[derive(Default)]
    struct RecordingIndicator {
        calls: StdMutex<Vec<IndicatorCall>>,
        broken: bool,
        start_delay: Duration,
    }

    impl RecordingIndicator {
        fn broken() -> Self {
            Self {
                broken: true,
                ..Default::default()
            }
        }

        /// A native surface that takes a while to show the indicator.
        fn slow_start(delay: Duration) -> Self {
            Self {
                start_delay: delay,
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<IndicatorCall> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: IndicatorCall) -> Result<()> {
            self.calls.lock().unwrap().push(call);
            if self.broken {
                bail!("no live activity entitlement");
            }
            Ok(())
        }
    }

    impl PresenceIndicator for RecordingIndicator {
        fn start(&self, started_at_ms: i64) -> Result<()> {
            std::thread::sleep(self.start_delay);
            self.record(IndicatorCall::Start(started_at_ms))
        }

        fn stop(&self) -> Result<()> {
            self.record(IndicatorCall::Stop)
        }
    }

    #[derive(Default)]
    struct CountingFeedback {
        flips: StdMutex<usize>,
        recorded: StdMutex<usize>,
    }

    impl SessionFeedback for CountingFeedback {
        fn flip_detected(&self) -> Result<()> {
            *self.flips.lock().unwrap() += 1;
            Ok(())
        }

        fn session_recorded(&self) -> Result<()> {
            *self.recorded.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingAmbience {
        calls: StdMutex<Vec<AmbientCall>>,
    }

    impl RecordingAmbience {
        fn calls(&self) -> Vec<AmbientCall> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl AmbientPlayer for RecordingAmbience {
        fn play(&self, sound: AmbientSound) -> Result<()> {
            self.calls.lock().unwrap().push(AmbientCall::Play(sound));
            Ok(())
        }

        fn stop(&self) -> Result<()> {
            self.calls.lock().unwrap().push(AmbientCall::Stop);
            Ok(())
        }
    }

    struct Harness {
        engine: SessionEngine<MemoryStore>,
        store: MemoryStore,
        clock: Arc<ManualClock>,
        indicator: Arc<RecordingIndicator>,
        ambience: Arc<RecordingAmbience>,
        feedback: Arc<CountingFeedback>,
    }

    fn harness_with(store: MemoryStore, indicator: RecordingIndicator) -> Harness {
        let clock = Arc::new(ManualClock::new(T));
        let indicator = Arc::new(indicator);
        let ambience = Arc::new(RecordingAmbience::default());
        let feedback = Arc::new(CountingFeedback::default());
        let engine = SessionEngine::new(store.clone(), EngineConfig::default())
            .with_clock(clock.clone())
            .with_indicator(indicator.clone())
            .with_ambience(ambience.clone())
            .with_feedback(feedback.clone());
        Harness {
            engine,
            store,
            clock,
            indicator,
            ambience,
            feedback,
        }
    }

    fn harness() -> Harness {
        harness_with(MemoryStore::new(), RecordingIndicator::default())
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    async fn focusing(h: &Harness) {
        assert!(h.engine.start_intention().await);
        h.engine.handle_lifecycle(LifecycleSignal::Inactive).await;
        assert_eq!(h.engine.phase().await, SessionPhase::Focusing);
    }

    #[tokio::test]
    async fn lock_then_unlock_records_completed_session() {
        let h = harness();
        focusing(&h).await;

        let stored: ActiveSessionRecord =
            serde_json::from_str(&h.store.raw(ACTIVE_SESSION_KEY).await.unwrap()).unwrap();
        assert_eq!(stored.start_time, T);
        assert_eq!(stored.started_via, StartTrigger::Lock);

        h.clock.advance_ms(125_000);
        h.engine.handle_lifecycle(LifecycleSignal::Active).await;

        let state = h.engine.snapshot().await;
        assert_eq!(state.phase, SessionPhase::Summary);
        let summary = state.summary.unwrap();
        assert_eq!(summary.duration_seconds, 125);
        assert!(summary.recorded);
        assert!(!summary.recovered);

        assert_eq!(h.store.raw(ACTIVE_SESSION_KEY).await, None);
        let history = h.engine.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].duration, 125);
        assert_eq!(history[0].status, SessionStatus::Completed);
        assert_eq!(history[0].id, (T + 125_000).to_string());
        assert_eq!(history[0].tag, Some(SessionTag::Work));

        eventually(|| *h.feedback.recorded.lock().unwrap() == 1).await;
        eventually(|| h.indicator.calls().len() == 2).await;
        let calls = h.indicator.calls();
        assert!(calls.contains(&IndicatorCall::Start(T)));
        assert!(calls.contains(&IndicatorCall::Stop));
    }

    #[tokio::test]
    async fn indicator_calls_keep_their_order() {
        let h = harness_with(
            MemoryStore::new(),
            RecordingIndicator::slow_start(Duration::from_millis(50)),
        );
        focusing(&h).await;
        h.clock.advance_ms(10_000);
        h.engine.handle_lifecycle(LifecycleSignal::Active).await;

        eventually(|| h.indicator.calls().len() == 2).await;
        assert_eq!(
            h.indicator.calls(),
            vec![IndicatorCall::Start(T), IndicatorCall::Stop]
        );
    }

    #[tokio::test]
    async fn inactive_then_background_starts_once() {
        let h = harness();
        h.engine.start_intention().await;

        h.engine.handle_lifecycle(LifecycleSignal::Inactive).await;
        h.clock.advance_ms(300);
        h.engine.handle_lifecycle(LifecycleSignal::Background).await;

        assert_eq!(h.store.write_count(StoreOp::Set, ACTIVE_SESSION_KEY), 1);
        let state = h.engine.snapshot().await;
        assert_eq!(state.phase, SessionPhase::Focusing);
        assert_eq!(state.start_time, Some(T));
    }

    #[tokio::test]
    async fn signal_during_slow_persist_does_not_double_start() {
        let store = MemoryStore::new();
        store.set_latency(Duration::from_millis(40));
        let h = harness_with(store, RecordingIndicator::default());
        h.engine.start_intention().await;

        let mut events = h.engine.subscribe();
        tokio::join!(
            h.engine.handle_lifecycle(LifecycleSignal::Inactive),
            h.engine.handle_lifecycle(LifecycleSignal::Background),
            h.engine.handle_motion(0.99),
        );

        assert_eq!(h.store.write_count(StoreOp::Set, ACTIVE_SESSION_KEY), 1);
        let mut focusing_transitions = 0;
        while let Ok(event) = events.try_recv() {
            if let EngineEvent::PhaseChanged { state } = event {
                if state.phase == SessionPhase::Focusing {
                    focusing_transitions += 1;
                }
            }
        }
        assert_eq!(focusing_transitions, 1);
        eventually(|| {
            h.indicator
                .calls()
                .iter()
                .filter(|call| matches!(call, IndicatorCall::Start(_)))
                .count()
                == 1
        })
        .await;
    }

    #[tokio::test]
    async fn flip_starts_preparing_session() {
        let h = harness();
        h.engine.start_intention().await;

        h.engine.handle_motion(0.5).await;
        assert_eq!(h.engine.phase().await, SessionPhase::Preparing);

        h.engine.handle_motion(0.93).await;
        let state = h.engine.snapshot().await;
        assert_eq!(state.phase, SessionPhase::Focusing);
        assert_eq!(state.started_via, Some(StartTrigger::Flip));

        // Lock after flip is the losing side of the race.
        h.engine.handle_lifecycle(LifecycleSignal::Inactive).await;
        assert_eq!(h.store.write_count(StoreOp::Set, ACTIVE_SESSION_KEY), 1);
        eventually(|| *h.feedback.flips.lock().unwrap() == 1).await;
    }

    #[tokio::test]
    async fn flip_respects_stored_sensitivity() {
        let h = harness();
        h.store
            .put_raw(SETTINGS_KEY, r#"{"flip_sensitivity":0.95}"#)
            .await;
        h.engine.start_intention().await;

        h.engine.handle_motion(0.93).await;
        assert_eq!(h.engine.phase().await, SessionPhase::Preparing);
        h.engine.handle_motion(0.96).await;
        assert_eq!(h.engine.phase().await, SessionPhase::Focusing);
    }

    #[tokio::test]
    async fn session_at_threshold_is_discarded() {
        let h = harness();
        focusing(&h).await;
        h.clock.advance_ms(5_999);
        let summary = h.engine.stop_session().await.unwrap();

        assert_eq!(summary.duration_seconds, 5);
        assert!(!summary.recorded);
        assert!(h.engine.history().await.is_empty());
        assert_eq!(h.store.raw(SESSIONS_KEY).await, None);
        assert_eq!(h.store.raw(ACTIVE_SESSION_KEY).await, None);
        assert_eq!(*h.feedback.recorded.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn session_above_threshold_is_kept() {
        let h = harness();
        focusing(&h).await;
        h.clock.advance_ms(6_000);
        let summary = h.engine.stop_session().await.unwrap();

        assert_eq!(summary.duration_seconds, 6);
        assert!(summary.recorded);
        assert_eq!(h.engine.history().await.len(), 1);
    }

    #[tokio::test]
    async fn threshold_is_read_when_session_ends() {
        let h = harness();
        h.engine.initialize().await;
        focusing(&h).await;

        h.store
            .put_raw(SETTINGS_KEY, r#"{"min_session_seconds":600}"#)
            .await;
        h.clock.advance_ms(300_000);
        let summary = h.engine.stop_session().await.unwrap();

        assert!(!summary.recorded);
        assert!(h.engine.history().await.is_empty());
    }

    #[tokio::test]
    async fn recovers_session_left_by_killed_process() {
        let h = harness();
        h.store
            .put_raw(
                ACTIVE_SESSION_KEY,
                format!(r#"{{"start_time":{T},"started_via":"lock"}}"#),
            )
            .await;
        h.clock.set(T + 60_000);

        h.engine.initialize().await;

        let state = h.engine.snapshot().await;
        assert_eq!(state.phase, SessionPhase::Summary);
        let summary = state.summary.unwrap();
        assert!(summary.recovered);
        assert!(summary.recorded);
        assert_eq!(summary.duration_seconds, 60);

        let history = h.engine.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].duration, 60);
        assert_eq!(history[0].status, SessionStatus::Interrupted);
        assert_eq!(h.store.raw(ACTIVE_SESSION_KEY).await, None);
        eventually(|| h.indicator.calls() == vec![IndicatorCall::Stop]).await;

        assert!(h.engine.dismiss_summary().await);
        assert_eq!(h.engine.phase().await, SessionPhase::Idle);
    }

    #[tokio::test]
    async fn initialize_runs_once() {
        let h = harness();
        h.store
            .put_raw(
                ACTIVE_SESSION_KEY,
                format!(r#"{{"start_time":{T},"started_via":"manual"}}"#),
            )
            .await;
        h.clock.set(T + 60_000);

        h.engine.initialize().await;
        h.engine.dismiss_summary().await;
        h.engine.initialize().await;

        assert_eq!(h.engine.phase().await, SessionPhase::Idle);
        assert_eq!(h.engine.history().await.len(), 1);
    }

    #[tokio::test]
    async fn pending_queue_is_merged_and_cleared() {
        let h = harness();
        h.engine
            .session_records()
            .push_pending(PendingCompletedRecord {
                start_time: 0,
                end_time: 100,
                duration: 100,
            })
            .await
            .unwrap();

        h.engine.initialize().await;

        let history = h.engine.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, "100");
        assert_eq!(history[0].status, SessionStatus::Completed);
        assert_eq!(history[0].tag, None);
        assert_eq!(h.store.raw(PENDING_COMPLETED_KEY).await, None);

        // Empty queue is a no-op.
        assert_eq!(h.engine.sync_pending().await, 0);
        assert_eq!(h.engine.history().await.len(), 1);
    }

    #[tokio::test]
    async fn pending_short_sessions_skip_threshold() {
        let h = harness();
        h.store
            .put_raw(
                PENDING_COMPLETED_KEY,
                r#"[{"start_time":0,"end_time":2000,"duration":2}]"#,
            )
            .await;

        assert_eq!(h.engine.sync_pending().await, 1);
        assert_eq!(h.engine.history().await[0].duration, 2);
    }

    #[tokio::test]
    async fn pending_entry_with_fractional_times_is_merged() {
        let h = harness();
        h.store
            .put_raw(
                PENDING_COMPLETED_KEY,
                r#"[{"start_time":1700000000000.5,"end_time":1700000100000.25,"duration":100}]"#,
            )
            .await;

        assert_eq!(h.engine.sync_pending().await, 1);
        let history = h.engine.history().await;
        assert_eq!(history[0].duration, 100);
        assert_eq!(history[0].id, "1700000100000");
        assert_eq!(h.store.raw(PENDING_COMPLETED_KEY).await, None);
    }

    #[tokio::test]
    async fn pending_drain_replays_after_failed_clear() {
        let h = harness();
        h.store
            .put_raw(
                PENDING_COMPLETED_KEY,
                r#"[{"start_time":0,"end_time":100,"duration":100}]"#,
            )
            .await;
        h.store.fail(StoreOp::Remove, PENDING_COMPLETED_KEY);

        assert_eq!(h.engine.sync_pending().await, 1);
        assert!(h.store.raw(PENDING_COMPLETED_KEY).await.is_some());

        h.store.heal(StoreOp::Remove, PENDING_COMPLETED_KEY);
        assert_eq!(h.engine.sync_pending().await, 1);
        assert_eq!(h.store.raw(PENDING_COMPLETED_KEY).await, None);

        let history = h.engine.history().await;
        assert!(history.iter().all(|session| session.id == "100"));
        assert_eq!(history.len(), 2);
        assert_eq!(h.engine.sync_pending().await, 0);
    }

    #[tokio::test]
    async fn pending_queue_kept_when_append_fails() {
        let h = harness();
        h.store
            .put_raw(
                PENDING_COMPLETED_KEY,
                r#"[{"start_time":0,"end_time":100,"duration":100}]"#,
            )
            .await;
        h.store.fail(StoreOp::Set, SESSIONS_KEY);

        assert_eq!(h.engine.sync_pending().await, 0);
        assert!(h.store.raw(PENDING_COMPLETED_KEY).await.is_some());

        h.store.heal(StoreOp::Set, SESSIONS_KEY);
        assert_eq!(h.engine.sync_pending().await, 1);
        assert_eq!(h.engine.history().await.len(), 1);
    }

    #[tokio::test]
    async fn foreground_return_drains_pending_queue() {
        let h = harness();
        h.engine.initialize().await;
        h.store
            .put_raw(
                PENDING_COMPLETED_KEY,
                r#"[{"start_time":0,"end_time":100,"duration":100}]"#,
            )
            .await;

        h.engine.handle_lifecycle(LifecycleSignal::Active).await;
        assert_eq!(h.engine.phase().await, SessionPhase::Idle);
        assert_eq!(h.engine.history().await.len(), 1);
    }

    #[tokio::test]
    async fn deep_link_only_starts_from_idle() {
        let h = harness();
        assert!(!h.engine.handle_deep_link("flipfocus://stats").await);
        assert_eq!(h.engine.phase().await, SessionPhase::Idle);

        assert!(h.engine.handle_deep_link("flipfocus://start-session").await);
        assert_eq!(h.engine.phase().await, SessionPhase::Preparing);
        assert!(!h.engine.handle_deep_link("flipfocus://start-session").await);

        h.engine.handle_lifecycle(LifecycleSignal::Inactive).await;
        let writes = h.store.write_count(StoreOp::Set, ACTIVE_SESSION_KEY);
        let before = h.engine.snapshot().await;

        assert!(!h.engine.handle_deep_link("flipfocus://start-session").await);
        assert_eq!(h.engine.snapshot().await, before);
        assert_eq!(h.store.write_count(StoreOp::Set, ACTIVE_SESSION_KEY), writes);
        assert_eq!(h.store.write_count(StoreOp::Set, SESSIONS_KEY), 0);
    }

    #[tokio::test]
    async fn motion_outside_preparing_uses_hysteresis() {
        let h = harness();
        let mut events = h.engine.subscribe();

        for z in [0.95, 0.85, 0.95] {
            h.engine.handle_motion(z).await;
        }
        h.engine.handle_motion(f64::NAN).await;

        let mut edges = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let EngineEvent::Orientation { orientation } = event {
                edges.push(orientation);
            }
        }
        assert_eq!(edges, vec![Orientation::FaceDown]);
        assert_eq!(h.engine.phase().await, SessionPhase::Idle);
    }

    #[tokio::test]
    async fn storage_failures_do_not_block_transitions() {
        let store = MemoryStore::new();
        store.fail(StoreOp::Set, ACTIVE_SESSION_KEY);
        store.fail(StoreOp::Remove, ACTIVE_SESSION_KEY);
        store.fail(StoreOp::Get, SETTINGS_KEY);
        let h = harness_with(store, RecordingIndicator::broken());

        focusing(&h).await;
        h.clock.advance_ms(30_000);
        let summary = h.engine.stop_session().await.unwrap();

        assert_eq!(summary.duration_seconds, 30);
        assert!(summary.recorded);
        assert_eq!(h.engine.phase().await, SessionPhase::Summary);
        eventually(|| h.indicator.calls().len() == 2).await;
    }

    #[tokio::test]
    async fn history_write_failure_leaves_summary_unrecorded() {
        let store = MemoryStore::new();
        store.fail(StoreOp::Set, SESSIONS_KEY);
        let h = harness_with(store, RecordingIndicator::default());

        focusing(&h).await;
        h.clock.advance_ms(30_000);
        h.engine.handle_lifecycle(LifecycleSignal::Active).await;

        let state = h.engine.snapshot().await;
        assert_eq!(state.phase, SessionPhase::Summary);
        assert!(!state.summary.unwrap().recorded);
        assert!(h.engine.history().await.is_empty());

        // No "recorded" cue for a session that never made it into history.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*h.feedback.recorded.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn stop_while_preparing_cancels() {
        let h = harness();
        h.engine.start_intention().await;
        assert_eq!(h.engine.stop_session().await, None);
        assert_eq!(h.engine.phase().await, SessionPhase::Idle);
        assert_eq!(h.store.write_count(StoreOp::Set, ACTIVE_SESSION_KEY), 0);
    }

    #[tokio::test]
    async fn cancel_and_dismiss_are_phase_guarded() {
        let h = harness();
        assert!(!h.engine.cancel_intention().await);
        assert!(!h.engine.dismiss_summary().await);

        h.engine.start_intention().await;
        assert!(!h.engine.start_intention().await);
        assert!(h.engine.cancel_intention().await);

        h.engine.handle_lifecycle(LifecycleSignal::Inactive).await;
        assert_eq!(h.engine.phase().await, SessionPhase::Idle);
    }

    #[tokio::test]
    async fn tag_selected_before_end_is_recorded() {
        let h = harness();
        focusing(&h).await;
        let stored: ActiveSessionRecord =
            serde_json::from_str(&h.store.raw(ACTIVE_SESSION_KEY).await.unwrap()).unwrap();
        assert_eq!(stored.tag, Some(SessionTag::Work));

        h.engine.set_tag(SessionTag::Creative).await;
        h.clock.advance_ms(90_000);
        h.engine.handle_lifecycle(LifecycleSignal::Active).await;

        assert_eq!(h.engine.history().await[0].tag, Some(SessionTag::Creative));
    }

    #[tokio::test]
    async fn ambient_sound_loops_only_while_focusing() {
        let h = harness();
        h.engine.set_sound(AmbientSound::Rain).await;
        assert_eq!(h.engine.snapshot().await.selected_sound, AmbientSound::Rain);

        focusing(&h).await;
        h.engine.set_sound(AmbientSound::Lofi).await;
        h.clock.advance_ms(60_000);
        h.engine.handle_lifecycle(LifecycleSignal::Active).await;

        eventually(|| h.ambience.calls().len() == 3).await;
        assert_eq!(
            h.ambience.calls(),
            vec![
                AmbientCall::Play(AmbientSound::Rain),
                AmbientCall::Play(AmbientSound::Lofi),
                AmbientCall::Stop,
            ]
        );
        // The choice carries over to the next session.
        assert_eq!(h.engine.snapshot().await.selected_sound, AmbientSound::Lofi);
    }

    #[tokio::test]
    async fn silencing_mid_session_stops_playback_once() {
        let h = harness();
        h.engine.set_sound(AmbientSound::BrownNoise).await;
        focusing(&h).await;
        h.engine.set_sound(AmbientSound::None).await;
        h.clock.advance_ms(30_000);
        h.engine.stop_session().await;
        h.engine.dismiss_summary().await;

        // A session with no sound selected never reaches the player.
        focusing(&h).await;
        h.engine.stop_session().await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            h.ambience.calls(),
            vec![AmbientCall::Play(AmbientSound::BrownNoise), AmbientCall::Stop]
        );
    }

    #[tokio::test]
    async fn delete_and_clear_history() {
        let h = harness();
        for _ in 0..2 {
            focusing(&h).await;
            h.clock.advance_ms(60_000);
            h.engine.stop_session().await;
            h.engine.dismiss_summary().await;
        }
        let history = h.engine.history().await;
        assert_eq!(history.len(), 2);

        h.engine.delete_session(&history[0].id).await.unwrap();
        assert_eq!(h.engine.history().await.len(), 1);

        h.engine.clear_history().await.unwrap();
        assert!(h.engine.history().await.is_empty());
        assert_eq!(h.store.raw(SESSIONS_KEY).await, None);
    }

    #[tokio::test]
    async fn settings_update_refreshes_cache() {
        let h = harness();
        let updated = h
            .engine
            .update_settings(SettingsPatch {
                min_session_seconds: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(updated.min_session_seconds, 1);
        assert_eq!(h.engine.settings().await.min_session_seconds, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_runs_only_while_focusing() {
        let h = harness();
        let mut events = h.engine.subscribe();
        focusing(&h).await;
        assert!(h.engine.ticker_running().await);

        h.clock.advance_ms(3_000);
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(h.engine.snapshot().await.elapsed_seconds, 3);

        let mut ticks = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, EngineEvent::Tick { .. }) {
                ticks += 1;
            }
        }
        assert!(ticks >= 3);

        h.engine.stop_session().await;
        assert!(!h.engine.ticker_running().await);

        tokio::time::sleep(Duration::from_secs(5)).await;
        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, EngineEvent::Tick { .. }));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_ticker() {
        let h = harness();
        focusing(&h).await;
        h.engine.shutdown().await;
        assert!(!h.engine.ticker_running().await);
        // The session itself is still live for recovery on next start.
        assert_eq!(h.engine.phase().await, SessionPhase::Focusing);
        assert!(h.store.raw(ACTIVE_SESSION_KEY).await.is_some());
    }
}
