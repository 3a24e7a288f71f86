//! Out-of-process session indicator (lock-screen widget, menu-bar island, ...).
//!
//! The engine only ever calls this through a [`PresenceChannel`], which runs
//! the calls on one dedicated thread in the order they were sent and logs the
//! outcome. Nothing here can stall or fail a state transition.

use std::sync::Arc;

use anyhow::Result;

const ENABLE_LOGS: bool = true;

use crate::utils::serial::SerialWorker;
use crate::{log_debug, log_warn};

pub trait PresenceIndicator: Send + Sync + 'static {
    /// Shows the indicator counting up from `started_at_ms`.
    fn start(&self, started_at_ms: i64) -> Result<()>;

    fn stop(&self) -> Result<()>;

    /// Screen-dim while the device lies face down.
    fn enable_proximity(&self) -> Result<()> {
        Ok(())
    }

    fn disable_proximity(&self) -> Result<()> {
        Ok(())
    }
}

/// Fallback used when no native surface is linked into the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnlinkedIndicator;

impl PresenceIndicator for UnlinkedIndicator {
    fn start(&self, started_at_ms: i64) -> Result<()> {
        log_warn!("Presence indicator not linked; skipping start at {started_at_ms}");
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        log_debug!("Presence indicator not linked; skipping stop");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorCall {
    Start(i64),
    Stop,
    EnableProximity,
    DisableProximity,
}

impl IndicatorCall {
    fn name(&self) -> &'static str {
        match self {
            IndicatorCall::Start(_) => "start",
            IndicatorCall::Stop => "stop",
            IndicatorCall::EnableProximity => "enable_proximity",
            IndicatorCall::DisableProximity => "disable_proximity",
        }
    }

    fn apply(self, indicator: &dyn PresenceIndicator) {
        let result = match self {
            IndicatorCall::Start(started_at_ms) => indicator.start(started_at_ms),
            IndicatorCall::Stop => indicator.stop(),
            IndicatorCall::EnableProximity => indicator.enable_proximity(),
            IndicatorCall::DisableProximity => indicator.disable_proximity(),
        };
        if let Err(err) = result {
            log_warn!("Presence indicator {} failed: {err:#}", self.name());
        }
    }
}

/// Fire-and-forget, in order. A slow `start` delays the `stop` behind it
/// instead of racing it.
pub struct PresenceChannel {
    worker: SerialWorker<IndicatorCall>,
}

impl PresenceChannel {
    pub fn new(indicator: Arc<dyn PresenceIndicator>) -> Self {
        let worker = SerialWorker::spawn("flipfocus-presence", move |call: IndicatorCall| {
            call.apply(indicator.as_ref())
        });
        Self { worker }
    }

    pub fn send(&self, call: IndicatorCall) {
        self.worker.send(call);
    }
}
