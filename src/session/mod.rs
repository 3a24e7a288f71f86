pub mod engine;
pub mod events;
pub mod state;

pub use engine::{EngineConfig, SessionEngine};
pub use events::EngineEvent;
pub use state::{SessionPhase, SessionState, SessionSummary};
