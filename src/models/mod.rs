pub mod records;
pub mod session;
pub mod sound;

pub use records::{ActiveSessionRecord, PendingCompletedRecord, StartTrigger};
pub use session::{session_id_for, FocusSession, SessionStatus, SessionTag};
pub use sound::AmbientSound;
