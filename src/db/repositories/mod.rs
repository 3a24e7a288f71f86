mod history;
mod session_records;

pub use history::{HistoryStore, SESSIONS_KEY};
pub use session_records::{SessionRecordStore, ACTIVE_SESSION_KEY, PENDING_COMPLETED_KEY};
