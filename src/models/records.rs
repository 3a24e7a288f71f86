//! Durable records shared with out-of-process actors.
//!
//! These are stored as JSON with snake_case keys because the native
//! companion surface reads and writes the same payloads.

use std::fmt;

use serde::{de::Error as _, Deserialize, Deserializer, Serialize};

use super::SessionTag;

/// What moved the session from Preparing to Focusing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StartTrigger {
    Flip,
    Manual,
    Lock,
}

impl StartTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            StartTrigger::Flip => "flip",
            StartTrigger::Manual => "manual",
            StartTrigger::Lock => "lock",
        }
    }
}

impl fmt::Display for StartTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Marker for "a session was running". At most one exists at a time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActiveSessionRecord {
    pub start_time: i64,
    pub started_via: StartTrigger,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<SessionTag>,
}

/// A session the native surface ended on its own, waiting to be merged into history.
///
/// The native side writes plain JS numbers, so fractional values are accepted
/// and floored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingCompletedRecord {
    #[serde(deserialize_with = "floor_millis")]
    pub start_time: i64,
    #[serde(deserialize_with = "floor_millis")]
    pub end_time: i64,
    #[serde(deserialize_with = "floor_seconds")]
    pub duration: u64,
}

fn floored(number: &serde_json::Number) -> Option<f64> {
    number
        .as_f64()
        .filter(|value| value.is_finite())
        .map(f64::floor)
}

fn floor_millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let number = serde_json::Number::deserialize(deserializer)?;
    if let Some(value) = number.as_i64() {
        return Ok(value);
    }
    match floored(&number) {
        Some(value) if value >= i64::MIN as f64 && value <= i64::MAX as f64 => Ok(value as i64),
        _ => Err(D::Error::custom(format!("timestamp out of range: {number}"))),
    }
}

fn floor_seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let number = serde_json::Number::deserialize(deserializer)?;
    if let Some(value) = number.as_u64() {
        return Ok(value);
    }
    match floored(&number) {
        Some(value) if value >= 0.0 && value <= u64::MAX as f64 => Ok(value as u64),
        _ => Err(D::Error::custom(format!("duration out of range: {number}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_record_matches_native_payload() {
        let record = ActiveSessionRecord {
            start_time: 1_700_000_000_000,
            started_via: StartTrigger::Lock,
            tag: None,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"start_time":1700000000000,"started_via":"lock"}"#);
    }

    #[test]
    fn active_record_keeps_tag_when_present() {
        let raw = r#"{"start_time":10,"started_via":"flip","tag":"creative"}"#;
        let record: ActiveSessionRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.started_via, StartTrigger::Flip);
        assert_eq!(record.tag, Some(SessionTag::Creative));
    }

    #[test]
    fn pending_record_parses_native_queue() {
        let raw = r#"[{"start_time":0,"end_time":100,"duration":100}]"#;
        let queue: Vec<PendingCompletedRecord> = serde_json::from_str(raw).unwrap();
        assert_eq!(
            queue,
            vec![PendingCompletedRecord {
                start_time: 0,
                end_time: 100,
                duration: 100
            }]
        );
    }

    #[test]
    fn pending_record_floors_fractional_numbers() {
        let raw = r#"{"start_time":1700000000000.5,"end_time":1700000100000.25,"duration":100.9}"#;
        let record: PendingCompletedRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(
            record,
            PendingCompletedRecord {
                start_time: 1_700_000_000_000,
                end_time: 1_700_000_100_000,
                duration: 100,
            }
        );
    }

    #[test]
    fn pending_record_rejects_negative_duration_and_strings() {
        let negative = r#"{"start_time":0,"end_time":100,"duration":-1}"#;
        assert!(serde_json::from_str::<PendingCompletedRecord>(negative).is_err());
        let text = r#"{"start_time":"0","end_time":100,"duration":1}"#;
        assert!(serde_json::from_str::<PendingCompletedRecord>(text).is_err());
    }
}
