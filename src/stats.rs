//! Focus statistics derived from session history.
//!
//! All day boundaries are local to the timezone of the `now` passed in.
//! History may hold the same session twice (see the pending queue), so every
//! aggregate counts each id once.

use std::collections::HashSet;

use chrono::{DateTime, Days, NaiveDate, TimeZone};
use serde::Serialize;

use crate::models::FocusSession;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DailyFocus {
    pub date: NaiveDate,
    /// Weekday abbreviation, e.g. "Mon".
    pub label: String,
    pub minutes: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FocusStats {
    pub today_sessions: usize,
    pub today_seconds: u64,
    pub total_sessions: usize,
    pub total_seconds: u64,
    pub longest_session_seconds: u64,
    /// Consecutive days with at least one session, ending today or yesterday.
    pub streak_days: u32,
    /// Oldest first, today last.
    pub last_seven_days: Vec<DailyFocus>,
    /// Today's minutes over the daily goal, capped at 1.
    pub goal_progress: f64,
}

impl FocusStats {
    pub fn from_sessions<Tz: TimeZone>(
        sessions: &[FocusSession],
        now: &DateTime<Tz>,
        daily_goal_minutes: u32,
    ) -> Self {
        let tz = now.timezone();
        let today = now.date_naive();
        let sessions = unique_sessions(sessions);

        let today_list: Vec<&FocusSession> = sessions
            .iter()
            .copied()
            .filter(|session| local_date(&tz, session.start_time) == Some(today))
            .collect();
        let today_seconds = total_seconds(&today_list);

        let goal_progress = if daily_goal_minutes == 0 {
            0.0
        } else {
            (today_seconds as f64 / 60.0 / f64::from(daily_goal_minutes)).min(1.0)
        };

        Self {
            today_sessions: today_list.len(),
            today_seconds,
            total_sessions: sessions.len(),
            total_seconds: total_seconds(&sessions),
            longest_session_seconds: sessions
                .iter()
                .map(|session| session.duration)
                .max()
                .unwrap_or(0),
            streak_days: streak(&sessions, &tz, today),
            last_seven_days: last_seven_days(&sessions, &tz, today),
            goal_progress,
        }
    }
}

/// First occurrence of each id, in history order.
pub fn unique_sessions(sessions: &[FocusSession]) -> Vec<&FocusSession> {
    let mut seen = HashSet::new();
    sessions
        .iter()
        .filter(|session| seen.insert(session.id.as_str()))
        .collect()
}

/// Sessions bucketed by the local date they started on, most recent day first
/// when the input is newest first.
pub fn group_by_date<'a, Tz: TimeZone>(
    sessions: &'a [FocusSession],
    tz: &Tz,
) -> Vec<(NaiveDate, Vec<&'a FocusSession>)> {
    let mut groups: Vec<(NaiveDate, Vec<&FocusSession>)> = Vec::new();
    for session in unique_sessions(sessions) {
        let Some(date) = local_date(tz, session.start_time) else {
            continue;
        };
        match groups.iter_mut().find(|(day, _)| *day == date) {
            Some((_, bucket)) => bucket.push(session),
            None => groups.push((date, vec![session])),
        }
    }
    groups
}

/// "1h 25m", "45m 3s" or "30s".
pub fn format_duration(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// "01:02:03" past an hour, "2:05" below.
pub fn format_timer(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

fn local_date<Tz: TimeZone>(tz: &Tz, timestamp_ms: i64) -> Option<NaiveDate> {
    tz.timestamp_millis_opt(timestamp_ms)
        .earliest()
        .map(|moment| moment.date_naive())
}

fn total_seconds(sessions: &[&FocusSession]) -> u64 {
    sessions.iter().map(|session| session.duration).sum()
}

fn streak<Tz: TimeZone>(sessions: &[&FocusSession], tz: &Tz, today: NaiveDate) -> u32 {
    let days: HashSet<NaiveDate> = sessions
        .iter()
        .filter_map(|session| local_date(tz, session.start_time))
        .collect();

    // A streak stays alive until the end of the day after its last session.
    let mut day = match today.pred_opt() {
        _ if days.contains(&today) => today,
        Some(yesterday) if days.contains(&yesterday) => yesterday,
        _ => return 0,
    };

    let mut count = 0;
    while days.contains(&day) {
        count += 1;
        match day.pred_opt() {
            Some(previous) => day = previous,
            None => break,
        }
    }
    count
}

fn last_seven_days<Tz: TimeZone>(
    sessions: &[&FocusSession],
    tz: &Tz,
    today: NaiveDate,
) -> Vec<DailyFocus> {
    (0..7u64)
        .rev()
        .filter_map(|offset| today.checked_sub_days(Days::new(offset)))
        .map(|date| {
            let seconds: u64 = sessions
                .iter()
                .filter(|session| local_date(tz, session.start_time) == Some(date))
                .map(|session| session.duration)
                .sum();
            DailyFocus {
                date,
                label: date.format("%a").to_string(),
                minutes: (seconds + 30) / 60,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SessionStatus, SessionTag};
    use chrono::{FixedOffset, Utc};

    const DAY_MS: i64 = 86_400_000;

    fn now() -> DateTime<Utc> {
        // Wednesday 2024-01-10 12:00 UTC
        Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap()
    }

    fn session(start_ms: i64, duration: u64) -> FocusSession {
        FocusSession::ended_at(
            start_ms,
            start_ms + duration as i64 * 1000,
            duration,
            SessionStatus::Completed,
            Some(SessionTag::Work),
        )
    }

    fn days_ago(days: i64) -> i64 {
        now().timestamp_millis() - days * DAY_MS
    }

    #[test]
    fn empty_history() {
        let stats = FocusStats::from_sessions(&[], &now(), 120);
        assert_eq!(stats.today_sessions, 0);
        assert_eq!(stats.total_seconds, 0);
        assert_eq!(stats.longest_session_seconds, 0);
        assert_eq!(stats.streak_days, 0);
        assert_eq!(stats.last_seven_days.len(), 7);
        assert_eq!(stats.goal_progress, 0.0);
    }

    #[test]
    fn duplicates_count_once() {
        let original = session(days_ago(0), 1_500);
        let sessions = vec![original.clone(), original, session(days_ago(1), 600)];

        let stats = FocusStats::from_sessions(&sessions, &now(), 120);
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(stats.today_sessions, 1);
        assert_eq!(stats.today_seconds, 1_500);
        assert_eq!(stats.total_seconds, 2_100);
        assert_eq!(stats.longest_session_seconds, 1_500);
    }

    #[test]
    fn goal_progress_is_capped() {
        let sessions = vec![session(days_ago(0), 3_600)];
        let stats = FocusStats::from_sessions(&sessions, &now(), 120);
        assert_eq!(stats.goal_progress, 0.5);

        let stats = FocusStats::from_sessions(&sessions, &now(), 30);
        assert_eq!(stats.goal_progress, 1.0);

        let stats = FocusStats::from_sessions(&sessions, &now(), 0);
        assert_eq!(stats.goal_progress, 0.0);
    }

    #[test]
    fn streak_may_end_yesterday() {
        let sessions = vec![
            session(days_ago(1), 60),
            session(days_ago(2), 60),
            session(days_ago(2), 90),
            session(days_ago(4), 60),
        ];
        assert_eq!(FocusStats::from_sessions(&sessions, &now(), 120).streak_days, 2);

        let mut with_today = sessions.clone();
        with_today.insert(0, session(days_ago(0), 60));
        assert_eq!(FocusStats::from_sessions(&with_today, &now(), 120).streak_days, 3);
    }

    #[test]
    fn streak_broken_after_a_gap() {
        let sessions = vec![session(days_ago(2), 60), session(days_ago(3), 60)];
        assert_eq!(FocusStats::from_sessions(&sessions, &now(), 120).streak_days, 0);
    }

    #[test]
    fn last_seven_days_round_minutes() {
        let sessions = vec![
            session(days_ago(0), 89),
            session(days_ago(0), 1),
            session(days_ago(6), 29),
            session(days_ago(7), 6_000),
        ];
        let week = FocusStats::from_sessions(&sessions, &now(), 120).last_seven_days;

        assert_eq!(week.len(), 7);
        assert_eq!(week[6].date, now().date_naive());
        assert_eq!(week[6].label, "Wed");
        assert_eq!(week[6].minutes, 2);
        assert_eq!(week[0].label, "Thu");
        assert_eq!(week[0].minutes, 0);
        assert_eq!(week.iter().map(|day| day.minutes).sum::<u64>(), 2);
    }

    #[test]
    fn day_boundaries_follow_the_local_zone() {
        // 23:30 UTC on Jan 9 is already Jan 10 in UTC+2.
        let late = Utc.with_ymd_and_hms(2024, 1, 9, 23, 30, 0).unwrap();
        let sessions = vec![session(late.timestamp_millis(), 600)];

        let in_utc = FocusStats::from_sessions(&sessions, &now(), 120);
        assert_eq!(in_utc.today_sessions, 0);

        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        let local_now = now().with_timezone(&plus_two);
        let local = FocusStats::from_sessions(&sessions, &local_now, 120);
        assert_eq!(local.today_sessions, 1);
    }

    #[test]
    fn groups_by_start_date_in_history_order() {
        let sessions = vec![
            session(days_ago(0), 60),
            session(days_ago(0) - 3_600_000, 60),
            session(days_ago(2), 60),
        ];
        let groups = group_by_date(&sessions, &Utc);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, now().date_naive());
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].1.len(), 1);
    }

    #[test]
    fn formats_durations() {
        assert_eq!(format_duration(5_100), "1h 25m");
        assert_eq!(format_duration(2_703), "45m 3s");
        assert_eq!(format_duration(30), "30s");
        assert_eq!(format_duration(0), "0s");
    }

    #[test]
    fn formats_timer() {
        assert_eq!(format_timer(3_723), "01:02:03");
        assert_eq!(format_timer(125), "2:05");
        assert_eq!(format_timer(0), "0:00");
    }
}
