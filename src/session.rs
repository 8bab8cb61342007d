//! Recording session state machine.
//!
//! A session is either idle or holds one active recording window
//! (deadline + upload destination). Deadline and destination are set and
//! cleared together, so a half-cleared session cannot accept a new trigger.
//!
//! Independently of the window, every poll tick requests one snapshot frame
//! for the per-day dataset directory.

use chrono::{DateTime, Local, TimeDelta};
use std::time::Duration;

use crate::trigger::{Destination, RecordingTrigger, TriggerSource, TRIGGER_KEY};

/// Cadence of trigger polls and snapshot requests.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// An accepted recording window.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveWindow {
    pub deadline: DateTime<Local>,
    pub destination: Destination,
}

/// Result of a poll step.
#[derive(Debug, PartialEq, Eq)]
pub enum PollOutcome {
    /// The poll interval has not elapsed yet.
    NotDue,
    /// A window is already active; the store was not consulted.
    Busy,
    /// No trigger present.
    NoTrigger,
    Armed { deadline: DateTime<Local> },
    /// The trigger was present but unusable. Session stays idle.
    Rejected(String),
}

pub struct RecordingSession {
    poll_interval: TimeDelta,
    last_poll: Option<DateTime<Local>>,
    window: Option<ActiveWindow>,
    snapshot_requested: bool,
}

impl RecordingSession {
    /// The first poll is due immediately.
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval: TimeDelta::from_std(poll_interval).unwrap_or(TimeDelta::MAX),
            last_poll: None,
            window: None,
            snapshot_requested: false,
        }
    }

    pub fn poll_due(&self, now: DateTime<Local>) -> bool {
        match self.last_poll {
            None => true,
            Some(last) => last
                .checked_add_signed(self.poll_interval)
                .is_some_and(|next| next < now),
        }
    }

    /// Run one poll step if due: request a snapshot and, when idle, try to
    /// accept a trigger from `triggers`.
    ///
    /// Never fails; store and payload errors leave the session idle.
    pub fn poll(&mut self, now: DateTime<Local>, triggers: &dyn TriggerSource) -> PollOutcome {
        if !self.poll_due(now) {
            return PollOutcome::NotDue;
        }
        self.snapshot_requested = true;
        self.last_poll = Some(now);

        if self.window.is_some() {
            return PollOutcome::Busy;
        }

        let value = match triggers.get(TRIGGER_KEY) {
            Ok(Some(value)) => value,
            Ok(None) => return PollOutcome::NoTrigger,
            Err(err) => {
                log::warn!("failed to start dataset recording: {:#}", err);
                return PollOutcome::Rejected(format!("{:#}", err));
            }
        };

        match RecordingTrigger::from_value(&value) {
            Ok(trigger) => match self.accept(now, trigger) {
                Some(deadline) => PollOutcome::Armed { deadline },
                None => PollOutcome::Busy,
            },
            Err(err) => {
                log::warn!("failed to start dataset recording: {}", err);
                PollOutcome::Rejected(err.to_string())
            }
        }
    }

    /// Arm a window ending `trigger.duration` after `now`. No-op while a
    /// window is active.
    pub fn accept(
        &mut self,
        now: DateTime<Local>,
        trigger: RecordingTrigger,
    ) -> Option<DateTime<Local>> {
        if self.window.is_some() {
            return None;
        }
        let deadline = now.checked_add_signed(trigger.duration)?;
        log::info!(
            "dataset recording armed until {} (upload to {})",
            deadline.format("%Y-%m-%d %H:%M:%S"),
            trigger.destination.url
        );
        self.window = Some(ActiveWindow {
            deadline,
            destination: trigger.destination,
        });
        Some(deadline)
    }

    pub fn is_active(&self) -> bool {
        self.window.is_some()
    }

    pub fn window(&self) -> Option<&ActiveWindow> {
        self.window.as_ref()
    }

    /// Archive writes are permitted strictly before the deadline.
    pub fn is_recording(&self, now: DateTime<Local>) -> bool {
        self.window
            .as_ref()
            .is_some_and(|window| now < window.deadline)
    }

    /// Returns and clears the pending snapshot request.
    pub fn take_snapshot_request(&mut self) -> bool {
        std::mem::take(&mut self.snapshot_requested)
    }

    pub fn snapshot_requested(&self) -> bool {
        self.snapshot_requested
    }

    /// Close the window once `now` is past its deadline.
    pub fn expire(&mut self, now: DateTime<Local>) -> Option<ActiveWindow> {
        if self.window.as_ref()?.deadline < now {
            self.window.take()
        } else {
            None
        }
    }

    /// Drop the active window without exporting it.
    pub fn disarm(&mut self) -> Option<ActiveWindow> {
        self.window.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use chrono::TimeZone;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedTrigger {
        value: Option<Value>,
        fail: bool,
        reads: AtomicUsize,
    }

    impl FixedTrigger {
        fn with(value: Value) -> Self {
            Self {
                value: Some(value),
                fail: false,
                reads: AtomicUsize::new(0),
            }
        }

        fn empty() -> Self {
            Self {
                value: None,
                fail: false,
                reads: AtomicUsize::new(0),
            }
        }
    }

    impl TriggerSource for FixedTrigger {
        fn get(&self, key: &str) -> Result<Option<Value>> {
            assert_eq!(key, TRIGGER_KEY);
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("store unreachable"));
            }
            Ok(self.value.clone())
        }
    }

    fn t0() -> DateTime<Local> {
        Local.timestamp_opt(1_714_564_800, 0).unwrap()
    }

    fn valid_trigger() -> Value {
        json!({"time": "1", "url": "https://x", "username": "u", "user_password": "p"})
    }

    #[test]
    fn first_poll_is_due_immediately() {
        let session = RecordingSession::new(DEFAULT_POLL_INTERVAL);
        assert!(session.poll_due(t0()));
    }

    #[test]
    fn valid_trigger_arms_with_deadline() {
        let mut session = RecordingSession::new(DEFAULT_POLL_INTERVAL);
        let outcome = session.poll(t0(), &FixedTrigger::with(valid_trigger()));

        let deadline = t0() + TimeDelta::minutes(1);
        assert_eq!(outcome, PollOutcome::Armed { deadline });
        assert_eq!(session.window().map(|w| w.deadline), Some(deadline));
        assert_eq!(
            session.window().map(|w| w.destination.url.as_str()),
            Some("https://x")
        );
        assert!(session.is_recording(t0()));
    }

    #[test]
    fn poll_respects_interval() {
        let mut session = RecordingSession::new(DEFAULT_POLL_INTERVAL);
        let source = FixedTrigger::empty();
        assert_eq!(session.poll(t0(), &source), PollOutcome::NoTrigger);
        assert_eq!(
            session.poll(t0() + TimeDelta::seconds(60), &source),
            PollOutcome::NotDue
        );
        assert_eq!(
            session.poll(t0() + TimeDelta::seconds(61), &source),
            PollOutcome::NoTrigger
        );
        assert_eq!(source.reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn active_window_blocks_new_trigger() {
        let mut session = RecordingSession::new(DEFAULT_POLL_INTERVAL);
        let source = FixedTrigger::with(valid_trigger());
        session.poll(t0(), &source);

        let later = t0() + TimeDelta::seconds(61);
        assert_eq!(session.poll(later, &source), PollOutcome::Busy);
        // The store is not consulted while busy.
        assert_eq!(source.reads.load(Ordering::SeqCst), 1);
        assert_eq!(
            session.window().map(|w| w.deadline),
            Some(t0() + TimeDelta::minutes(1))
        );

        let trigger = RecordingTrigger::from_value(&valid_trigger()).unwrap();
        assert_eq!(session.accept(later, trigger), None);
    }

    #[test]
    fn malformed_trigger_leaves_session_idle() {
        let mut session = RecordingSession::new(DEFAULT_POLL_INTERVAL);
        let source = FixedTrigger::with(json!({"time": "abc", "url": "https://x"}));
        assert!(matches!(
            session.poll(t0(), &source),
            PollOutcome::Rejected(_)
        ));
        assert!(!session.is_active());
        // Retried on the next tick.
        assert!(!session.poll_due(t0() + TimeDelta::seconds(30)));
        assert!(session.poll_due(t0() + TimeDelta::seconds(61)));
    }

    #[test]
    fn store_errors_leave_session_idle() {
        let mut session = RecordingSession::new(DEFAULT_POLL_INTERVAL);
        let mut source = FixedTrigger::with(valid_trigger());
        source.fail = true;
        assert!(matches!(
            session.poll(t0(), &source),
            PollOutcome::Rejected(_)
        ));
        assert!(!session.is_active());
    }

    #[test]
    fn every_tick_requests_one_snapshot() {
        let mut session = RecordingSession::new(DEFAULT_POLL_INTERVAL);
        let source = FixedTrigger::empty();

        session.poll(t0(), &source);
        assert!(session.take_snapshot_request());
        assert!(!session.take_snapshot_request());

        session.poll(t0() + TimeDelta::seconds(30), &source);
        assert!(!session.snapshot_requested());

        session.poll(t0() + TimeDelta::seconds(61), &source);
        assert!(session.take_snapshot_request());
    }

    #[test]
    fn window_expires_strictly_after_deadline() {
        let mut session = RecordingSession::new(DEFAULT_POLL_INTERVAL);
        session.poll(t0(), &FixedTrigger::with(valid_trigger()));
        let deadline = t0() + TimeDelta::minutes(1);

        assert!(session.is_recording(deadline - TimeDelta::seconds(1)));
        assert!(!session.is_recording(deadline));
        assert_eq!(session.expire(deadline), None);

        let expired = session.expire(deadline + TimeDelta::seconds(1));
        assert_eq!(
            expired.map(|w| w.destination.username.clone()),
            Some("u".to_string())
        );
        assert!(!session.is_active());
        assert_eq!(session.expire(deadline + TimeDelta::seconds(2)), None);
    }

    #[test]
    fn expired_session_accepts_next_trigger() {
        let mut session = RecordingSession::new(DEFAULT_POLL_INTERVAL);
        let source = FixedTrigger::with(valid_trigger());
        session.poll(t0(), &source);
        session.expire(t0() + TimeDelta::seconds(61));

        let next = t0() + TimeDelta::seconds(62);
        assert_eq!(
            session.poll(next, &source),
            PollOutcome::Armed {
                deadline: next + TimeDelta::minutes(1)
            }
        );
    }
}
