//! Debounce state machine for one synchronized feature.
//!
//! [`Debouncer`] is pure: it is fed events with the current time (as an
//! offset from any fixed origin) and answers with the [`Action`] the driver
//! should take. The driver owns the actual timer and network call.
//!
//! ```text
//!            mutation (elapsed <= interval)
//!   Idle ─────────────────────────────────────▶ Pending
//!    │  ▲                                          │
//!    │  │ finish (nothing dirty)                   │ timer
//!    │  │                                          ▼
//!    └──┴───── mutation (elapsed > interval) ──▶ InFlight
//! ```
//!
//! Rules:
//! - every pass is a `Pull` until one pull has succeeded this session;
//! - at most one pass is in flight, a mutation during a pass only re-arms
//!   the trailing timer;
//! - a failed pass keeps its changes dirty and arms a retry tick, unless the
//!   credentials were refused: then nothing runs until the next mutation or
//!   flush.

use crate::record::SyncOp;
use std::time::Duration;

/// What the driver should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Start a reconciliation pass now.
    Run(SyncOp),
    /// (Re)arm the single timer to fire after the given delay, cancelling
    /// any previously armed one.
    Arm(Duration),
    /// Nothing to do.
    Wait,
}

/// How a finished pass went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    /// Transient failure, retried after an interval.
    Retry,
    /// The credentials were refused. Not retried on its own.
    Unauthorized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Pending,
    InFlight,
}

#[derive(Debug, Clone)]
pub struct Debouncer {
    interval: Duration,
    last_sync: Option<Duration>,
    due: Option<Duration>,
    in_flight: Option<SyncOp>,
    dirty: bool,
    cleared: bool,
    initial_pulled: bool,
}

impl Debouncer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sync: None,
            due: None,
            in_flight: None,
            dirty: false,
            cleared: false,
            initial_pulled: false,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn phase(&self) -> Phase {
        if self.in_flight.is_some() {
            Phase::InFlight
        } else if self.due.is_some() {
            Phase::Pending
        } else {
            Phase::Idle
        }
    }

    /// Local changes not yet carried by a successful pass.
    pub fn is_dirty(&self) -> bool {
        self.dirty || self.cleared
    }

    pub fn initial_pulled(&self) -> bool {
        self.initial_pulled
    }

    /// Start of the last pass.
    pub fn last_sync(&self) -> Option<Duration> {
        self.last_sync
    }

    /// When the armed timer is due.
    pub fn due(&self) -> Option<Duration> {
        self.due
    }

    fn next_op(&self) -> SyncOp {
        if self.initial_pulled {
            SyncOp::Both
        } else {
            SyncOp::Pull
        }
    }

    fn begin(&mut self, now: Duration) -> Action {
        let op = self.next_op();
        if op.pushes() {
            self.cleared = self.dirty;
            self.dirty = false;
        }
        self.in_flight = Some(op);
        self.due = None;
        self.last_sync = Some(now);
        Action::Run(op)
    }

    fn remaining(&self, now: Duration) -> Option<Duration> {
        let last = self.last_sync?;
        let elapsed = now.saturating_sub(last);
        (elapsed <= self.interval).then(|| self.interval - elapsed)
    }

    fn arm(&mut self, now: Duration, delay: Duration) -> Action {
        self.due = Some(now + delay);
        Action::Arm(delay)
    }

    /// Session start: run the initial pull.
    pub fn start_session(&mut self, now: Duration) -> Action {
        if self.in_flight.is_some() {
            return Action::Wait;
        }
        self.initial_pulled = false;
        self.begin(now)
    }

    /// A relevant local mutation happened.
    pub fn mutation(&mut self, now: Duration) -> Action {
        self.dirty = true;
        match self.remaining(now) {
            Some(delay) => self.arm(now, delay),
            None if self.in_flight.is_some() => self.arm(now, Duration::ZERO),
            None => self.begin(now),
        }
    }

    /// The armed timer fired.
    pub fn timer(&mut self, now: Duration) -> Action {
        match self.due {
            Some(due) if now >= due => {}
            _ => return Action::Wait,
        }
        if self.in_flight.is_some() {
            // left armed for finish()
            return Action::Wait;
        }
        self.due = None;
        if self.dirty || !self.initial_pulled {
            self.begin(now)
        } else {
            Action::Wait
        }
    }

    /// Run a pass as soon as possible, skipping the debounce window.
    pub fn flush(&mut self, now: Duration) -> Action {
        self.dirty = true;
        if self.in_flight.is_some() {
            return self.arm(now, Duration::ZERO);
        }
        self.begin(now)
    }

    /// The pass in flight completed.
    pub fn finish(&mut self, now: Duration, outcome: Outcome) -> Action {
        let Some(op) = self.in_flight.take() else {
            return Action::Wait;
        };
        match outcome {
            Outcome::Ok => {
                if op.pulls() {
                    self.initial_pulled = true;
                }
                self.cleared = false;
            }
            Outcome::Retry => {
                self.dirty |= self.cleared;
                self.cleared = false;
                if self.due.is_none() {
                    return self.arm(now, self.interval);
                }
            }
            Outcome::Unauthorized => {
                self.dirty |= self.cleared;
                self.cleared = false;
                self.due = None;
                return Action::Wait;
            }
        }

        match self.due {
            Some(due) if due <= now => self.begin(now),
            Some(due) => Action::Arm(due - now),
            None if self.dirty => match self.remaining(now) {
                Some(delay) if !delay.is_zero() => self.arm(now, delay),
                _ => self.begin(now),
            },
            None => Action::Wait,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn session_starts_with_pull() {
        let mut d = Debouncer::new(ms(2_000));
        assert_eq!(d.start_session(ms(0)), Action::Run(SyncOp::Pull));
        assert_eq!(d.phase(), Phase::InFlight);
        assert_eq!(d.finish(ms(100), Outcome::Ok), Action::Wait);
        assert!(d.initial_pulled());
        assert_eq!(d.phase(), Phase::Idle);
    }

    #[test]
    fn burst_of_mutations_coalesces_into_one_pass() {
        let mut d = Debouncer::new(ms(2_000));
        assert_eq!(d.start_session(ms(0)), Action::Run(SyncOp::Pull));

        let actions: Vec<_> = [10, 50, 100, 150, 200]
            .into_iter()
            .map(|t| d.mutation(ms(t)))
            .collect();
        assert_eq!(
            actions,
            vec![
                Action::Arm(ms(1_990)),
                Action::Arm(ms(1_950)),
                Action::Arm(ms(1_900)),
                Action::Arm(ms(1_850)),
                Action::Arm(ms(1_800)),
            ]
        );
        assert_eq!(d.due(), Some(ms(2_000)));

        // Initial pull finishes while the trailing timer is armed.
        assert_eq!(d.finish(ms(300), Outcome::Ok), Action::Arm(ms(1_700)));
        assert_eq!(d.timer(ms(2_000)), Action::Run(SyncOp::Both));
        assert!(d.is_dirty());
        assert_eq!(d.finish(ms(2_100), Outcome::Ok), Action::Wait);
        assert!(!d.is_dirty());
    }

    #[test]
    fn mutation_after_quiet_interval_runs_immediately() {
        let mut d = Debouncer::new(ms(1_000));
        d.start_session(ms(0));
        d.finish(ms(10), Outcome::Ok);
        assert_eq!(d.mutation(ms(5_000)), Action::Run(SyncOp::Both));
        assert_eq!(d.last_sync(), Some(ms(5_000)));
    }

    #[test]
    fn no_push_before_initial_pull() {
        let mut d = Debouncer::new(ms(1_000));
        // No session start yet: first mutation runs a pull, not a push.
        assert_eq!(d.mutation(ms(0)), Action::Run(SyncOp::Pull));
        assert_eq!(d.finish(ms(10), Outcome::Retry), Action::Arm(ms(1_000)));
        assert!(!d.initial_pulled());
        assert_eq!(d.timer(ms(1_010)), Action::Run(SyncOp::Pull));
        // Still dirty after the pull: the push follows after the window.
        assert_eq!(d.finish(ms(1_020), Outcome::Ok), Action::Arm(ms(990)));
        assert_eq!(d.timer(ms(2_010)), Action::Run(SyncOp::Both));
    }

    #[test]
    fn mutation_during_flight_only_rearms() {
        let mut d = Debouncer::new(ms(1_000));
        d.start_session(ms(0));
        d.finish(ms(10), Outcome::Ok);
        assert_eq!(d.mutation(ms(2_000)), Action::Run(SyncOp::Both));
        assert_eq!(d.mutation(ms(2_100)), Action::Arm(ms(900)));
        assert_eq!(d.phase(), Phase::InFlight);

        // Timer fires before the pass returns: nothing launches.
        assert_eq!(d.timer(ms(3_000)), Action::Wait);
        assert_eq!(d.phase(), Phase::InFlight);

        // The owed pass runs once the first one finishes.
        assert_eq!(d.finish(ms(3_200), Outcome::Ok), Action::Run(SyncOp::Both));
    }

    #[test]
    fn failure_keeps_changes_dirty() {
        let mut d = Debouncer::new(ms(1_000));
        d.start_session(ms(0));
        d.finish(ms(10), Outcome::Ok);
        assert_eq!(d.mutation(ms(5_000)), Action::Run(SyncOp::Both));
        assert!(d.is_dirty());
        assert_eq!(d.finish(ms(5_100), Outcome::Retry), Action::Arm(ms(1_000)));
        assert!(d.is_dirty());
        assert_eq!(d.timer(ms(6_100)), Action::Run(SyncOp::Both));
        assert_eq!(d.finish(ms(6_200), Outcome::Ok), Action::Wait);
        assert!(!d.is_dirty());
    }

    #[test]
    fn refused_credentials_wait_for_the_next_mutation() {
        let mut d = Debouncer::new(ms(1_000));
        d.start_session(ms(0));
        d.finish(ms(10), Outcome::Ok);
        assert_eq!(d.mutation(ms(5_000)), Action::Run(SyncOp::Both));
        // A mutation during the pass armed a trailing timer.
        assert_eq!(d.mutation(ms(5_050)), Action::Arm(ms(950)));

        assert_eq!(d.finish(ms(5_100), Outcome::Unauthorized), Action::Wait);
        assert_eq!(d.phase(), Phase::Idle);
        assert!(d.is_dirty());
        assert_eq!(d.timer(ms(6_000)), Action::Wait);
        assert_eq!(d.timer(ms(60_000)), Action::Wait);

        // The user signed in and edited again.
        assert_eq!(d.mutation(ms(70_000)), Action::Run(SyncOp::Both));
        assert_eq!(d.finish(ms(70_100), Outcome::Ok), Action::Wait);
        assert!(!d.is_dirty());
    }

    #[test]
    fn refused_initial_pull_is_not_retried() {
        let mut d = Debouncer::new(ms(1_000));
        assert_eq!(d.start_session(ms(0)), Action::Run(SyncOp::Pull));
        assert_eq!(d.finish(ms(10), Outcome::Unauthorized), Action::Wait);
        assert_eq!(d.due(), None);
        assert!(!d.initial_pulled());
        assert_eq!(d.flush(ms(500)), Action::Run(SyncOp::Pull));
    }

    #[test]
    fn stale_timer_is_ignored() {
        let mut d = Debouncer::new(ms(1_000));
        d.start_session(ms(0));
        d.finish(ms(10), Outcome::Ok);
        assert_eq!(d.mutation(ms(100)), Action::Arm(ms(900)));
        assert_eq!(d.timer(ms(500)), Action::Wait);
        assert_eq!(d.phase(), Phase::Pending);
        assert_eq!(d.timer(ms(1_000)), Action::Run(SyncOp::Both));
    }

    #[test]
    fn flush_skips_the_window() {
        let mut d = Debouncer::new(ms(60_000));
        d.start_session(ms(0));
        d.finish(ms(10), Outcome::Ok);
        assert_eq!(d.mutation(ms(100)), Action::Arm(ms(59_900)));
        assert_eq!(d.flush(ms(200)), Action::Run(SyncOp::Both));
        assert_eq!(d.due(), None);
    }
}
