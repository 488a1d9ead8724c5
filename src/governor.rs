//! Sliding-window admission control for model calls.
//!
//! The [`RateGovernor`] keeps the timestamps of recent calls in two trailing
//! windows (one minute, one day) and decides whether another call may go out
//! now or how long the caller has to wait first.
//!
//! # Window boundary
//!
//! A timestamp is retained while `age < window`. A call recorded exactly one
//! window length ago has expired and no longer counts.
//!
//! # Sharing
//!
//! [`SharedGovernor`] is the process-wide handle. Its [`SharedGovernor::try_acquire`]
//! performs check-and-record under a single lock so concurrent callers cannot
//! both observe a free slot and overshoot the ceiling.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Length of the short throttle window.
pub const MINUTE_WINDOW: Duration = Duration::from_secs(60);
/// Length of the long throttle window.
pub const DAY_WINDOW: Duration = Duration::from_secs(86_400);

/// Minimum wait reported for a minute-window denial.
const MIN_MINUTE_WAIT_SECS: u64 = 1;
/// Minimum wait reported for a day-window denial.
const MIN_DAY_WAIT_SECS: u64 = 60;

/// Call ceilings enforced by a [`RateGovernor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GovernorLimits {
    /// Maximum calls within any trailing 60 seconds.
    pub per_minute: usize,
    /// Maximum calls within any trailing 24 hours.
    pub per_day: usize,
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// The call may proceed now.
    Admitted,
    /// The call must wait at least `wait_secs` seconds.
    Denied { wait_secs: u64 },
}

impl RateDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, RateDecision::Admitted)
    }
}

/// Two-window call counter.
#[derive(Debug)]
pub struct RateGovernor {
    limits: GovernorLimits,
    minute: VecDeque<Instant>,
    day: VecDeque<Instant>,
}

impl RateGovernor {
    pub fn new(limits: GovernorLimits) -> Self {
        Self {
            limits,
            minute: VecDeque::new(),
            day: VecDeque::new(),
        }
    }

    /// Decide whether a call may be made at `now`.
    ///
    /// Prunes expired timestamps from both windows but never records a call.
    /// When both windows are full the minute-window denial is reported.
    pub fn check_admission(&mut self, now: Instant) -> RateDecision {
        self.prune(now);

        if self.minute.len() >= self.limits.per_minute {
            let wait_secs =
                remaining_secs(self.minute.front().copied(), now, MINUTE_WINDOW).max(MIN_MINUTE_WAIT_SECS);
            debug!(
                calls = self.minute.len(),
                limit = self.limits.per_minute,
                wait_secs,
                "Minute window full"
            );
            return RateDecision::Denied { wait_secs };
        }

        if self.day.len() >= self.limits.per_day {
            let wait_secs =
                remaining_secs(self.day.front().copied(), now, DAY_WINDOW).max(MIN_DAY_WAIT_SECS);
            debug!(
                calls = self.day.len(),
                limit = self.limits.per_day,
                wait_secs,
                "Day window full"
            );
            return RateDecision::Denied { wait_secs };
        }

        RateDecision::Admitted
    }

    /// Record a call made at `now` in both windows.
    pub fn record_call(&mut self, now: Instant) {
        self.minute.push_back(now);
        self.day.push_back(now);
    }

    /// Check and, when admitted, record in one step.
    pub fn try_acquire(&mut self, now: Instant) -> RateDecision {
        let decision = self.check_admission(now);
        if decision.is_admitted() {
            self.record_call(now);
        }
        decision
    }

    /// Calls currently held in the minute window (as of the last prune).
    pub fn minute_calls(&self) -> usize {
        self.minute.len()
    }

    /// Calls currently held in the day window (as of the last prune).
    pub fn day_calls(&self) -> usize {
        self.day.len()
    }

    fn prune(&mut self, now: Instant) {
        prune_window(&mut self.minute, now, MINUTE_WINDOW);
        prune_window(&mut self.day, now, DAY_WINDOW);
    }
}

fn prune_window(window: &mut VecDeque<Instant>, now: Instant, length: Duration) {
    while let Some(&oldest) = window.front() {
        if now.saturating_duration_since(oldest) < length {
            break;
        }
        window.pop_front();
    }
}

/// Whole seconds until `oldest` leaves a window of `length`, rounded up.
fn remaining_secs(oldest: Option<Instant>, now: Instant, length: Duration) -> u64 {
    let remaining = match oldest {
        Some(oldest) => length.saturating_sub(now.saturating_duration_since(oldest)),
        None => length,
    };
    remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0)
}

/// Point-in-time counts of a governor's windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GovernorSnapshot {
    pub minute_calls: usize,
    pub day_calls: usize,
}

/// Cloneable, thread-safe handle to one process-wide [`RateGovernor`].
#[derive(Debug, Clone)]
pub struct SharedGovernor {
    inner: Arc<Mutex<RateGovernor>>,
}

impl SharedGovernor {
    pub fn new(limits: GovernorLimits) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RateGovernor::new(limits))),
        }
    }

    /// Atomic check-and-record.
    pub fn try_acquire(&self, now: Instant) -> RateDecision {
        self.lock().try_acquire(now)
    }

    pub fn snapshot(&self) -> GovernorSnapshot {
        let governor = self.lock();
        GovernorSnapshot {
            minute_calls: governor.minute_calls(),
            day_calls: governor.day_calls(),
        }
    }

    // The governor's state stays consistent even if a holder panicked.
    fn lock(&self) -> MutexGuard<'_, RateGovernor> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(per_minute: usize, per_day: usize) -> GovernorLimits {
        GovernorLimits { per_minute, per_day }
    }

    #[test]
    fn test_admits_until_minute_limit() {
        let mut gov = RateGovernor::new(limits(3, 100));
        let t0 = Instant::now();
        for i in 0..3 {
            let now = t0 + Duration::from_millis(500 * i);
            assert_eq!(gov.check_admission(now), RateDecision::Admitted);
            gov.record_call(now);
        }
        match gov.check_admission(t0 + Duration::from_millis(1500)) {
            RateDecision::Denied { wait_secs } => assert!((1..=60).contains(&wait_secs)),
            other => panic!("expected denial, got {other:?}"),
        }
    }

    #[test]
    fn test_third_call_without_gap_waits_full_minute() {
        let mut gov = RateGovernor::new(limits(2, 100));
        let now = Instant::now();
        assert_eq!(gov.try_acquire(now), RateDecision::Admitted);
        assert_eq!(gov.try_acquire(now), RateDecision::Admitted);
        assert_eq!(gov.try_acquire(now), RateDecision::Denied { wait_secs: 60 });
        assert_eq!(gov.minute_calls(), 2);
    }

    #[test]
    fn test_check_is_idempotent() {
        let mut gov = RateGovernor::new(limits(1, 100));
        let now = Instant::now();
        gov.record_call(now);
        let later = now + Duration::from_secs(10);
        let first = gov.check_admission(later);
        let second = gov.check_admission(later);
        assert_eq!(first, second);
        assert_eq!(first, RateDecision::Denied { wait_secs: 50 });
    }

    #[test]
    fn test_check_does_not_record() {
        let mut gov = RateGovernor::new(limits(5, 100));
        let now = Instant::now();
        for _ in 0..10 {
            assert!(gov.check_admission(now).is_admitted());
        }
        assert_eq!(gov.minute_calls(), 0);
        assert_eq!(gov.day_calls(), 0);
    }

    #[test]
    fn test_entry_at_window_boundary_is_expired() {
        let mut gov = RateGovernor::new(limits(1, 100));
        let t0 = Instant::now();
        gov.record_call(t0);
        assert!(!gov.check_admission(t0 + Duration::from_millis(59_999)).is_admitted());
        assert!(gov.check_admission(t0 + MINUTE_WINDOW).is_admitted());
        assert_eq!(gov.minute_calls(), 0);
        assert_eq!(gov.day_calls(), 1);
    }

    #[test]
    fn test_partial_seconds_round_up() {
        let mut gov = RateGovernor::new(limits(1, 100));
        let t0 = Instant::now();
        gov.record_call(t0);
        let decision = gov.check_admission(t0 + Duration::from_millis(59_500));
        assert_eq!(decision, RateDecision::Denied { wait_secs: 1 });
    }

    #[test]
    fn test_day_limit_denies_with_minimum_wait() {
        let mut gov = RateGovernor::new(limits(100, 2));
        let t0 = Instant::now();
        gov.record_call(t0);
        gov.record_call(t0 + Duration::from_secs(61));

        // Nearly a day later: minute window is empty, day window is still full.
        let now = t0 + DAY_WINDOW - Duration::from_secs(5);
        assert_eq!(gov.check_admission(now), RateDecision::Denied { wait_secs: 60 });

        let early = t0 + Duration::from_secs(3600);
        assert_eq!(
            gov.check_admission(early),
            RateDecision::Denied { wait_secs: 86_400 - 3600 }
        );
    }

    #[test]
    fn test_minute_denial_takes_precedence() {
        let mut gov = RateGovernor::new(limits(1, 1));
        let now = Instant::now();
        gov.record_call(now);
        assert_eq!(
            gov.check_admission(now + Duration::from_secs(20)),
            RateDecision::Denied { wait_secs: 40 }
        );
    }

    #[test]
    fn test_day_window_recovers() {
        let mut gov = RateGovernor::new(limits(100, 1));
        let t0 = Instant::now();
        gov.record_call(t0);
        assert!(gov.check_admission(t0 + DAY_WINDOW).is_admitted());
        assert_eq!(gov.day_calls(), 0);
    }

    #[test]
    fn test_shared_governor_counts_across_clones() {
        let shared = SharedGovernor::new(limits(2, 10));
        let other = shared.clone();
        let now = Instant::now();
        assert!(shared.try_acquire(now).is_admitted());
        assert!(other.try_acquire(now).is_admitted());
        assert!(!shared.try_acquire(now).is_admitted());
        assert_eq!(
            other.snapshot(),
            GovernorSnapshot { minute_calls: 2, day_calls: 2 }
        );
    }

    #[test]
    fn test_shared_governor_never_overshoots_under_threads() {
        let shared = SharedGovernor::new(limits(5, 100));
        let now = Instant::now();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let gov = shared.clone();
                std::thread::spawn(move || gov.try_acquire(now).is_admitted())
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 5);
        assert_eq!(shared.snapshot().minute_calls, 5);
    }
}
