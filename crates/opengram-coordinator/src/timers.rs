// SPDX-FileCopyrightText: 2026 Opengram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Randomized-interval timers for heartbeats and election checks.
//!
//! Every timer is deadline-based: after each fire the next deadline is
//! resampled as `base + U[0, jitter)`. Randomization de-synchronizes
//! reads and writes across devices so simultaneous staleness detection
//! cannot produce an activation stampede. Role transitions rebuild the
//! whole set, which resets every deadline.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::election::Role;

/// A timer that fires at `base + U[0, jitter)` intervals.
#[derive(Debug)]
pub struct JitterTimer {
    base: Duration,
    jitter: Duration,
    next_fire_at: Instant,
}

impl JitterTimer {
    /// Creates a timer whose first fire is one full sampled interval away.
    pub fn new(base: Duration, jitter: Duration) -> Self {
        let mut timer = Self {
            base,
            jitter,
            next_fire_at: Instant::now(),
        };
        timer.reschedule(Instant::now());
        timer
    }

    /// Creates a timer that is due immediately.
    pub fn due_now(base: Duration, jitter: Duration) -> Self {
        Self {
            base,
            jitter,
            next_fire_at: Instant::now(),
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_fire_at
    }

    /// Consumes a due fire and samples the next deadline.
    pub fn fire(&mut self, now: Instant) {
        self.reschedule(now);
    }

    fn reschedule(&mut self, now: Instant) {
        let jitter_ms = self.jitter.as_millis() as u64;
        let extra = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
        };
        self.next_fire_at = now + self.base + extra;
    }

    /// How long until the next fire (zero when already due).
    pub fn remaining(&self, now: Instant) -> Duration {
        self.next_fire_at.saturating_duration_since(now)
    }
}

/// The kinds of periodic work the ingest loop performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Refresh our own device record.
    DeviceHeartbeat,
    /// Refresh the active heartbeat in the state record (leader only).
    ActiveHeartbeat,
    /// Re-run the election check (standby only; leaders check every tick).
    StandbyCheck,
    /// Remove device records older than 24 h (leader only).
    StaleSweep,
}

/// The role-dependent timer set.
///
/// Cadences: leaders heartbeat their device record and the state record
/// every 30 s (+10 s jitter) and sweep daily; standbys prove existence
/// every 5 min (+60 s) and check for a stale leader every 30 s (+10 s).
pub struct TimerSet {
    timers: Vec<(TimerKind, JitterTimer)>,
}

impl TimerSet {
    pub fn for_role(role: Role) -> Self {
        let timers = match role {
            Role::Leader => vec![
                (
                    TimerKind::DeviceHeartbeat,
                    JitterTimer::new(Duration::from_secs(30), Duration::from_secs(10)),
                ),
                (
                    TimerKind::ActiveHeartbeat,
                    JitterTimer::new(Duration::from_secs(30), Duration::from_secs(10)),
                ),
                (
                    TimerKind::StaleSweep,
                    JitterTimer::due_now(Duration::from_secs(24 * 60 * 60), Duration::ZERO),
                ),
            ],
            Role::Standby => vec![
                (
                    TimerKind::DeviceHeartbeat,
                    JitterTimer::new(Duration::from_secs(5 * 60), Duration::from_secs(60)),
                ),
                (
                    TimerKind::StandbyCheck,
                    JitterTimer::new(Duration::from_secs(30), Duration::from_secs(10)),
                ),
            ],
        };
        Self { timers }
    }

    /// Returns every due timer kind and reschedules them.
    pub fn poll(&mut self, now: Instant) -> Vec<TimerKind> {
        let mut due = Vec::new();
        for (kind, timer) in &mut self.timers {
            if timer.is_due(now) {
                timer.fire(now);
                due.push(*kind);
            }
        }
        due
    }

    /// Time until the earliest deadline, used to pace the standby loop.
    pub fn next_deadline_in(&self, now: Instant) -> Duration {
        self.timers
            .iter()
            .map(|(_, t)| t.remaining(now))
            .min()
            .unwrap_or(Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intervals_stay_within_base_plus_jitter() {
        let base = Duration::from_secs(30);
        let jitter = Duration::from_secs(10);

        for _ in 0..200 {
            let now = Instant::now();
            let timer = JitterTimer::new(base, jitter);
            let remaining = timer.remaining(now);
            assert!(remaining >= base - Duration::from_millis(50));
            assert!(remaining < base + jitter + Duration::from_millis(50));
        }
    }

    #[test]
    fn intervals_are_resampled_after_each_fire() {
        let mut timer = JitterTimer::new(Duration::from_secs(30), Duration::from_secs(10));
        let now = Instant::now();

        let mut deadlines = std::collections::HashSet::new();
        for _ in 0..50 {
            timer.fire(now);
            deadlines.insert(timer.remaining(now).as_millis());
        }
        // 50 samples over a 10 s window collapsing to a couple of values
        // would mean the distribution is not being resampled.
        assert!(deadlines.len() > 10, "deadlines barely vary: {deadlines:?}");
    }

    #[test]
    fn zero_jitter_is_exact() {
        let timer = JitterTimer::new(Duration::from_secs(60), Duration::ZERO);
        let remaining = timer.remaining(Instant::now());
        assert!(remaining <= Duration::from_secs(60));
        assert!(remaining >= Duration::from_secs(59));
    }

    #[test]
    fn due_timer_fires_once_then_waits() {
        let mut timer = JitterTimer::due_now(Duration::from_secs(10), Duration::ZERO);
        let now = Instant::now();
        assert!(timer.is_due(now));
        timer.fire(now);
        assert!(!timer.is_due(now));
    }

    #[test]
    fn leader_set_has_no_standby_check() {
        let mut set = TimerSet::for_role(Role::Leader);
        // The sweep is due immediately so a new leader cleans up promptly.
        let due = set.poll(Instant::now());
        assert_eq!(due, vec![TimerKind::StaleSweep]);
        assert!(!due.contains(&TimerKind::StandbyCheck));
    }

    #[test]
    fn standby_set_checks_but_never_sweeps() {
        let now = Instant::now();
        let mut set = TimerSet::for_role(Role::Standby);
        let due = set.poll(now + Duration::from_secs(3600));
        assert!(due.contains(&TimerKind::StandbyCheck));
        assert!(due.contains(&TimerKind::DeviceHeartbeat));
        assert!(!due.contains(&TimerKind::StaleSweep));
        assert!(!due.contains(&TimerKind::ActiveHeartbeat));
    }

    #[test]
    fn poll_reschedules_fired_timers() {
        let now = Instant::now();
        let mut set = TimerSet::for_role(Role::Standby);
        let first = set.poll(now + Duration::from_secs(3600));
        assert!(!first.is_empty());
        let second = set.poll(now + Duration::from_secs(3600));
        assert!(second.is_empty(), "fired timers must move their deadlines");
    }

    #[test]
    fn next_deadline_tracks_soonest_timer() {
        let set = TimerSet::for_role(Role::Standby);
        let soon = set.next_deadline_in(Instant::now());
        // The standby check (30-40 s) is always sooner than the device
        // heartbeat (5-6 min).
        assert!(soon <= Duration::from_secs(40));
    }
}
