//! Lockout state model and configuration.
//!
//! [`LockoutState`] is the single record stored per key. [`LockoutStatus`] and
//! [`LockStatus`] are derived views handed to callers. [`LockoutConfig`]
//! parameterizes one limiter instance: the flat identity-keyed policy and the
//! escalating address-keyed policy are both expressed as a `LockoutConfig`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LockoutError;

/// Lockout durations, in minutes, for the escalating policy indexed by lockout level.
///
/// Levels past the end double the last entry once per extra level.
pub const ESCALATING_STEPS_MINUTES: [i64; 12] = [1, 3, 5, 10, 15, 30, 60, 120, 240, 480, 960, 1920];

/// Tracked failure state for a single key (username or source address).
///
/// A state exists only after the first recorded failure for its key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutState {
    pub key: String,
    /// Failures still allowed before the next lock triggers
    pub attempts_remaining: u32,
    /// Number of lockouts since the last qualifying reset
    pub lockout_level: u32,
    /// Set while attempts are exhausted and the lock has not been normalized away
    pub locked_until: Option<DateTime<Utc>>,
    /// Most recent recorded failure
    pub last_attempt_at: DateTime<Utc>,
    /// First failure of the current grace window
    pub window_started_at: DateTime<Utc>,
}

impl LockoutState {
    /// A fresh state with a full grace window, as if no failure had been seen.
    pub fn new(key: impl Into<String>, attempts_remaining: u32, now: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            attempts_remaining,
            lockout_level: 0,
            locked_until: None,
            last_attempt_at: now,
            window_started_at: now,
        }
    }

    /// Whether the key is blocked at `now`.
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| now < until)
    }

    /// Whether a stored lock has run out but not yet been normalized.
    pub fn lock_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| now >= until)
    }
}

/// Result of checking a key before an authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutStatus {
    pub key: String,
    pub allowed: bool,
    pub remaining_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub remaining_seconds: Option<i64>,
}

impl LockoutStatus {
    pub fn unlocked(key: impl Into<String>, remaining_attempts: u32) -> Self {
        Self {
            key: key.into(),
            allowed: true,
            remaining_attempts,
            locked_until: None,
            remaining_seconds: None,
        }
    }

    pub fn locked(key: impl Into<String>, locked_until: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            allowed: false,
            remaining_attempts: 0,
            locked_until: Some(locked_until),
            remaining_seconds: Some(seconds_until(locked_until, now)),
        }
    }

    pub fn is_locked(&self) -> bool {
        !self.allowed
    }

    /// Remaining lock time in whole minutes, rounded up.
    pub fn remaining_minutes(&self) -> Option<i64> {
        self.remaining_seconds.map(|secs| (secs + 59) / 60)
    }

    /// Value for a `Retry-After` header.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        self.remaining_seconds.map(|secs| secs.max(0) as u64)
    }

    /// The rejection to surface when this status does not allow an attempt.
    pub fn rejection(&self) -> Option<LockoutError> {
        match (self.allowed, self.locked_until) {
            (false, Some(locked_until)) => Some(LockoutError::RateLimitExceeded {
                key: self.key.clone(),
                locked_until,
                remaining_seconds: self.remaining_seconds.unwrap_or_default(),
            }),
            _ => None,
        }
    }
}

/// Read-only lock view of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockStatus {
    pub locked: bool,
    pub remaining_seconds: Option<i64>,
}

/// Whole seconds from `now` until `until`, rounded up.
pub(crate) fn seconds_until(until: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let millis = (until - now).num_milliseconds().max(0);
    (millis + 999) / 1000
}

/// How long a lock lasts for a given lockout level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DurationSchedule {
    /// Same duration for every lockout
    Flat(Duration),
    /// Indexed by lockout level; doubles past the last entry
    Escalating(Vec<Duration>),
}

impl DurationSchedule {
    /// The default address-keyed schedule.
    pub fn escalating_default() -> Self {
        Self::Escalating(
            ESCALATING_STEPS_MINUTES
                .iter()
                .map(|minutes| Duration::minutes(*minutes))
                .collect(),
        )
    }

    /// Lock duration for a lock triggered at `level`. Saturates rather than overflowing.
    pub fn duration_for(&self, level: u32) -> Duration {
        match self {
            Self::Flat(duration) => *duration,
            Self::Escalating(steps) => {
                let Some(last) = steps.last() else {
                    return Duration::zero();
                };
                if let Some(step) = steps.get(level as usize) {
                    return *step;
                }

                let last_index = (steps.len() - 1) as u32;
                let mut duration = *last;
                for _ in 0..(level - last_index) {
                    match duration.checked_mul(2) {
                        Some(doubled) => duration = doubled,
                        None => return Duration::MAX,
                    }
                }
                duration
            }
        }
    }

    /// Longest explicitly configured duration.
    pub fn longest_step(&self) -> Duration {
        match self {
            Self::Flat(duration) => *duration,
            Self::Escalating(steps) => steps.iter().copied().max().unwrap_or_else(Duration::zero),
        }
    }
}

/// Inactivity rule that forgives part of a key's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecayRule {
    /// Inactivity after which the next failure starts a fresh grace window
    pub after: Duration,
    /// Level a previously locked key resumes from, regardless of how high it was
    pub resume_level: u32,
}

impl Default for DecayRule {
    fn default() -> Self {
        Self {
            after: Duration::hours(24),
            resume_level: 1,
        }
    }
}

/// Configuration for one lockout limiter instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockoutConfig {
    /// Whether the limiter is enabled
    pub enabled: bool,
    /// Grace window for a fresh or decayed key
    pub max_attempts: u32,
    /// Grace window after a lock expires naturally
    pub rearm_attempts: u32,
    /// Lock durations
    pub schedule: DurationSchedule,
    /// Streak window after which the attempt counter restarts
    pub attempt_window: Option<Duration>,
    /// Long-inactivity forgiveness
    pub decay: Option<DecayRule>,
    /// Inactive states older than this are swept
    pub retention_period: Duration,
    /// How often the cleanup sweeper runs
    pub cleanup_interval: std::time::Duration,
}

/// Cleanup runs hourly by default
const DEFAULT_CLEANUP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(3600);

impl Default for LockoutConfig {
    fn default() -> Self {
        Self::identity_default()
    }
}

impl LockoutConfig {
    /// Flat policy: `max_attempts` failures within `lockout_period` lock the key
    /// for `lockout_period`.
    pub fn flat(max_attempts: u32, lockout_period: Duration) -> Self {
        let schedule = DurationSchedule::Flat(lockout_period);
        let attempt_window = Some(lockout_period);
        Self {
            enabled: true,
            max_attempts,
            rearm_attempts: max_attempts,
            retention_period: default_retention(&schedule, attempt_window, None),
            schedule,
            attempt_window,
            decay: None,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }

    /// Identity-keyed defaults: 5 attempts, 15 minute lockout.
    pub fn identity_default() -> Self {
        Self::flat(5, Duration::minutes(15))
    }

    /// Address-keyed defaults: 5 attempts, then 2 after each lock, escalating
    /// durations and 24 hour decay.
    pub fn escalating() -> Self {
        let schedule = DurationSchedule::escalating_default();
        let decay = Some(DecayRule::default());
        Self {
            enabled: true,
            max_attempts: 5,
            rearm_attempts: 2,
            retention_period: default_retention(&schedule, None, decay),
            schedule,
            attempt_window: None,
            decay,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }

    /// A limiter that never records and never blocks.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::identity_default()
        }
    }

    /// Upper bound of `attempts_remaining` for this instance.
    pub fn ceiling(&self) -> u32 {
        self.max_attempts.max(self.rearm_attempts)
    }

    /// Lock duration for a lock triggered at `level`.
    pub fn lockout_duration(&self, level: u32) -> Duration {
        self.schedule.duration_for(level)
    }

    pub fn with_retention_period(mut self, retention_period: Duration) -> Self {
        self.retention_period = retention_period;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: std::time::Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }
}

/// Twice the longest window any rule looks back over.
fn default_retention(
    schedule: &DurationSchedule,
    attempt_window: Option<Duration>,
    decay: Option<DecayRule>,
) -> Duration {
    let longest = [
        Some(schedule.longest_step()),
        attempt_window,
        decay.map(|rule| rule.after),
    ]
    .into_iter()
    .flatten()
    .max()
    .unwrap_or_else(Duration::zero);

    longest * 2
}
