//! Pure lockout state transitions.
//!
//! Every decision the engine makes is a function of the stored state, the
//! event, the limiter configuration and an injected `now`. Nothing here does
//! I/O, so the whole state machine is tested without storage or wall clock.
//!
//! Branch order on a failure:
//!
//! 1. A stored lock still in force: keep it, refresh `last_attempt_at`.
//! 2. A stored lock that has run out: re-arm with `rearm_attempts`, keep the level.
//! 3. No stored lock: apply decay (long inactivity) and the streak window.
//!
//! Then the attempt is counted and, on exhaustion, a new lock is scheduled.
//! Decay is only consulted when no lock is stored, so a `check` that
//! normalizes an expired lock first changes which rule the next failure sees.

use chrono::{DateTime, Utc};

use crate::{
    Error,
    storage::{LockStatus, LockoutConfig, LockoutState, LockoutStatus, seconds_until},
};

/// What happened to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyEvent {
    /// A pre-authentication check; never counts as an attempt
    Check,
    /// Bad credentials
    Failure,
    /// Good credentials
    Success,
}

/// The change a policy decision makes to the stored state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    Put(LockoutState),
    Delete,
}

/// Compute the next stored state for `key`.
///
/// Returns [`Error::InvariantViolation`] if the stored state is inconsistent
/// with `config`; callers must fail closed.
pub fn transition(
    config: &LockoutConfig,
    key: &str,
    current: Option<&LockoutState>,
    event: PolicyEvent,
    now: DateTime<Utc>,
) -> Result<Transition, Error> {
    match event {
        PolicyEvent::Check => {
            let Some(state) = current else {
                return Ok(Transition::Unchanged);
            };
            let clamped = clamp_to_ceiling(config, state);
            let state = clamped.as_ref().unwrap_or(state);
            validate(config, state)?;
            if state.lock_expired_at(now) {
                Ok(Transition::Put(rearm(config, state.clone(), now)))
            } else if let Some(clamped) = clamped {
                Ok(Transition::Put(clamped))
            } else {
                Ok(Transition::Unchanged)
            }
        }
        PolicyEvent::Failure => {
            let clamped = current.and_then(|state| clamp_to_ceiling(config, state));
            let current = clamped.as_ref().or(current);
            if let Some(state) = current {
                validate(config, state)?;
            }
            Ok(Transition::Put(record_failure(config, key, current, now)))
        }
        // A corrupt record must not survive a successful login, so no validation here
        PolicyEvent::Success => Ok(match current {
            Some(_) => Transition::Delete,
            None => Transition::Unchanged,
        }),
    }
}

fn record_failure(
    config: &LockoutConfig,
    key: &str,
    current: Option<&LockoutState>,
    now: DateTime<Utc>,
) -> LockoutState {
    let mut state = current
        .cloned()
        .unwrap_or_else(|| LockoutState::new(key, config.max_attempts, now));

    match state.locked_until {
        Some(until) if now < until => {
            state.last_attempt_at = now;
            return state;
        }
        Some(_) => state = rearm(config, state, now),
        None => {
            if let Some(decay) = config.decay {
                if now - state.last_attempt_at > decay.after {
                    if state.lockout_level > 0 {
                        state.lockout_level = decay.resume_level;
                    }
                    state.attempts_remaining = config.max_attempts;
                    state.window_started_at = now;
                }
            }
            if let Some(window) = config.attempt_window {
                if now - state.window_started_at > window {
                    state.attempts_remaining = config.max_attempts;
                    state.window_started_at = now;
                }
            }
        }
    }

    state.attempts_remaining = state.attempts_remaining.saturating_sub(1);
    state.last_attempt_at = now;

    if state.attempts_remaining == 0 {
        let duration = config.lockout_duration(state.lockout_level);
        let until = now
            .checked_add_signed(duration)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        state.locked_until = Some(until);
        state.lockout_level = state.lockout_level.saturating_add(1);
    }

    state
}

/// Open a new grace window after a lock has run out. The level is kept so the
/// next lock keeps escalating.
fn rearm(config: &LockoutConfig, mut state: LockoutState, now: DateTime<Utc>) -> LockoutState {
    state.attempts_remaining = config.rearm_attempts;
    state.locked_until = None;
    state.window_started_at = now;
    state
}

/// An unlocked record counting more attempts than `config` allows, left over
/// from a larger `max_attempts`, is brought down to the ceiling.
fn clamp_to_ceiling(config: &LockoutConfig, state: &LockoutState) -> Option<LockoutState> {
    (state.locked_until.is_none() && state.attempts_remaining > config.ceiling()).then(|| {
        let mut state = state.clone();
        state.attempts_remaining = config.ceiling();
        state
    })
}

/// Check the stored-state invariants against `config`.
pub fn validate(config: &LockoutConfig, state: &LockoutState) -> Result<(), Error> {
    if state.attempts_remaining > config.ceiling() {
        return Err(Error::InvariantViolation(format!(
            "attempts_remaining {} above ceiling {} for key {}",
            state.attempts_remaining,
            config.ceiling(),
            state.key
        )));
    }
    match (state.attempts_remaining, state.locked_until) {
        (0, None) => Err(Error::InvariantViolation(format!(
            "key {} has no attempts remaining but no lock",
            state.key
        ))),
        (1.., Some(_)) => Err(Error::InvariantViolation(format!(
            "key {} is locked with {} attempts remaining",
            state.key, state.attempts_remaining
        ))),
        _ => Ok(()),
    }
}

/// The caller-facing view of `current` at `now`, without changing anything.
pub fn evaluate(
    config: &LockoutConfig,
    key: &str,
    current: Option<&LockoutState>,
    now: DateTime<Utc>,
) -> LockoutStatus {
    let Some(state) = current else {
        return LockoutStatus::unlocked(key, config.max_attempts);
    };

    match state.locked_until {
        Some(until) if now < until => LockoutStatus::locked(key, until, now),
        Some(_) => LockoutStatus::unlocked(key, config.rearm_attempts),
        None => LockoutStatus::unlocked(key, state.attempts_remaining),
    }
}

/// Whether `current` is locked at `now`. Never reports a lock past `locked_until`.
pub fn lock_status(current: Option<&LockoutState>, now: DateTime<Utc>) -> LockStatus {
    match current.and_then(|state| state.locked_until) {
        Some(until) if now < until => LockStatus {
            locked: true,
            remaining_seconds: Some(seconds_until(until, now)),
        },
        _ => LockStatus {
            locked: false,
            remaining_seconds: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const KEY: &str = "1.2.3.4";

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn fail(
        config: &LockoutConfig,
        state: Option<&LockoutState>,
        now: DateTime<Utc>,
    ) -> LockoutState {
        match transition(config, KEY, state, PolicyEvent::Failure, now).unwrap() {
            Transition::Put(state) => state,
            other => panic!("failure must store a state, got {other:?}"),
        }
    }

    fn check(config: &LockoutConfig, state: LockoutState, now: DateTime<Utc>) -> LockoutState {
        match transition(config, KEY, Some(&state), PolicyEvent::Check, now).unwrap() {
            Transition::Put(state) => state,
            Transition::Unchanged => state,
            Transition::Delete => panic!("check never deletes"),
        }
    }

    fn fail_times(
        config: &LockoutConfig,
        mut state: Option<LockoutState>,
        times: u32,
        now: DateTime<Utc>,
    ) -> LockoutState {
        for _ in 0..times {
            state = Some(fail(config, state.as_ref(), now));
        }
        state.unwrap()
    }

    #[test]
    fn test_first_failure_creates_state() {
        let config = LockoutConfig::escalating();
        let state = fail(&config, None, start());

        assert_eq!(state.key, KEY);
        assert_eq!(state.attempts_remaining, 4);
        assert_eq!(state.lockout_level, 0);
        assert_eq!(state.locked_until, None);
        assert_eq!(state.last_attempt_at, start());
    }

    #[test]
    fn test_fifth_failure_locks_for_one_minute() {
        let config = LockoutConfig::escalating();
        let state = fail_times(&config, None, 5, start());

        assert_eq!(state.attempts_remaining, 0);
        assert_eq!(state.lockout_level, 1);
        assert_eq!(state.locked_until, Some(start() + Duration::minutes(1)));
    }

    #[test]
    fn test_failure_while_locked_keeps_lock() {
        let config = LockoutConfig::escalating();
        let locked = fail_times(&config, None, 5, start());
        let later = start() + Duration::seconds(30);
        let state = fail(&config, Some(&locked), later);

        assert_eq!(state.locked_until, locked.locked_until);
        assert_eq!(state.lockout_level, 1);
        assert_eq!(state.attempts_remaining, 0);
        assert_eq!(state.last_attempt_at, later);
    }

    #[test]
    fn test_expired_lock_grants_two_attempts_and_keeps_level() {
        let config = LockoutConfig::escalating();
        let locked = fail_times(&config, None, 5, start());
        let now = start() + Duration::minutes(2);

        let rearmed = check(&config, locked, now);
        assert_eq!(rearmed.attempts_remaining, 2);
        assert_eq!(rearmed.lockout_level, 1);
        assert_eq!(rearmed.locked_until, None);

        let once = fail(&config, Some(&rearmed), now);
        assert_eq!(once.attempts_remaining, 1);
        assert_eq!(once.locked_until, None);

        let twice = fail(&config, Some(&once), now);
        assert_eq!(twice.attempts_remaining, 0);
        assert_eq!(twice.lockout_level, 2);
        assert_eq!(twice.locked_until, Some(now + Duration::minutes(3)));
    }

    #[test]
    fn test_failure_on_expired_lock_rearms_without_check() {
        let config = LockoutConfig::escalating();
        let locked = fail_times(&config, None, 5, start());
        let now = start() + Duration::minutes(5);

        let state = fail(&config, Some(&locked), now);
        assert_eq!(state.attempts_remaining, 1);
        assert_eq!(state.lockout_level, 1);
    }

    #[test]
    fn test_expired_lock_takes_precedence_over_decay() {
        let config = LockoutConfig::escalating();
        let locked = fail_times(&config, None, 5, start());
        let now = start() + Duration::hours(30);

        // The stored lock is examined first, so the rearm grant of 2 wins
        let state = fail(&config, Some(&locked), now);
        assert_eq!(state.attempts_remaining, 1);
        assert_eq!(state.lockout_level, 1);
    }

    #[test]
    fn test_decay_after_normalized_lock_resumes_at_level_one() {
        let config = LockoutConfig::escalating();
        let mut now = start();
        let mut state = fail_times(&config, None, 5, now);
        for _ in 0..2 {
            now = state.locked_until.unwrap();
            state = check(&config, state, now);
            state = fail_times(&config, Some(state), 2, now);
        }
        assert_eq!(state.lockout_level, 3);

        now = state.last_attempt_at + Duration::hours(25);
        state = check(&config, state, now);
        assert_eq!(state.attempts_remaining, 2);

        state = fail(&config, Some(&state), now);
        assert_eq!(state.attempts_remaining, 4);
        assert_eq!(state.lockout_level, 1);

        state = fail_times(&config, Some(state), 4, now);
        assert_eq!(state.lockout_level, 2);
        assert_eq!(state.locked_until, Some(now + Duration::minutes(3)));
    }

    #[test]
    fn test_decay_without_prior_lock_only_resets_attempts() {
        let config = LockoutConfig::escalating();
        let state = fail_times(&config, None, 3, start());
        assert_eq!(state.attempts_remaining, 2);

        let state = fail(&config, Some(&state), start() + Duration::hours(25));
        assert_eq!(state.attempts_remaining, 4);
        assert_eq!(state.lockout_level, 0);
    }

    #[test]
    fn test_no_decay_within_a_day() {
        let config = LockoutConfig::escalating();
        let state = fail_times(&config, None, 3, start());
        let state = fail(&config, Some(&state), start() + Duration::hours(23));
        assert_eq!(state.attempts_remaining, 1);
    }

    #[test]
    fn test_escalation_sequence() {
        let config = LockoutConfig::escalating();
        let mut now = start();
        let mut state = fail_times(&config, None, 5, now);
        let mut minutes = vec![(state.locked_until.unwrap() - now).num_minutes()];

        for _ in 0..14 {
            // Keep hammering during the lock so locks longer than a day do not decay
            let until = state.locked_until.unwrap();
            state = fail(&config, Some(&state), until - Duration::seconds(1));
            now = until;
            state = check(&config, state, now);
            state = fail_times(&config, Some(state), 2, now);
            minutes.push((state.locked_until.unwrap() - now).num_minutes());
        }

        assert_eq!(
            minutes,
            vec![
                1, 3, 5, 10, 15, 30, 60, 120, 240, 480, 960, 1920, 3840, 7680, 15360
            ]
        );
        assert_eq!(state.lockout_level, 15);
    }

    #[test]
    fn test_flat_policy_locks_for_fixed_duration() {
        let config = LockoutConfig::flat(3, Duration::minutes(15));
        let mut now = start();
        let state = fail_times(&config, None, 3, now);
        assert_eq!(state.locked_until, Some(now + Duration::minutes(15)));

        now += Duration::minutes(15);
        let state = check(&config, state, now);
        assert_eq!(state.attempts_remaining, 3);

        let state = fail_times(&config, Some(state), 3, now);
        assert_eq!(state.locked_until, Some(now + Duration::minutes(15)));
        assert_eq!(state.lockout_level, 2);
    }

    #[test]
    fn test_flat_policy_window_restarts_counter() {
        let config = LockoutConfig::flat(5, Duration::minutes(15));
        let state = fail_times(&config, None, 4, start());
        assert_eq!(state.attempts_remaining, 1);

        let later = start() + Duration::minutes(16);
        let state = fail(&config, Some(&state), later);
        assert_eq!(state.attempts_remaining, 4);
        assert_eq!(state.window_started_at, later);
        assert_eq!(state.locked_until, None);
    }

    #[test]
    fn test_attempts_stay_within_bounds() {
        for config in [
            LockoutConfig::escalating(),
            LockoutConfig::flat(5, Duration::minutes(15)),
        ] {
            let mut now = start();
            let mut state: Option<LockoutState> = None;
            for step in 0..200 {
                let next = fail(&config, state.as_ref(), now);
                assert!(next.attempts_remaining <= config.ceiling());
                assert!(validate(&config, &next).is_ok());
                state = Some(next);
                now += Duration::seconds(step * 7);
            }
        }
    }

    #[test]
    fn test_success_deletes_state() {
        let config = LockoutConfig::escalating();
        let state = fail_times(&config, None, 5, start());
        let result =
            transition(&config, KEY, Some(&state), PolicyEvent::Success, start()).unwrap();
        assert_eq!(result, Transition::Delete);

        let result = transition(&config, KEY, None, PolicyEvent::Success, start()).unwrap();
        assert_eq!(result, Transition::Unchanged);
    }

    #[test]
    fn test_invariant_violation_detected() {
        let config = LockoutConfig::escalating();
        let mut state = LockoutState::new(KEY, 0, start());
        let result = transition(&config, KEY, Some(&state), PolicyEvent::Failure, start());
        assert!(matches!(result, Err(Error::InvariantViolation(_))));

        state.attempts_remaining = 3;
        state.locked_until = Some(start() + Duration::minutes(1));
        let result = transition(&config, KEY, Some(&state), PolicyEvent::Check, start());
        assert!(matches!(result, Err(Error::InvariantViolation(_))));

        // Success still clears a corrupt record
        let result = transition(&config, KEY, Some(&state), PolicyEvent::Success, start());
        assert_eq!(result.unwrap(), Transition::Delete);
    }

    #[test]
    fn test_lowered_max_attempts_clamps_stored_count() {
        let generous = LockoutConfig::flat(10, Duration::minutes(5));
        let stored = fail(&generous, None, start());
        assert_eq!(stored.attempts_remaining, 9);

        let config = LockoutConfig::flat(3, Duration::minutes(5));
        let result = transition(&config, KEY, Some(&stored), PolicyEvent::Check, start()).unwrap();
        match result {
            Transition::Put(state) => assert_eq!(state.attempts_remaining, 3),
            other => panic!("expected clamped state, got {other:?}"),
        }

        let state = fail(&config, Some(&stored), start());
        assert_eq!(state.attempts_remaining, 2);

        // A lock is never clamped away
        let locked = fail_times(&config, Some(state), 2, start());
        let result = transition(&config, KEY, Some(&locked), PolicyEvent::Check, start()).unwrap();
        assert_eq!(result, Transition::Unchanged);
    }

    #[test]
    fn test_evaluate_views() {
        let config = LockoutConfig::escalating();
        assert_eq!(
            evaluate(&config, KEY, None, start()),
            LockoutStatus::unlocked(KEY, 5)
        );

        let locked = fail_times(&config, None, 5, start());
        let status = evaluate(&config, KEY, Some(&locked), start() + Duration::seconds(20));
        assert!(!status.allowed);
        assert_eq!(status.remaining_seconds, Some(40));

        let status = evaluate(&config, KEY, Some(&locked), start() + Duration::minutes(1));
        assert!(status.allowed);
        assert_eq!(status.remaining_attempts, 2);
    }

    #[test]
    fn test_lock_status_never_reports_past_expiry() {
        let config = LockoutConfig::escalating();
        let locked = fail_times(&config, None, 5, start());

        let status = lock_status(Some(&locked), start());
        assert!(status.locked);
        assert_eq!(status.remaining_seconds, Some(60));

        let status = lock_status(Some(&locked), start() + Duration::minutes(1));
        assert!(!status.locked);
        assert_eq!(status.remaining_seconds, None);
    }
}
