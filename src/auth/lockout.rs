//! Progressive account lockout
//!
//! Per-identity state machine:
//!
//! - `Unlocked(attempts)`: each failed check increments `attempts`; reaching
//!   the threshold moves to `Locked(now + lock_duration)`.
//! - `Locked(until)`: every check is rejected before the password is looked
//!   at. Once `until` has passed the state is read as `Unlocked(0)`; expiry is
//!   lazy, nothing sweeps stale locks.
//! - Any successful check resets to `Unlocked(0)`.
//!
//! The policy itself is pure. Callers serialize the read-modify-write of the
//! stored counters through [`IdentityLocks`].

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Stored lockout fields of an identity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockoutState {
    pub attempts: u32,
    pub lock_until: Option<DateTime<Utc>>,
}

/// Effective state at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Unlocked { attempts: u32 },
    Locked { until: DateTime<Utc> },
}

/// Outcome of recording a failed credential check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Still unlocked; this many attempts are left before the lock engages
    Remaining(u32),
    /// This failure engaged the lock
    Locked { until: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy)]
pub struct LockoutPolicy {
    max_attempts: u32,
    lock_duration: Duration,
}

impl LockoutPolicy {
    pub fn new(max_attempts: u32, lock_duration: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            lock_duration,
        }
    }

    pub fn status(&self, state: &LockoutState, now: DateTime<Utc>) -> LockStatus {
        match state.lock_until {
            Some(until) if now < until => LockStatus::Locked { until },
            // An elapsed lock starts a fresh cycle.
            Some(_) => LockStatus::Unlocked { attempts: 0 },
            None => LockStatus::Unlocked {
                attempts: state.attempts,
            },
        }
    }

    /// Apply a failed credential check. Must not be called while locked.
    pub fn register_failure(
        &self,
        state: &LockoutState,
        now: DateTime<Utc>,
    ) -> (LockoutState, FailureOutcome) {
        let attempts = match self.status(state, now) {
            LockStatus::Unlocked { attempts } => attempts,
            LockStatus::Locked { until } => {
                return (*state, FailureOutcome::Locked { until });
            }
        }
        .saturating_add(1);

        if attempts >= self.max_attempts {
            let until = now + self.lock_duration;
            (
                LockoutState {
                    attempts,
                    lock_until: Some(until),
                },
                FailureOutcome::Locked { until },
            )
        } else {
            (
                LockoutState {
                    attempts,
                    lock_until: None,
                },
                FailureOutcome::Remaining(self.max_attempts - attempts),
            )
        }
    }

    pub fn register_success(&self) -> LockoutState {
        LockoutState::default()
    }
}

/// Per-identity async mutexes guarding lockout and reset-token updates
#[derive(Debug, Default)]
pub struct IdentityLocks {
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl IdentityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `id`'s security fields
    pub async fn acquire(&self, id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Drop entries nobody holds so the map tracks only live contention.
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks.entry(id).or_default().clone()
        };
        lock.lock_owned().await
    }
}
