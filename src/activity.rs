//! Activity trail sink
//!
//! Security-relevant auth events are written to a write-only sink. The
//! default sink emits them as structured tracing events under the
//! `activity` target.

use crate::auth::Role;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ActivityEvent {
    Registered { user_id: Uuid, role: Role },
    LoginSucceeded { user_id: Uuid },
    LoginFailed { user_id: Option<Uuid> },
    AccountLocked { user_id: Uuid, until: DateTime<Utc> },
    AccountUnlocked { user_id: Uuid, by: Uuid },
    PasswordResetRequested { user_id: Uuid },
    PasswordResetCompleted { user_id: Uuid },
    PasswordChanged { user_id: Uuid },
    RoleChanged { user_id: Uuid, role: Role, by: Uuid },
    StatusChanged { user_id: Uuid, is_active: bool, by: Uuid },
}

pub trait ActivitySink: Send + Sync {
    fn record(&self, event: ActivityEvent);
}

#[derive(Debug, Default)]
pub struct TracingActivitySink;

impl ActivitySink for TracingActivitySink {
    fn record(&self, event: ActivityEvent) {
        let payload = serde_json::to_string(&event).unwrap_or_default();
        match event {
            ActivityEvent::LoginFailed { .. } | ActivityEvent::AccountLocked { .. } => {
                warn!(target: "activity", %payload, "auth activity");
            }
            _ => info!(target: "activity", %payload, "auth activity"),
        }
    }
}

/// Captures events in memory
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryActivitySink {
    events: std::sync::Mutex<Vec<ActivityEvent>>,
}

#[cfg(test)]
impl MemoryActivitySink {
    pub fn events(&self) -> Vec<ActivityEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl ActivitySink for MemoryActivitySink {
    fn record(&self, event: ActivityEvent) {
        self.events.lock().unwrap().push(event);
    }
}
