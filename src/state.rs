//! Application state management
//!
//! Contains shared state accessible across all handlers. Everything here is
//! built once at start-up; the permission matrix in particular is never
//! mutated after construction.

use crate::activity::{ActivitySink, TracingActivitySink};
use crate::auth::{AuthService, Clock, PermissionMatrix, ResetDelivery, SystemClock};
use crate::config::AuthConfig;
use crate::users::CredentialStore;
use std::sync::Arc;

/// Application state shared across all handlers
pub struct AppState {
    /// Login, token, lockout and reset operations
    pub auth: AuthService,

    /// Role → capability table
    pub permissions: PermissionMatrix,

    /// Cookie names and token lifetimes used by the HTTP layer
    pub auth_config: AuthConfig,
}

impl AppState {
    pub fn new(
        auth_config: AuthConfig,
        store: Arc<dyn CredentialStore>,
        reset_delivery: Arc<dyn ResetDelivery>,
    ) -> Self {
        Self::with_parts(
            auth_config,
            store,
            Arc::new(SystemClock),
            Arc::new(TracingActivitySink),
            reset_delivery,
        )
    }

    pub fn with_parts(
        auth_config: AuthConfig,
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
        activity: Arc<dyn ActivitySink>,
        reset_delivery: Arc<dyn ResetDelivery>,
    ) -> Self {
        let auth = AuthService::new(&auth_config, store, clock, activity, reset_delivery);

        Self {
            auth,
            permissions: PermissionMatrix::new(),
            auth_config,
        }
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
