//! Authentication and authorization module
//!
//! Provides JWT-based authentication, progressive account lockout, password
//! reset and role-based access control.

mod clock;
mod jwt;
mod lockout;
mod middleware;
mod password;
mod permissions;
mod reset;
mod service;

pub use clock::{Clock, SystemClock};
pub use jwt::{IssuedToken, TokenIssuer, TokenPair, TokenType};
pub use lockout::{FailureOutcome, IdentityLocks, LockStatus, LockoutPolicy, LockoutState};
pub use middleware::{auth_middleware, require_capability, require_role, AuthContext};
pub use password::{PasswordHasher, DEFAULT_BCRYPT_COST};
pub use permissions::{Capability, PermissionMatrix};
pub use reset::{LogResetDelivery, ResetDelivery, ResetTicket};
pub use service::{AuthService, Registration};

#[cfg(test)]
pub use clock::FixedClock;
#[cfg(test)]
pub use reset::MemoryResetDelivery;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// User roles for authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Full access, including user and settings management
    Admin,
    /// Sees and converts the whole team's pipeline
    Manager,
    /// Works their own leads and deals
    Sales,
    /// Read-only access to leads for customer support
    Support,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Admin, Role::Manager, Role::Sales, Role::Support];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Sales => "sales",
            Role::Support => "support",
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::Sales
    }
}

impl FromStr for Role {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| AuthError::UnknownRole(s.to_string()))
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authentication and authorization failures
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials { attempts_remaining: Option<u32> },

    #[error("Account is locked until {until}")]
    Locked { until: DateTime<Utc> },

    #[error("Account is deactivated")]
    Inactive,

    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Invalid token")]
    TokenInvalid,

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid or expired reset token")]
    InvalidOrExpiredToken,

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_parse_from_their_wire_names() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
    }

    #[test]
    fn unknown_roles_are_rejected() {
        for raw in ["superadmin", "Admin", "", " sales"] {
            assert!(matches!(raw.parse::<Role>(), Err(AuthError::UnknownRole(_))));
        }
    }

    #[test]
    fn serde_rejects_unknown_role() {
        assert!(serde_json::from_str::<Role>("\"owner\"").is_err());
        assert_eq!(serde_json::from_str::<Role>("\"manager\"").unwrap(), Role::Manager);
    }
}
