//! User-facing account DTOs

use crate::auth::{Capability, Role};
use crate::users::Identity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// User response (without sensitive data)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&Identity> for UserResponse {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id,
            email: identity.email.clone(),
            name: identity.name.clone(),
            role: identity.role,
            is_active: identity.is_active,
            last_login_at: identity.last_login_at,
            created_at: identity.created_at,
        }
    }
}

/// Admin view that also exposes lockout state
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedUserResponse {
    #[serde(flatten)]
    pub user: UserResponse,
    pub login_attempts: u32,
    pub lock_until: Option<DateTime<Utc>>,
}

impl From<&Identity> for ManagedUserResponse {
    fn from(identity: &Identity) -> Self {
        Self {
            user: UserResponse::from(identity),
            login_attempts: identity.login_attempts,
            lock_until: identity.lock_until,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub success: bool,
    pub user: UserResponse,
    pub permissions: BTreeMap<Capability, bool>,
}

#[derive(Debug, Serialize)]
pub struct UserEnvelope {
    pub success: bool,
    pub user: ManagedUserResponse,
}

#[derive(Debug, Serialize)]
pub struct UsersListResponse {
    pub success: bool,
    pub users: Vec<ManagedUserResponse>,
}

/// Raw role string; parsed against the closed role set by the handler
#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub role: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequest {
    pub is_active: bool,
}
