//! User administration handlers
//!
//! Every handler here requires `canManageUsers`.

use crate::auth::{require_capability, require_role, AuthContext, Capability, Role};
use crate::error::ApiResult;
use crate::models::{
    ManagedUserResponse, UpdateRoleRequest, UpdateStatusRequest, UserEnvelope, UsersListResponse,
};
use crate::state::SharedState;
use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

fn envelope(identity: &crate::users::Identity) -> Json<UserEnvelope> {
    Json(UserEnvelope {
        success: true,
        user: ManagedUserResponse::from(identity),
    })
}

/// GET /api/users
pub async fn list_users(
    State(state): State<SharedState>,
    ctx: AuthContext,
) -> ApiResult<Json<UsersListResponse>> {
    require_capability(&state.permissions, &ctx, Capability::CanManageUsers)?;

    let users = state.auth.list_users().await?;

    Ok(Json(UsersListResponse {
        success: true,
        users: users.iter().map(ManagedUserResponse::from).collect(),
    }))
}

/// PUT /api/users/{id}/role
pub async fn update_role(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateRoleRequest>,
) -> ApiResult<Json<UserEnvelope>> {
    require_capability(&state.permissions, &ctx, Capability::CanManageUsers)?;

    let role: Role = req.role.parse()?;
    // Only admins may grant the admin role
    if role == Role::Admin {
        require_role(&ctx, &[Role::Admin])?;
    }
    let identity = state.auth.update_role(&ctx, id, role).await?;

    Ok(envelope(&identity))
}

/// PUT /api/users/{id}/status
pub async fn update_status(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateStatusRequest>,
) -> ApiResult<Json<UserEnvelope>> {
    require_capability(&state.permissions, &ctx, Capability::CanManageUsers)?;

    let identity = state.auth.set_active(&ctx, id, req.is_active).await?;

    Ok(envelope(&identity))
}

/// POST /api/users/{id}/unlock
pub async fn unlock(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<UserEnvelope>> {
    require_capability(&state.permissions, &ctx, Capability::CanManageUsers)?;

    let identity = state.auth.unlock(&ctx, id).await?;

    Ok(envelope(&identity))
}
