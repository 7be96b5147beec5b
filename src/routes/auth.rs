//! Authentication route handlers
//!
//! Provides login, register, refresh, logout, password reset and profile
//! endpoints. Tokens are returned in the body and also set as HttpOnly
//! cookies for browser clients.

use crate::auth::{AuthContext, Registration, Role};
use crate::config::AuthConfig;
use crate::error::{validation_error, ApiResult, AppError};
use crate::models::{
    AccessTokenResponse, AuthResponse, ChangePasswordRequest, ForgotPasswordRequest,
    LoginRequest, MeResponse, MessageResponse, RefreshRequest, RegisterRequest,
    ResetPasswordRequest, UserResponse,
};
use crate::state::SharedState;
use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use tracing::debug;
use validator::Validate;

/// The refresh cookie is only sent to the auth endpoints
const REFRESH_COOKIE_PATH: &str = "/api/auth";

const RESET_REQUESTED_MESSAGE: &str =
    "If an account exists for that email, a password reset link has been sent";

fn auth_cookie(name: &str, value: String, path: &'static str, secure: bool) -> Cookie<'static> {
    Cookie::build((name.to_string(), value))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path(path)
        .build()
}

/// Removal cookie sent whether or not the request carried the original
fn expired_cookie(name: &str, path: &'static str, secure: bool) -> Cookie<'static> {
    let mut cookie = auth_cookie(name, String::new(), path, secure);
    cookie.make_removal();
    cookie
}

fn with_token_cookies(
    jar: CookieJar,
    config: &AuthConfig,
    access: String,
    refresh: Option<String>,
) -> CookieJar {
    let jar = jar.add(auth_cookie(
        &config.access_cookie_name,
        access,
        "/",
        config.cookie_secure,
    ));
    match refresh {
        Some(refresh) => jar.add(auth_cookie(
            &config.refresh_cookie_name,
            refresh,
            REFRESH_COOKIE_PATH,
            config.cookie_secure,
        )),
        None => jar,
    }
}

/// POST /api/auth/login
///
/// Authenticate with email and password, receive JWT tokens.
pub async fn login(
    State(state): State<SharedState>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> ApiResult<(CookieJar, Json<AuthResponse>)> {
    req.validate().map_err(|e| validation_error(e.to_string()))?;

    let success = state.auth.login(&req.email, &req.password).await?;

    let jar = with_token_cookies(
        jar,
        &state.auth_config,
        success.tokens.access_token.clone(),
        Some(success.tokens.refresh_token.clone()),
    );

    Ok((
        jar,
        Json(AuthResponse {
            success: true,
            user: UserResponse::from(&success.identity),
            tokens: success.tokens,
        }),
    ))
}

/// POST /api/auth/register
///
/// Register a new account. Self-registered users get the sales role; other
/// roles are assigned by an administrator.
pub async fn register(
    State(state): State<SharedState>,
    jar: CookieJar,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, CookieJar, Json<AuthResponse>)> {
    req.validate().map_err(|e| validation_error(e.to_string()))?;

    let identity = state
        .auth
        .register(Registration {
            email: req.email,
            password: req.password,
            name: req.name.trim().to_string(),
            role: Role::default(),
        })
        .await?;

    let tokens = state.auth.issue_pair(identity.id)?;
    let jar = with_token_cookies(
        jar,
        &state.auth_config,
        tokens.access_token.clone(),
        Some(tokens.refresh_token.clone()),
    );

    Ok((
        StatusCode::CREATED,
        jar,
        Json(AuthResponse {
            success: true,
            user: UserResponse::from(&identity),
            tokens,
        }),
    ))
}

/// POST /api/auth/refresh
///
/// Exchange a refresh token (body or cookie) for a new access token.
pub async fn refresh(
    State(state): State<SharedState>,
    jar: CookieJar,
    body: Bytes,
) -> ApiResult<(CookieJar, Json<AccessTokenResponse>)> {
    let req: RefreshRequest = if body.is_empty() {
        RefreshRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| validation_error(e.to_string()))?
    };

    let refresh_token = req
        .refresh_token
        .filter(|t| !t.is_empty())
        .or_else(|| {
            jar.get(&state.auth_config.refresh_cookie_name)
                .map(|c| c.value().to_string())
        })
        .ok_or_else(|| AppError::Unauthorized("Refresh token required".to_string()))?;

    let access = state.auth.refresh(&refresh_token).await?;
    let jar = with_token_cookies(jar, &state.auth_config, access.token.clone(), None);

    Ok((
        jar,
        Json(AccessTokenResponse {
            success: true,
            access_token: access.token,
            token_type: "Bearer".to_string(),
            expires_at: access.expires_at,
        }),
    ))
}

/// POST /api/auth/logout
///
/// Clears the auth cookies. Issued tokens remain valid until they expire.
pub async fn logout(
    State(state): State<SharedState>,
    jar: CookieJar,
) -> (CookieJar, Json<MessageResponse>) {
    let config = &state.auth_config;
    let jar = jar
        .add(expired_cookie(&config.access_cookie_name, "/", config.cookie_secure))
        .add(expired_cookie(
            &config.refresh_cookie_name,
            REFRESH_COOKIE_PATH,
            config.cookie_secure,
        ));

    (jar, Json(MessageResponse::new("Logged out")))
}

/// POST /api/auth/forgot-password
///
/// Always answers with the same message whether or not the email is known.
pub async fn forgot_password(
    State(state): State<SharedState>,
    Json(req): Json<ForgotPasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    req.validate().map_err(|e| validation_error(e.to_string()))?;

    state.auth.request_password_reset(&req.email).await?;

    Ok(Json(MessageResponse::new(RESET_REQUESTED_MESSAGE)))
}

/// POST /api/auth/reset-password
pub async fn reset_password(
    State(state): State<SharedState>,
    Json(req): Json<ResetPasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    req.validate().map_err(|e| validation_error(e.to_string()))?;

    state
        .auth
        .redeem_password_reset(&req.token, &req.password)
        .await?;

    Ok(Json(MessageResponse::new(
        "Password has been reset, please log in",
    )))
}

/// GET /api/auth/me
///
/// Current user profile and the capabilities granted by their role.
pub async fn me(State(state): State<SharedState>, ctx: AuthContext) -> ApiResult<Json<MeResponse>> {
    let identity = state
        .auth
        .store()
        .find_by_id(ctx.id)
        .await?
        .ok_or_else(|| AppError::Unauthorized("User not found".to_string()))?;

    Ok(Json(MeResponse {
        success: true,
        user: UserResponse::from(&identity),
        permissions: state.permissions.grants_for(identity.role),
    }))
}

/// PUT /api/auth/password
pub async fn change_password(
    State(state): State<SharedState>,
    ctx: AuthContext,
    Json(req): Json<ChangePasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    req.validate().map_err(|e| validation_error(e.to_string()))?;

    state
        .auth
        .change_password(&ctx, &req.current_password, &req.new_password)
        .await?;
    debug!(user_id = %ctx.id, "Password changed");

    Ok(Json(MessageResponse::new("Password updated")))
}
