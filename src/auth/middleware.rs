//! Authentication middleware
//!
//! Extracts and validates access tokens from requests, then exposes the
//! caller as an [`AuthContext`] for handlers. Role and capability checks are
//! separate, side-effect free functions layered on top.

use crate::auth::{Capability, PermissionMatrix, Role};
use crate::error::AppError;
use crate::state::SharedState;
use crate::users::Identity;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Serialize;
use uuid::Uuid;

/// Authenticated caller attached to the request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthContext {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub is_active: bool,
}

impl From<&Identity> for AuthContext {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id,
            email: identity.email.clone(),
            role: identity.role,
            is_active: identity.is_active,
        }
    }
}

impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))
    }
}

/// Bearer token from the Authorization header, else the named cookie
pub fn extract_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.trim_start().split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
        .map(|(_, token)| token.trim())
        .filter(|t| !t.is_empty());

    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    CookieJar::from_headers(headers)
        .get(cookie_name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

/// Authenticate the request and insert its `AuthContext` into extensions
pub async fn auth_middleware(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_token(request.headers(), &state.auth_config.access_cookie_name)
        .ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))?;

    let ctx = state.auth.authenticate(&token).await?;

    request.extensions_mut().insert(ctx);

    Ok(next.run(request).await)
}

pub fn authorize_role(ctx: &AuthContext, allowed: &[Role]) -> bool {
    allowed.contains(&ctx.role)
}

pub fn authorize_capability(
    matrix: &PermissionMatrix,
    ctx: &AuthContext,
    capability: Capability,
) -> bool {
    matrix.has_permission(ctx.role, capability)
}

/// Require one of the listed roles
pub fn require_role(ctx: &AuthContext, allowed: &[Role]) -> Result<(), AppError> {
    if authorize_role(ctx, allowed) {
        return Ok(());
    }

    let allowed: Vec<_> = allowed.iter().map(Role::as_str).collect();
    Err(AppError::Forbidden(format!(
        "Requires role {}, you have {}",
        allowed.join(" or "),
        ctx.role
    )))
}

/// Require a capability from the permission matrix
pub fn require_capability(
    matrix: &PermissionMatrix,
    ctx: &AuthContext,
    capability: Capability,
) -> Result<(), AppError> {
    if authorize_capability(matrix, ctx, capability) {
        return Ok(());
    }

    Err(AppError::Forbidden(format!(
        "Your role ({}) does not grant {}",
        ctx.role, capability
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::test_app;
    use axum::{
        body::{to_bytes, Body},
        http::{header::COOKIE, Request as HttpRequest, StatusCode},
        middleware,
        routing::get,
        Router,
    };
    use chrono::Duration;
    use tower::ServiceExt;

    async fn view_all_leads(
        State(state): State<SharedState>,
        ctx: AuthContext,
    ) -> Result<&'static str, AppError> {
        require_capability(&state.permissions, &ctx, Capability::CanViewAllLeads)?;
        Ok("all leads")
    }

    async fn whoami(ctx: AuthContext) -> String {
        ctx.email
    }

    fn router(state: SharedState) -> Router {
        Router::new()
            .route("/leads", get(view_all_leads))
            .route("/whoami", get(whoami))
            .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
            .with_state(state)
    }

    fn get_with_bearer(uri: &str, token: &str) -> HttpRequest<Body> {
        HttpRequest::builder()
            .uri(uri)
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn ctx(role: Role) -> AuthContext {
        AuthContext {
            id: Uuid::new_v4(),
            email: "x@crm.test".to_string(),
            role,
            is_active: true,
        }
    }

    #[test]
    fn bearer_header_wins_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer from-header".parse().unwrap());
        headers.insert(COOKIE, "access_token=from-cookie".parse().unwrap());
        assert_eq!(
            extract_token(&headers, "access_token").as_deref(),
            Some("from-header")
        );
    }

    #[test]
    fn cookie_is_the_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, "theme=dark; access_token=from-cookie".parse().unwrap());
        assert_eq!(
            extract_token(&headers, "access_token").as_deref(),
            Some("from-cookie")
        );

        headers.insert(AUTHORIZATION, "Basic dXNlcjpwdw==".parse().unwrap());
        assert_eq!(
            extract_token(&headers, "access_token").as_deref(),
            Some("from-cookie")
        );
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        for value in ["bearer abc", "BEARER abc", "BeArEr   abc "] {
            let mut headers = HeaderMap::new();
            headers.insert(AUTHORIZATION, value.parse().unwrap());
            assert_eq!(extract_token(&headers, "access_token").as_deref(), Some("abc"));
        }

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearerabc".parse().unwrap());
        assert_eq!(extract_token(&headers, "access_token"), None);
    }

    #[test]
    fn no_token_anywhere() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_token(&headers, "access_token"), None);
        headers.insert(AUTHORIZATION, "Bearer ".parse().unwrap());
        assert_eq!(extract_token(&headers, "access_token"), None);
    }

    #[test]
    fn role_and_capability_checks() {
        let matrix = PermissionMatrix::new();
        let support = ctx(Role::Support);

        assert!(authorize_role(&support, &[Role::Support, Role::Admin]));
        assert!(!authorize_role(&support, &[Role::Admin]));
        assert!(matches!(
            require_role(&support, &[Role::Admin, Role::Manager]),
            Err(AppError::Forbidden(_))
        ));

        assert!(authorize_capability(&matrix, &support, Capability::CanViewAllLeads));
        assert!(!authorize_capability(&matrix, &support, Capability::CanExportData));
        assert!(require_capability(&matrix, &support, Capability::CanExportData).is_err());
    }

    #[tokio::test]
    async fn sales_is_forbidden_and_manager_is_allowed() {
        let app = test_app();
        let alice = app.user("alice@crm.test", Role::Sales).await;
        let bob = app.user("bob@crm.test", Role::Manager).await;

        let response = router(app.state.clone())
            .oneshot(get_with_bearer("/leads", &app.access_token(alice.id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(json_body(response).await["code"], "FORBIDDEN");

        let response = router(app.state.clone())
            .oneshot(get_with_bearer("/leads", &app.access_token(bob.id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_token_is_unauthenticated() {
        let app = test_app();
        let response = router(app.state.clone())
            .oneshot(HttpRequest::get("/whoami").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn cookie_token_authenticates() {
        let app = test_app();
        let carol = app.user("carol@crm.test", Role::Support).await;

        let request = HttpRequest::get("/whoami")
            .header(COOKIE, format!("access_token={}", app.access_token(carol.id)))
            .body(Body::empty())
            .unwrap();
        let response = router(app.state.clone()).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"carol@crm.test");
    }

    #[tokio::test]
    async fn expired_token_is_unauthenticated() {
        let app = test_app();
        let dave = app.user("dave@crm.test", Role::Manager).await;
        let token = app.access_token(dave.id);

        app.clock.advance(Duration::minutes(15));
        let response = router(app.state.clone())
            .oneshot(get_with_bearer("/whoami", &token))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn refresh_token_is_not_an_access_token() {
        let app = test_app();
        let erin = app.user("erin@crm.test", Role::Manager).await;
        let refresh = app.state.auth.issue_pair(erin.id).unwrap().refresh_token;

        let response = router(app.state.clone())
            .oneshot(get_with_bearer("/whoami", &refresh))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn locked_account_gets_423_even_with_valid_token() {
        let app = test_app();
        let frank = app.user("frank@crm.test", Role::Sales).await;
        let token = app.access_token(frank.id);
        for _ in 0..5 {
            let _ = app.state.auth.login("frank@crm.test", "wrong").await;
        }

        let response = router(app.state.clone())
            .oneshot(get_with_bearer("/whoami", &token))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::LOCKED);
        let body = json_body(response).await;
        assert_eq!(body["code"], "ACCOUNT_LOCKED");
        assert!(body["lockUntil"].is_string());
    }

    #[tokio::test]
    async fn inactive_account_is_rejected_with_its_own_code() {
        let app = test_app();
        let admin = app.user("root@crm.test", Role::Admin).await;
        let gina = app.user("gina@crm.test", Role::Sales).await;
        let token = app.access_token(gina.id);
        app.state
            .auth
            .set_active(&AuthContext::from(&admin), gina.id, false)
            .await
            .unwrap();

        let response = router(app.state.clone())
            .oneshot(get_with_bearer("/whoami", &token))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["code"], "ACCOUNT_INACTIVE");
    }
}
