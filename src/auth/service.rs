//! Authentication service
//!
//! Composes the credential store, password hasher, token issuer and lockout
//! policy into the operations route handlers call: login, refresh, request
//! authentication, password reset and account administration.

use crate::activity::{ActivityEvent, ActivitySink};
use crate::auth::reset::{generate_reset_token, hash_reset_token};
use crate::auth::{
    AuthContext, AuthError, Clock, FailureOutcome, IdentityLocks, IssuedToken, LockStatus,
    LockoutPolicy, PasswordHasher, ResetDelivery, ResetTicket, Role, TokenIssuer, TokenPair,
    TokenType,
};
use crate::config::AuthConfig;
use crate::users::{CredentialStore, Identity, NewIdentity};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Input for creating an account
#[derive(Debug, Clone)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub name: String,
    pub role: Role,
}

/// Result of a successful login
#[derive(Debug)]
pub struct LoginSuccess {
    pub identity: Identity,
    pub tokens: TokenPair,
}

pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    hasher: PasswordHasher,
    tokens: TokenIssuer,
    lockout: LockoutPolicy,
    locks: IdentityLocks,
    clock: Arc<dyn Clock>,
    activity: Arc<dyn ActivitySink>,
    reset_delivery: Arc<dyn ResetDelivery>,
    reset_token_ttl: Duration,
    decoy_hash: OnceCell<String>,
}

impl AuthService {
    pub fn new(
        config: &AuthConfig,
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
        activity: Arc<dyn ActivitySink>,
        reset_delivery: Arc<dyn ResetDelivery>,
    ) -> Self {
        Self {
            store,
            hasher: PasswordHasher::new(config.bcrypt_cost),
            tokens: TokenIssuer::new(config, clock.clone()),
            lockout: LockoutPolicy::new(config.max_login_attempts, config.lock_duration),
            locks: IdentityLocks::new(),
            clock,
            activity,
            reset_delivery,
            reset_token_ttl: config.reset_token_ttl,
            decoy_hash: OnceCell::new(),
        }
    }

    pub fn store(&self) -> &dyn CredentialStore {
        self.store.as_ref()
    }

    /// Create an account. Role values are already validated by the caller.
    pub async fn register(&self, registration: Registration) -> Result<Identity, AuthError> {
        let password_hash = self.hasher.hash_async(&registration.password).await?;

        let identity = self
            .store
            .create(NewIdentity {
                email: registration.email,
                name: registration.name,
                password_hash,
                role: registration.role,
                created_at: self.clock.now(),
            })
            .await?;

        info!(user_id = %identity.id, role = %identity.role, "User registered");
        self.activity.record(ActivityEvent::Registered {
            user_id: identity.id,
            role: identity.role,
        });

        Ok(identity)
    }

    /// Verify credentials under the lockout policy and mint a token pair
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginSuccess, AuthError> {
        let Some(found) = self.store.find_by_email(email).await? else {
            debug!("Login attempt for unknown email");
            // Same bcrypt work as a real account so timing does not reveal the miss
            let decoy = self.decoy_hash().await?;
            self.hasher.verify_async(password, decoy).await?;
            self.activity
                .record(ActivityEvent::LoginFailed { user_id: None });
            return Err(AuthError::InvalidCredentials {
                attempts_remaining: None,
            });
        };

        let _guard = self.locks.acquire(found.id).await;
        // Re-read under the lock so concurrent attempts see each other's counts.
        let mut identity = self
            .store
            .find_by_id(found.id)
            .await?
            .ok_or(AuthError::InvalidCredentials {
                attempts_remaining: None,
            })?;

        let now = self.clock.now();
        if let LockStatus::Locked { until } = self.lockout.status(&identity.lockout_state(), now) {
            debug!(user_id = %identity.id, %until, "Login rejected, account locked");
            return Err(AuthError::Locked { until });
        }

        if !self
            .hasher
            .verify_async(password, &identity.password_hash)
            .await?
        {
            return Err(self.record_wrong_password(&mut identity, now).await?);
        }

        identity.set_lockout_state(self.lockout.register_success());
        identity.updated_at = now;

        if !identity.is_active {
            self.store.save(&identity).await?;
            return Err(AuthError::Inactive);
        }

        identity.last_login_at = Some(now);
        self.store.save(&identity).await?;

        let tokens = self.issue_pair(identity.id)?;
        info!(user_id = %identity.id, "Login succeeded");
        self.activity.record(ActivityEvent::LoginSucceeded {
            user_id: identity.id,
        });

        Ok(LoginSuccess { identity, tokens })
    }

    /// Count a wrong password against the lockout policy and persist it.
    /// Returns the error the caller should surface.
    async fn record_wrong_password(
        &self,
        identity: &mut Identity,
        now: DateTime<Utc>,
    ) -> Result<AuthError, AuthError> {
        let (state, outcome) = self.lockout.register_failure(&identity.lockout_state(), now);
        identity.set_lockout_state(state);
        identity.updated_at = now;
        self.store.save(identity).await?;

        Ok(match outcome {
            FailureOutcome::Remaining(remaining) => {
                debug!(user_id = %identity.id, remaining, "Invalid password");
                self.activity.record(ActivityEvent::LoginFailed {
                    user_id: Some(identity.id),
                });
                AuthError::InvalidCredentials {
                    attempts_remaining: Some(remaining),
                }
            }
            FailureOutcome::Locked { until } => {
                warn!(user_id = %identity.id, %until, "Account locked after repeated failures");
                self.activity.record(ActivityEvent::AccountLocked {
                    user_id: identity.id,
                    until,
                });
                AuthError::Locked { until }
            }
        })
    }

    /// Hash verified against when the email is unknown, built once on first use
    async fn decoy_hash(&self) -> Result<&str, AuthError> {
        let hash = self
            .decoy_hash
            .get_or_try_init(|| self.hasher.hash_async("decoy-password-never-matches"))
            .await?;
        Ok(hash.as_str())
    }

    pub fn issue_pair(&self, identity_id: Uuid) -> Result<TokenPair, AuthError> {
        let access = self.tokens.issue_access(identity_id)?;
        let refresh = self.tokens.issue_refresh(identity_id)?;
        Ok(TokenPair::new(access, refresh, self.clock.now()))
    }

    /// Mint a new access token from a refresh token. The refresh token is not rotated.
    pub async fn refresh(&self, refresh_token: &str) -> Result<IssuedToken, AuthError> {
        let id = self.tokens.verify(refresh_token, TokenType::Refresh)?;
        let identity = self.usable_identity(id).await?;
        self.tokens.issue_access(identity.id)
    }

    /// Resolve the identity behind an access token
    pub async fn authenticate(&self, access_token: &str) -> Result<AuthContext, AuthError> {
        let id = self.tokens.verify(access_token, TokenType::Access)?;
        let identity = self.usable_identity(id).await?;
        Ok(AuthContext::from(&identity))
    }

    /// Identity that exists, is not locked and is active
    async fn usable_identity(&self, id: Uuid) -> Result<Identity, AuthError> {
        let identity = self
            .store
            .find_by_id(id)
            .await?
            .ok_or_else(|| AuthError::Unauthenticated("User not found".to_string()))?;

        if let Some(until) = identity.locked_until(self.clock.now()) {
            return Err(AuthError::Locked { until });
        }
        if !identity.is_active {
            return Err(AuthError::Inactive);
        }

        Ok(identity)
    }

    /// Issue a reset token if the email belongs to an active account.
    /// Unknown emails succeed silently so callers cannot probe for accounts.
    pub async fn request_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let Some(found) = self.store.find_by_email(email).await? else {
            debug!("Password reset requested for unknown email");
            return Ok(());
        };

        let _guard = self.locks.acquire(found.id).await;
        let Some(mut identity) = self.store.find_by_id(found.id).await? else {
            return Ok(());
        };
        if !identity.is_active {
            debug!(user_id = %identity.id, "Password reset requested for inactive account");
            return Ok(());
        }

        let now = self.clock.now();
        let raw_token = generate_reset_token();
        let expires_at = now + self.reset_token_ttl;

        identity.reset_token_hash = Some(hash_reset_token(&raw_token));
        identity.reset_token_expires = Some(expires_at);
        identity.updated_at = now;
        self.store.save(&identity).await?;

        self.reset_delivery
            .deliver(&ResetTicket {
                identity_id: identity.id,
                email: identity.email.clone(),
                raw_token,
                expires_at,
            })
            .await;
        self.activity.record(ActivityEvent::PasswordResetRequested {
            user_id: identity.id,
        });

        Ok(())
    }

    /// Consume a reset token and set a new password. Each token works once.
    pub async fn redeem_password_reset(
        &self,
        raw_token: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let digest = hash_reset_token(raw_token);

        let found = self
            .store
            .find_by_reset_token_hash(&digest, self.clock.now())
            .await?
            .ok_or(AuthError::InvalidOrExpiredToken)?;

        let _guard = self.locks.acquire(found.id).await;
        let mut identity = self
            .store
            .find_by_id(found.id)
            .await?
            .ok_or(AuthError::InvalidOrExpiredToken)?;

        // A concurrent redemption may have consumed the token while we waited.
        let now = self.clock.now();
        let still_valid = identity.reset_token_hash.as_deref() == Some(digest.as_str())
            && identity.reset_token_expires.is_some_and(|exp| exp > now);
        if !still_valid {
            return Err(AuthError::InvalidOrExpiredToken);
        }

        identity.password_hash = self.hasher.hash_async(new_password).await?;
        identity.clear_reset_token();
        identity.updated_at = now;
        self.store.save(&identity).await?;

        info!(user_id = %identity.id, "Password reset completed");
        self.activity.record(ActivityEvent::PasswordResetCompleted {
            user_id: identity.id,
        });

        Ok(())
    }

    pub async fn change_password(
        &self,
        ctx: &AuthContext,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let _guard = self.locks.acquire(ctx.id).await;
        // Locked accounts are rejected here before any hashing
        let mut identity = self.usable_identity(ctx.id).await?;

        if !self
            .hasher
            .verify_async(current_password, &identity.password_hash)
            .await?
        {
            let now = self.clock.now();
            return Err(self.record_wrong_password(&mut identity, now).await?);
        }

        identity.password_hash = self.hasher.hash_async(new_password).await?;
        identity.set_lockout_state(self.lockout.register_success());
        identity.updated_at = self.clock.now();
        self.store.save(&identity).await?;

        self.activity.record(ActivityEvent::PasswordChanged {
            user_id: identity.id,
        });
        Ok(())
    }

    pub async fn list_users(&self) -> Result<Vec<Identity>, AuthError> {
        self.store.list().await
    }

    async fn load_target(&self, id: Uuid) -> Result<Identity, AuthError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| AuthError::NotFound("User not found".to_string()))
    }

    pub async fn update_role(
        &self,
        actor: &AuthContext,
        target: Uuid,
        role: Role,
    ) -> Result<Identity, AuthError> {
        if actor.id == target {
            return Err(AuthError::Forbidden(
                "You cannot change your own role".to_string(),
            ));
        }

        let _guard = self.locks.acquire(target).await;
        let mut identity = self.load_target(target).await?;
        identity.role = role;
        identity.updated_at = self.clock.now();
        self.store.save(&identity).await?;

        info!(user_id = %target, %role, by = %actor.id, "Role updated");
        self.activity.record(ActivityEvent::RoleChanged {
            user_id: target,
            role,
            by: actor.id,
        });
        Ok(identity)
    }

    pub async fn set_active(
        &self,
        actor: &AuthContext,
        target: Uuid,
        is_active: bool,
    ) -> Result<Identity, AuthError> {
        if actor.id == target && !is_active {
            return Err(AuthError::Forbidden(
                "You cannot deactivate your own account".to_string(),
            ));
        }

        let _guard = self.locks.acquire(target).await;
        let mut identity = self.load_target(target).await?;
        identity.is_active = is_active;
        identity.updated_at = self.clock.now();
        self.store.save(&identity).await?;

        info!(user_id = %target, is_active, by = %actor.id, "Account status updated");
        self.activity.record(ActivityEvent::StatusChanged {
            user_id: target,
            is_active,
            by: actor.id,
        });
        Ok(identity)
    }

    /// Clear a lockout before its window elapses
    pub async fn unlock(&self, actor: &AuthContext, target: Uuid) -> Result<Identity, AuthError> {
        let _guard = self.locks.acquire(target).await;
        let mut identity = self.load_target(target).await?;
        identity.set_lockout_state(self.lockout.register_success());
        identity.updated_at = self.clock.now();
        self.store.save(&identity).await?;

        self.activity.record(ActivityEvent::AccountUnlocked {
            user_id: target,
            by: actor.id,
        });
        Ok(identity)
    }
}
