//! Identity records and the credential store contract
//!
//! The auth subsystem reads and writes user security fields through
//! [`CredentialStore`]. `InMemoryCredentialStore` backs development and
//! tests; `db::PgCredentialStore` backs deployments with a database.

use crate::auth::{AuthError, LockoutState, Role};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Authenticated principal with its security fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub role: Role,
    pub is_active: bool,
    pub login_attempts: u32,
    pub lock_until: Option<DateTime<Utc>>,
    pub reset_token_hash: Option<String>,
    pub reset_token_expires: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Identity {
    pub fn lockout_state(&self) -> LockoutState {
        LockoutState {
            attempts: self.login_attempts,
            lock_until: self.lock_until,
        }
    }

    pub fn set_lockout_state(&mut self, state: LockoutState) {
        self.login_attempts = state.attempts;
        self.lock_until = state.lock_until;
    }

    /// Lock expiry if the account is locked at `now`
    pub fn locked_until(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.lock_until.filter(|until| now < *until)
    }

    pub fn clear_reset_token(&mut self) {
        self.reset_token_hash = None;
        self.reset_token_expires = None;
    }
}

/// Fields required to create an identity
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// Lower-cased, trimmed email used as the lookup key
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Persistence contract for identity security fields
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, AuthError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Identity>, AuthError>;

    /// Identity whose reset-token digest matches and has not expired at `now`
    async fn find_by_reset_token_hash(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Identity>, AuthError>;

    async fn create(&self, new: NewIdentity) -> Result<Identity, AuthError>;

    /// Persist every mutable field of `identity`
    async fn save(&self, identity: &Identity) -> Result<(), AuthError>;

    async fn list(&self) -> Result<Vec<Identity>, AuthError>;
}

/// In-memory credential store
pub struct InMemoryCredentialStore {
    users: Arc<RwLock<HashMap<Uuid, Identity>>>,
    email_index: Arc<RwLock<HashMap<String, Uuid>>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self {
            users: Arc::new(RwLock::new(HashMap::new())),
            email_index: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, AuthError> {
        let email_index = self.email_index.read().await;
        let users = self.users.read().await;

        Ok(email_index
            .get(&normalize_email(email))
            .and_then(|id| users.get(id).cloned()))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Identity>, AuthError> {
        let users = self.users.read().await;
        Ok(users.get(&id).cloned())
    }

    async fn find_by_reset_token_hash(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Identity>, AuthError> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| {
                u.reset_token_hash.as_deref() == Some(token_hash)
                    && u.reset_token_expires.is_some_and(|exp| exp > now)
            })
            .cloned())
    }

    async fn create(&self, new: NewIdentity) -> Result<Identity, AuthError> {
        let mut users = self.users.write().await;
        let mut email_index = self.email_index.write().await;

        let email = normalize_email(&new.email);
        if email_index.contains_key(&email) {
            return Err(AuthError::Conflict("Email already registered".to_string()));
        }

        let identity = Identity {
            id: Uuid::new_v4(),
            email: email.clone(),
            name: new.name,
            password_hash: new.password_hash,
            role: new.role,
            is_active: true,
            login_attempts: 0,
            lock_until: None,
            reset_token_hash: None,
            reset_token_expires: None,
            last_login_at: None,
            created_at: new.created_at,
            updated_at: new.created_at,
        };

        email_index.insert(email, identity.id);
        users.insert(identity.id, identity.clone());

        Ok(identity)
    }

    async fn save(&self, identity: &Identity) -> Result<(), AuthError> {
        let mut users = self.users.write().await;

        let stored = users
            .get_mut(&identity.id)
            .ok_or_else(|| AuthError::NotFound("User not found".to_string()))?;
        *stored = identity.clone();

        Ok(())
    }

    async fn list(&self) -> Result<Vec<Identity>, AuthError> {
        let users = self.users.read().await;
        let mut all: Vec<_> = users.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.email.cmp(&b.email)));
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use tokio_test::{assert_err, assert_ok};

    fn new_identity(email: &str) -> NewIdentity {
        NewIdentity {
            email: email.to_string(),
            name: "Test".to_string(),
            password_hash: "hash".to_string(),
            role: Role::Sales,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn create_and_find() {
        let store = InMemoryCredentialStore::new();
        let created = store.create(new_identity("Alice@Example.com ")).await.unwrap();

        assert_eq!(created.email, "alice@example.com");
        assert!(created.is_active);
        assert_eq!(created.login_attempts, 0);

        let by_email = store.find_by_email("ALICE@example.com").await.unwrap();
        assert_eq!(by_email, Some(created.clone()));
        let by_id = store.find_by_id(created.id).await.unwrap();
        assert_eq!(by_id, Some(created));
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let store = InMemoryCredentialStore::new();
        assert_ok!(store.create(new_identity("a@b.com")).await);
        let err = assert_err!(store.create(new_identity("A@B.com")).await);
        assert!(matches!(err, AuthError::Conflict(_)));
    }

    #[tokio::test]
    async fn save_persists_security_fields() {
        let store = InMemoryCredentialStore::new();
        let mut identity = store.create(new_identity("a@b.com")).await.unwrap();

        identity.login_attempts = 3;
        identity.lock_until = Some(Utc::now());
        store.save(&identity).await.unwrap();

        let reloaded = store.find_by_id(identity.id).await.unwrap().unwrap();
        assert_eq!(reloaded.login_attempts, 3);
        assert_eq!(reloaded.lock_until, identity.lock_until);
    }

    #[tokio::test]
    async fn save_unknown_identity_is_not_found() {
        let store = InMemoryCredentialStore::new();
        let mut ghost = store.create(new_identity("a@b.com")).await.unwrap();
        ghost.id = Uuid::new_v4();
        assert!(matches!(store.save(&ghost).await, Err(AuthError::NotFound(_))));
    }

    #[tokio::test]
    async fn reset_token_lookup_honours_expiry() {
        let store = InMemoryCredentialStore::new();
        let now = Utc::now();
        let mut identity = store.create(new_identity("a@b.com")).await.unwrap();
        identity.reset_token_hash = Some("digest".to_string());
        identity.reset_token_expires = Some(now + Duration::minutes(10));
        store.save(&identity).await.unwrap();

        assert!(store
            .find_by_reset_token_hash("digest", now)
            .await
            .unwrap()
            .is_some());
        assert!(store
            .find_by_reset_token_hash("digest", now + Duration::minutes(10))
            .await
            .unwrap()
            .is_none());
        assert!(store
            .find_by_reset_token_hash("other", now)
            .await
            .unwrap()
            .is_none());
    }

    #[test]
    fn locked_until_ignores_elapsed_locks() {
        let now = Utc::now();
        let mut identity = Identity {
            id: Uuid::new_v4(),
            email: "a@b.com".to_string(),
            name: "A".to_string(),
            password_hash: String::new(),
            role: Role::Support,
            is_active: true,
            login_attempts: 5,
            lock_until: Some(now - Duration::seconds(1)),
            reset_token_hash: None,
            reset_token_expires: None,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(identity.locked_until(now), None);

        identity.lock_until = Some(now + Duration::hours(1));
        assert_eq!(identity.locked_until(now), identity.lock_until);
    }
}
