//! PostgreSQL credential store
//!
//! Connection pooling plus the `users` table backing [`CredentialStore`].

use crate::auth::{AuthError, Role};
use crate::config::DatabaseConfig;
use crate::users::{normalize_email, CredentialStore, Identity, NewIdentity};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use tokio_postgres::{error::SqlState, NoTls, Row};
use tracing::{debug, info};
use uuid::Uuid;

const USER_COLUMNS: &str = "id, email, name, password_hash, role, is_active, login_attempts, \
     lock_until, reset_token_hash, reset_token_expires, last_login_at, created_at, updated_at";

/// Build a connection pool and check that the server answers
pub async fn create_pool(config: &DatabaseConfig) -> Result<Pool, AuthError> {
    let mut cfg = Config::new();
    cfg.host = Some(config.host.clone());
    cfg.port = Some(config.port);
    cfg.user = Some(config.user.clone());
    cfg.password = Some(config.password.clone());
    cfg.dbname = Some(config.database.clone());
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    cfg.pool = Some(PoolConfig::new(config.max_pool_size));

    let pool = cfg
        .create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(|e| AuthError::Internal(format!("Failed to create pool: {}", e)))?;

    let client = pool.get().await.map_err(pool_error)?;
    client.query_one("SELECT 1", &[]).await.map_err(db_error)?;

    info!(host = %config.host, database = %config.database, "Database pool established");
    Ok(pool)
}

fn pool_error(e: deadpool_postgres::PoolError) -> AuthError {
    AuthError::Internal(format!("Database pool error: {}", e))
}

fn db_error(e: tokio_postgres::Error) -> AuthError {
    AuthError::Internal(format!("Database error: {}", e))
}

fn row_to_identity(row: &Row) -> Result<Identity, AuthError> {
    let role: String = row.get("role");
    // An unrecognised stored role must never grant anything
    let role: Role = role
        .parse()
        .map_err(|_| AuthError::Internal(format!("Stored role is not recognised: {}", role)))?;
    let login_attempts: i32 = row.get("login_attempts");

    Ok(Identity {
        id: row.get("id"),
        email: row.get("email"),
        name: row.get("name"),
        password_hash: row.get("password_hash"),
        role,
        is_active: row.get("is_active"),
        login_attempts: u32::try_from(login_attempts).unwrap_or(0),
        lock_until: row.get("lock_until"),
        reset_token_hash: row.get("reset_token_hash"),
        reset_token_expires: row.get("reset_token_expires"),
        last_login_at: row.get("last_login_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

/// Credential store backed by a deadpool-postgres pool
pub struct PgCredentialStore {
    pool: Pool,
}

impl PgCredentialStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create the users table if it does not exist
    pub async fn ensure_schema(&self) -> Result<(), AuthError> {
        let client = self.pool.get().await.map_err(pool_error)?;

        client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS users (
                    id UUID PRIMARY KEY,
                    email VARCHAR(255) UNIQUE NOT NULL,
                    name VARCHAR(255) NOT NULL,
                    password_hash VARCHAR(255) NOT NULL,
                    role VARCHAR(20) NOT NULL DEFAULT 'sales',
                    is_active BOOLEAN NOT NULL DEFAULT true,
                    login_attempts INTEGER NOT NULL DEFAULT 0,
                    lock_until TIMESTAMPTZ,
                    reset_token_hash VARCHAR(64),
                    reset_token_expires TIMESTAMPTZ,
                    last_login_at TIMESTAMPTZ,
                    created_at TIMESTAMPTZ NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_users_reset_token_hash
                    ON users(reset_token_hash) WHERE reset_token_hash IS NOT NULL;",
            )
            .await
            .map_err(db_error)?;

        info!("Users table initialized");
        Ok(())
    }

    async fn query_one_user(
        &self,
        sql: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> Result<Option<Identity>, AuthError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let row = client.query_opt(sql, params).await.map_err(db_error)?;
        row.as_ref().map(row_to_identity).transpose()
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, AuthError> {
        let email = normalize_email(email);
        self.query_one_user(
            &format!("SELECT {} FROM users WHERE email = $1", USER_COLUMNS),
            &[&email],
        )
        .await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Identity>, AuthError> {
        self.query_one_user(
            &format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS),
            &[&id],
        )
        .await
    }

    async fn find_by_reset_token_hash(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Identity>, AuthError> {
        self.query_one_user(
            &format!(
                "SELECT {} FROM users WHERE reset_token_hash = $1 AND reset_token_expires > $2",
                USER_COLUMNS
            ),
            &[&token_hash, &now],
        )
        .await
    }

    async fn create(&self, new: NewIdentity) -> Result<Identity, AuthError> {
        let client = self.pool.get().await.map_err(pool_error)?;

        let id = Uuid::new_v4();
        let email = normalize_email(&new.email);
        let sql = format!(
            "INSERT INTO users (id, email, name, password_hash, role, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $6)
             RETURNING {}",
            USER_COLUMNS
        );
        let row = client
            .query_one(
                sql.as_str(),
                &[
                    &id,
                    &email,
                    &new.name,
                    &new.password_hash,
                    &new.role.as_str(),
                    &new.created_at,
                ],
            )
            .await
            .map_err(|e| {
                if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                    AuthError::Conflict("Email already registered".to_string())
                } else {
                    db_error(e)
                }
            })?;

        debug!(user_id = %id, "Inserted user row");
        row_to_identity(&row)
    }

    async fn save(&self, identity: &Identity) -> Result<(), AuthError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let login_attempts = i32::try_from(identity.login_attempts).unwrap_or(i32::MAX);

        let updated = client
            .execute(
                "UPDATE users SET
                    email = $2, name = $3, password_hash = $4, role = $5, is_active = $6,
                    login_attempts = $7, lock_until = $8, reset_token_hash = $9,
                    reset_token_expires = $10, last_login_at = $11, updated_at = $12
                 WHERE id = $1",
                &[
                    &identity.id,
                    &identity.email,
                    &identity.name,
                    &identity.password_hash,
                    &identity.role.as_str(),
                    &identity.is_active,
                    &login_attempts,
                    &identity.lock_until,
                    &identity.reset_token_hash,
                    &identity.reset_token_expires,
                    &identity.last_login_at,
                    &identity.updated_at,
                ],
            )
            .await
            .map_err(db_error)?;

        if updated == 0 {
            return Err(AuthError::NotFound("User not found".to_string()));
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Identity>, AuthError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let sql = format!("SELECT {} FROM users ORDER BY created_at, email", USER_COLUMNS);
        let rows = client
            .query(sql.as_str(), &[])
            .await
            .map_err(db_error)?;

        rows.iter().map(row_to_identity).collect()
    }
}
