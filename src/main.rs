//! CRM API - authentication and authorization core
//!
//! Serves account login, JWT issuance, lockout, password reset and user
//! administration for a multi-tenant CRM. Credentials live in PostgreSQL
//! when `DATABASE_URL` is set, otherwise in memory.

mod activity;
mod auth;
mod config;
mod db;
mod error;
mod models;
mod routes;
mod state;
mod users;

use crate::auth::{LogResetDelivery, Registration, Role};
use crate::config::{BootstrapAdmin, Settings};
use crate::db::PgCredentialStore;
use crate::routes::create_router;
use crate::state::AppState;
use crate::users::{CredentialStore, InMemoryCredentialStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(config::json_logs_requested());
    info!("Starting CRM API...");

    let settings = Settings::load()?;

    let store: Arc<dyn CredentialStore> = match &settings.database {
        Some(database) => {
            let pool = db::create_pool(database).await?;
            let store = PgCredentialStore::new(pool);
            store.ensure_schema().await?;
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set, accounts are kept in memory and lost on restart");
            Arc::new(InMemoryCredentialStore::new())
        }
    };

    let state = Arc::new(AppState::new(
        settings.auth.clone(),
        store,
        Arc::new(LogResetDelivery),
    ));

    if let Some(admin) = &settings.bootstrap_admin {
        seed_admin(&state, admin).await?;
    }

    let app = create_router(state, &settings);

    let addr = SocketAddr::from((settings.server.host, settings.server.port));
    info!("Server listening on http://{}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,crm_api=debug,tower_http=debug"));

    let registry = tracing_subscriber::registry().with(env_filter);

    if json {
        registry
            .with(fmt::layer().json().with_current_span(true).with_target(true))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .compact(),
            )
            .init();
    }
}

/// Create the configured administrator unless the email is already taken
async fn seed_admin(state: &AppState, admin: &BootstrapAdmin) -> anyhow::Result<()> {
    if state.auth.store().find_by_email(&admin.email).await?.is_some() {
        info!(email = %admin.email, "Bootstrap admin already exists");
        return Ok(());
    }

    let identity = state
        .auth
        .register(Registration {
            email: admin.email.clone(),
            password: admin.password.clone(),
            name: "Administrator".to_string(),
            role: Role::Admin,
        })
        .await?;

    info!(user_id = %identity.id, "Bootstrap admin created");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown...");
        },
    }
}
