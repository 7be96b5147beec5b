//! Password reset tokens
//!
//! The raw token is 32 random bytes rendered as hex and leaves the process
//! only through a [`ResetDelivery`] channel. Storage only ever sees its
//! SHA-256 digest.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use uuid::Uuid;

const RESET_TOKEN_BYTES: usize = 32;

/// Generate a new raw reset token
pub fn generate_reset_token() -> String {
    let mut bytes = [0u8; RESET_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// One-way digest stored in place of the raw token
pub fn hash_reset_token(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A reset token ready to hand to the user
#[derive(Debug, Clone)]
pub struct ResetTicket {
    pub identity_id: Uuid,
    pub email: String,
    pub raw_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Outbound channel for reset tokens (email in production)
#[async_trait]
pub trait ResetDelivery: Send + Sync {
    async fn deliver(&self, ticket: &ResetTicket);
}

/// Writes tickets to the log. Stands in for a mail transport.
#[derive(Debug, Default)]
pub struct LogResetDelivery;

#[async_trait]
impl ResetDelivery for LogResetDelivery {
    async fn deliver(&self, ticket: &ResetTicket) {
        info!(
            user_id = %ticket.identity_id,
            email = %ticket.email,
            expires_at = %ticket.expires_at,
            "Password reset token issued"
        );
        debug!(token = %ticket.raw_token, "Password reset token value");
    }
}

/// Keeps delivered tickets so tests can redeem them
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryResetDelivery {
    tickets: std::sync::Mutex<Vec<ResetTicket>>,
}

#[cfg(test)]
impl MemoryResetDelivery {
    pub fn tickets(&self) -> Vec<ResetTicket> {
        self.tickets.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<ResetTicket> {
        self.tickets.lock().unwrap().last().cloned()
    }
}

#[cfg(test)]
#[async_trait]
impl ResetDelivery for MemoryResetDelivery {
    async fn deliver(&self, ticket: &ResetTicket) {
        self.tickets.lock().unwrap().push(ticket.clone());
    }
}
