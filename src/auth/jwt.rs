//! JWT token management
//!
//! Handles creation and validation of access and refresh tokens. The two
//! token kinds are signed with different secrets, so one leaked secret
//! cannot forge the other kind.

use crate::auth::{AuthError, Clock};
use crate::config::AuthConfig;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Upper bound on the configurable clock-skew tolerance
pub const MAX_LEEWAY_SECS: u64 = 5;

/// JWT claims
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (identity ID)
    pub sub: Uuid,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Token type (access or refresh)
    pub token_type: TokenType,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// A freshly signed token and the instant it stops being accepted
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Token pair response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

impl TokenPair {
    pub fn new(access: IssuedToken, refresh: IssuedToken, now: DateTime<Utc>) -> Self {
        Self {
            expires_in: (access.expires_at - now).num_seconds(),
            access_token: access.token,
            refresh_token: refresh.token,
            token_type: "Bearer".to_string(),
            access_expires_at: access.expires_at,
            refresh_expires_at: refresh.expires_at,
        }
    }
}

struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKeys {
    fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

/// Issues and verifies signed access/refresh tokens
pub struct TokenIssuer {
    access: SigningKeys,
    refresh: SigningKeys,
    access_ttl: Duration,
    refresh_ttl: Duration,
    leeway: Duration,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("leeway", &self.leeway)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    pub fn new(config: &AuthConfig, clock: Arc<dyn Clock>) -> Self {
        let leeway_secs = config.token_leeway_secs.min(MAX_LEEWAY_SECS);

        Self {
            access: SigningKeys::from_secret(&config.access_secret),
            refresh: SigningKeys::from_secret(&config.refresh_secret),
            access_ttl: config.access_token_ttl,
            refresh_ttl: config.refresh_token_ttl,
            leeway: Duration::seconds(leeway_secs as i64),
            clock,
        }
    }

    fn keys(&self, kind: TokenType) -> &SigningKeys {
        match kind {
            TokenType::Access => &self.access,
            TokenType::Refresh => &self.refresh,
        }
    }

    fn issue(&self, identity_id: Uuid, kind: TokenType) -> Result<IssuedToken, AuthError> {
        let now = self.clock.now();
        let ttl = match kind {
            TokenType::Access => self.access_ttl,
            TokenType::Refresh => self.refresh_ttl,
        };
        let expires_at = now + ttl;

        let claims = Claims {
            sub: identity_id,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            token_type: kind,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.keys(kind).encoding)
            .map_err(|e| AuthError::Internal(format!("Failed to sign {:?} token: {}", kind, e)))?;

        Ok(IssuedToken { token, expires_at })
    }

    pub fn issue_access(&self, identity_id: Uuid) -> Result<IssuedToken, AuthError> {
        self.issue(identity_id, TokenType::Access)
    }

    pub fn issue_refresh(&self, identity_id: Uuid) -> Result<IssuedToken, AuthError> {
        self.issue(identity_id, TokenType::Refresh)
    }

    /// Verify signature, token kind and expiry; returns the subject on success
    pub fn verify(&self, token: &str, kind: TokenType) -> Result<Uuid, AuthError> {
        // Expiry is checked below against the injected clock with our own leeway.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let data = decode::<Claims>(token, &self.keys(kind).decoding, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::TokenInvalid,
            }
        })?;

        let claims = data.claims;
        if claims.token_type != kind {
            return Err(AuthError::TokenInvalid);
        }

        let expires_at = DateTime::from_timestamp(claims.exp, 0).ok_or(AuthError::TokenInvalid)?;
        if self.clock.now() >= expires_at + self.leeway {
            return Err(AuthError::TokenExpired);
        }

        Ok(claims.sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::FixedClock;
    use crate::config::AuthConfig;

    fn issuer(clock: Arc<FixedClock>) -> TokenIssuer {
        TokenIssuer::new(&AuthConfig::for_tests(), clock)
    }

    #[test]
    fn access_token_round_trips_subject() {
        let clock = Arc::new(FixedClock::at_epoch_secs(1_700_000_000));
        let issuer = issuer(clock);
        let id = Uuid::new_v4();

        let issued = issuer.issue_access(id).unwrap();
        assert_eq!(issuer.verify(&issued.token, TokenType::Access).unwrap(), id);
    }

    #[test]
    fn access_token_expiry_boundary() {
        let clock = Arc::new(FixedClock::at_epoch_secs(1_700_000_000));
        let issuer = issuer(clock.clone());
        let id = Uuid::new_v4();
        let issued = issuer.issue_access(id).unwrap();
        assert_eq!(issued.expires_at - clock.now(), Duration::minutes(15));

        clock.advance(Duration::minutes(15) - Duration::seconds(1));
        assert_eq!(issuer.verify(&issued.token, TokenType::Access).unwrap(), id);

        clock.advance(Duration::seconds(2));
        assert!(matches!(
            issuer.verify(&issued.token, TokenType::Access),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn token_is_rejected_exactly_at_expiry_without_leeway() {
        let clock = Arc::new(FixedClock::at_epoch_secs(1_700_000_000));
        let issuer = issuer(clock.clone());
        let issued = issuer.issue_access(Uuid::new_v4()).unwrap();

        clock.advance(Duration::minutes(15));
        assert!(matches!(
            issuer.verify(&issued.token, TokenType::Access),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn configured_leeway_is_capped() {
        let clock = Arc::new(FixedClock::at_epoch_secs(1_700_000_000));
        let mut config = AuthConfig::for_tests();
        config.token_leeway_secs = 3600;
        let issuer = TokenIssuer::new(&config, clock.clone());
        let issued = issuer.issue_access(Uuid::new_v4()).unwrap();

        clock.advance(Duration::minutes(15) + Duration::seconds(4));
        assert!(issuer.verify(&issued.token, TokenType::Access).is_ok());

        clock.advance(Duration::seconds(1));
        assert!(matches!(
            issuer.verify(&issued.token, TokenType::Access),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn refresh_token_lives_seven_days() {
        let clock = Arc::new(FixedClock::at_epoch_secs(1_700_000_000));
        let issuer = issuer(clock.clone());
        let id = Uuid::new_v4();
        let issued = issuer.issue_refresh(id).unwrap();

        clock.advance(Duration::days(7) - Duration::seconds(1));
        assert_eq!(issuer.verify(&issued.token, TokenType::Refresh).unwrap(), id);

        clock.advance(Duration::seconds(2));
        assert!(matches!(
            issuer.verify(&issued.token, TokenType::Refresh),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn token_kinds_are_not_interchangeable() {
        let clock = Arc::new(FixedClock::at_epoch_secs(1_700_000_000));
        let issuer = issuer(clock);
        let id = Uuid::new_v4();

        let refresh = issuer.issue_refresh(id).unwrap();
        assert!(matches!(
            issuer.verify(&refresh.token, TokenType::Access),
            Err(AuthError::TokenInvalid)
        ));

        let access = issuer.issue_access(id).unwrap();
        assert!(matches!(
            issuer.verify(&access.token, TokenType::Refresh),
            Err(AuthError::TokenInvalid)
        ));
    }

    #[test]
    fn token_signed_with_another_secret_is_invalid() {
        let clock = Arc::new(FixedClock::at_epoch_secs(1_700_000_000));
        let mut other = AuthConfig::for_tests();
        other.access_secret = "some-other-access-secret".to_string();
        let forged = TokenIssuer::new(&other, clock.clone())
            .issue_access(Uuid::new_v4())
            .unwrap();

        assert!(matches!(
            issuer(clock).verify(&forged.token, TokenType::Access),
            Err(AuthError::TokenInvalid)
        ));
    }

    #[test]
    fn garbage_is_invalid() {
        let clock = Arc::new(FixedClock::at_epoch_secs(1_700_000_000));
        assert!(matches!(
            issuer(clock).verify("not.a.jwt", TokenType::Access),
            Err(AuthError::TokenInvalid)
        ));
    }

    #[test]
    fn token_pair_reports_access_lifetime() {
        let clock = Arc::new(FixedClock::at_epoch_secs(1_700_000_000));
        let issuer = issuer(clock.clone());
        let id = Uuid::new_v4();
        let pair = TokenPair::new(
            issuer.issue_access(id).unwrap(),
            issuer.issue_refresh(id).unwrap(),
            clock.now(),
        );
        assert_eq!(pair.expires_in, 15 * 60);
        assert_eq!(pair.token_type, "Bearer");
    }
}
