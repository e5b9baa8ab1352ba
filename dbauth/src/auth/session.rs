//! Server-side sessions backed by signed tokens.
//!
//! Every session is a persisted row keyed by an opaque random session id. The row also holds the
//! signed token issued with it, so a caller may present either:
//!
//! - the session id (what the browser cookie carries), or
//! - the token itself as a bearer credential.
//!
//! The signature alone is never enough. A token is only accepted while its row is active,
//! unexpired, and still holds that exact token, which is what makes logout and
//! revoke-all-for-user take effect immediately.

use std::sync::Arc;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::prelude::RngExt;
use rand::rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::{
    auth::password::constant_time_eq,
    config::JwtAlgorithm,
    db::{
        errors::DbError,
        models::{
            sessions::{SessionCreateDBRequest, SessionDBResponse},
            users::UserDBResponse,
        },
        store::Store,
    },
    errors::Error,
    types::{UserId, abbrev_uuid},
};

/// Random bytes in a session id (base64url, 43 characters).
const SESSION_ID_BYTES: usize = 32;

/// Random bytes in a token's `jti`.
const TOKEN_ID_BYTES: usize = 16;

/// Signed token claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: UserId,      // Subject (user ID)
    pub sid: String,      // Session id the token belongs to
    pub username: String, // Username at issue time
    pub iat: i64,         // Issued at
    pub exp: i64,         // Expiration time
    pub jti: String,      // Unique per signing
}

/// Signing material for session tokens.
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    algorithm: jsonwebtoken::Algorithm,
}

impl SessionKeys {
    /// Build keys from the configured secret. An empty secret is rejected.
    pub fn from_secret(secret: &str, algorithm: JwtAlgorithm) -> Result<Self, Error> {
        if secret.is_empty() {
            return Err(Error::Internal {
                operation: "session signing: secret_key is required".to_string(),
            });
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            algorithm: algorithm.into(),
        })
    }

    fn sign(&self, claims: &SessionClaims) -> Result<String, Error> {
        encode(&Header::new(self.algorithm), claims, &self.encoding).map_err(|e| Error::Internal {
            operation: format!("sign session token: {e}"),
        })
    }

    /// Check the signature and decode the claims. Expiry is enforced against the session row.
    fn verify(&self, token: &str) -> Result<SessionClaims, Error> {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = false;
        validation.leeway = 0;

        let token_data = decode::<SessionClaims>(token, &self.decoding, &validation).map_err(|e| match e.kind() {
            // Client errors (401) - malformed or forged tokens
            jsonwebtoken::errors::ErrorKind::InvalidToken
            | jsonwebtoken::errors::ErrorKind::InvalidSignature
            | jsonwebtoken::errors::ErrorKind::ExpiredSignature
            | jsonwebtoken::errors::ErrorKind::MissingRequiredClaim(_)
            | jsonwebtoken::errors::ErrorKind::ImmatureSignature
            | jsonwebtoken::errors::ErrorKind::Base64(_)
            | jsonwebtoken::errors::ErrorKind::Json(_)
            | jsonwebtoken::errors::ErrorKind::Utf8(_)
            | jsonwebtoken::errors::ErrorKind::InvalidAlgorithm => rejected(),

            // Server errors (500) - key issues, internal failures
            jsonwebtoken::errors::ErrorKind::InvalidEcdsaKey
            | jsonwebtoken::errors::ErrorKind::InvalidRsaKey(_)
            | jsonwebtoken::errors::ErrorKind::RsaFailedSigning
            | jsonwebtoken::errors::ErrorKind::InvalidAlgorithmName
            | jsonwebtoken::errors::ErrorKind::InvalidKeyFormat
            | jsonwebtoken::errors::ErrorKind::MissingAlgorithm
            | jsonwebtoken::errors::ErrorKind::Crypto(_) => Error::Internal {
                operation: format!("session token verification: {e}"),
            },

            _ => Error::Internal {
                operation: format!("session token verification (unknown error): {e}"),
            },
        })?;

        Ok(token_data.claims)
    }
}

/// Request details recorded on the session row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientMetadata {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

/// What the client receives when a session is created or refreshed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedSession {
    pub session_id: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// A credential presented by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Opaque session id, as carried by the session cookie
    SessionId(String),
    /// Signed session token, as carried by an `Authorization: Bearer` header
    Token(String),
}

/// A session that passed validation, with its owner.
#[derive(Debug, Clone)]
pub struct ValidatedSession {
    pub session: SessionDBResponse,
    pub user: UserDBResponse,
}

/// The uniform rejection for every session validation failure
fn rejected() -> Error {
    Error::Unauthenticated {
        message: Some("Invalid or expired session".to_string()),
    }
}

fn random_id(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rng().fill(bytes.as_mut_slice());
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Issues, validates and revokes sessions.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn Store>,
    keys: Arc<SessionKeys>,
    ttl: TimeDelta,
}

impl SessionManager {
    pub fn new(store: Arc<dyn Store>, keys: SessionKeys, ttl: Duration) -> Result<Self, Error> {
        let ttl = TimeDelta::from_std(ttl).map_err(|e| Error::Internal {
            operation: format!("configure session timeout: {e}"),
        })?;
        Ok(Self {
            store,
            keys: Arc::new(keys),
            ttl,
        })
    }

    pub fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    /// Create a session for `user_id` expiring one TTL from now.
    pub async fn issue(&self, user_id: UserId, username: &str, metadata: &ClientMetadata) -> Result<IssuedSession, Error> {
        self.issue_at(user_id, username, metadata, Utc::now()).await
    }

    #[instrument(skip(self, username, metadata), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn issue_at(
        &self,
        user_id: UserId,
        username: &str,
        metadata: &ClientMetadata,
        now: DateTime<Utc>,
    ) -> Result<IssuedSession, Error> {
        // Whole seconds, so the token's exp and the row's expires_at agree exactly
        let now = now.trunc_subsecs(0);
        let expires_at = now + self.ttl;
        let session_id = random_id(SESSION_ID_BYTES);

        let token = self.keys.sign(&SessionClaims {
            sub: user_id,
            sid: session_id.clone(),
            username: username.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: random_id(TOKEN_ID_BYTES),
        })?;

        let request = SessionCreateDBRequest {
            session_id: session_id.clone(),
            user_id,
            token: token.clone(),
            expires_at,
            user_agent: metadata.user_agent.clone(),
            ip_address: metadata.ip_address.clone(),
        };
        self.store.create_session(&request).await.map_err(|e| match e {
            // 256 random bits colliding is not a client problem
            DbError::UniqueViolation { .. } => Error::Internal {
                operation: "create session: session id collision".to_string(),
            },
            other => Error::Database(other),
        })?;

        debug!(user_id = %abbrev_uuid(&user_id), "Session issued");
        Ok(IssuedSession {
            session_id,
            token,
            expires_at,
        })
    }

    /// Resolve a presented credential to a live session and an active user.
    pub async fn validate(&self, credential: &Credential) -> Result<ValidatedSession, Error> {
        self.validate_at(credential, Utc::now()).await
    }

    #[instrument(skip_all, err(level = "debug"))]
    pub async fn validate_at(&self, credential: &Credential, now: DateTime<Utc>) -> Result<ValidatedSession, Error> {
        let (session, presented_claims) = match credential {
            Credential::SessionId(session_id) => {
                let session = self.store.get_session(session_id).await?.ok_or_else(rejected)?;
                (session, None)
            }
            Credential::Token(token) => {
                let claims = self.keys.verify(token)?;
                let session = self.store.get_session(&claims.sid).await?.ok_or_else(rejected)?;
                if !constant_time_eq(session.token.as_bytes(), token.as_bytes()) {
                    // Superseded by a refresh
                    return Err(rejected());
                }
                (session, Some(claims))
            }
        };

        if !session.is_live_at(now) {
            return Err(rejected());
        }

        // The row's token must also be ours and must name the row's owner
        let claims = match presented_claims {
            Some(claims) => claims,
            None => self.keys.verify(&session.token)?,
        };
        if claims.sid != session.session_id || claims.sub != session.user_id {
            return Err(rejected());
        }

        let user = self.store.get_user_by_id(session.user_id).await?.ok_or_else(rejected)?;
        if !user.is_active {
            return Err(rejected());
        }

        Ok(ValidatedSession { session, user })
    }

    /// Deactivate one session. Unknown or already inactive sessions are not an error.
    #[instrument(skip_all, err)]
    pub async fn revoke(&self, session_id: &str) -> Result<bool, Error> {
        let revoked = self.store.deactivate_session(session_id).await?;
        if revoked {
            debug!("Session revoked");
        }
        Ok(revoked)
    }

    /// Revoke the session a credential refers to, whichever form it takes.
    pub async fn revoke_credential(&self, credential: &Credential) -> Result<bool, Error> {
        match credential {
            Credential::SessionId(session_id) => self.revoke(session_id).await,
            Credential::Token(token) => match self.keys.verify(token) {
                Ok(claims) => self.revoke(&claims.sid).await,
                Err(Error::Unauthenticated { .. }) => Ok(false),
                Err(e) => Err(e),
            },
        }
    }

    /// Deactivate every session the user holds.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn revoke_all_for_user(&self, user_id: UserId) -> Result<u64, Error> {
        let revoked = self.store.deactivate_user_sessions(user_id).await?;
        info!(user_id = %abbrev_uuid(&user_id), revoked, "Revoked all sessions for user");
        Ok(revoked)
    }

    /// Re-sign a live session's token and extend its expiry to at least one TTL from now.
    ///
    /// The session id is unchanged. The previous token stops validating.
    pub async fn refresh(&self, credential: &Credential) -> Result<IssuedSession, Error> {
        self.refresh_at(credential, Utc::now()).await
    }

    #[instrument(skip_all, err)]
    pub async fn refresh_at(&self, credential: &Credential, now: DateTime<Utc>) -> Result<IssuedSession, Error> {
        let validated = self.validate_at(credential, now).await?;
        let session = validated.session;

        let now = now.trunc_subsecs(0);
        let expires_at = session.expires_at.max(now + self.ttl);

        let token = self.keys.sign(&SessionClaims {
            sub: session.user_id,
            sid: session.session_id.clone(),
            username: validated.user.username.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: random_id(TOKEN_ID_BYTES),
        })?;

        self.store
            .update_session_token(&session.session_id, &token, expires_at)
            .await
            .map_err(|e| match e {
                // Revoked between validation and update
                DbError::NotFound => rejected(),
                other => Error::Database(other),
            })?;

        debug!(user_id = %abbrev_uuid(&session.user_id), "Session refreshed");
        Ok(IssuedSession {
            session_id: session.session_id,
            token,
            expires_at,
        })
    }

    /// Deactivate sessions whose expiry has passed. Returns how many were swept.
    #[instrument(skip(self), err)]
    pub async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        Ok(self.store.deactivate_expired_sessions(now).await?)
    }
}
