use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, header, request::Parts},
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    error::AppError,
    models::{Account, Role},
    repository::RepositoryState,
};

/// Name of the cookie carrying the session token.
pub const SESSION_COOKIE: &str = "session";

const SLUG_SUFFIX_LEN: usize = 6;
const SLUG_SUFFIX_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// SessionClaims
///
/// Payload of the signed session token. Issued at login and never mutated: the
/// credential expiry is a snapshot taken when the session started, and the gate
/// compares it against the clock on every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Account id.
    pub sub: Uuid,
    pub role: Role,
    pub credential_expiry: Option<DateTime<Utc>>,
    pub iat: i64,
    /// Session end (seconds since epoch), validated by `jsonwebtoken`.
    pub exp: i64,
}

impl SessionClaims {
    pub fn for_account(account: &Account, issued_at: DateTime<Utc>, ttl: std::time::Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(24));
        Self {
            sub: account.id,
            role: account.role,
            credential_expiry: account.credential_expiry,
            iat: issued_at.timestamp(),
            exp: (issued_at + ttl).timestamp(),
        }
    }
}

/// Signs `claims` with the configured HMAC secret (HS256).
pub fn issue_token(claims: &SessionClaims, secret: &str) -> Result<String, AppError> {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("failed to sign session token: {e}")))
}

/// decode_token
///
/// Verifies signature and `exp`. Any failure (bad signature, expired session,
/// malformed payload) yields `None`: an invalid token is treated exactly like a
/// missing one.
pub fn decode_token(token: &str, secret: &str) -> Option<SessionClaims> {
    let validation = Validation::default();
    match decode::<SessionClaims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation) {
        Ok(data) => Some(data.claims),
        Err(e) => {
            tracing::debug!(error = %e, "rejected session token");
            None
        }
    }
}

/// Reads the raw token from `Authorization: Bearer …`, falling back to the session
/// cookie.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());

    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    CookieJar::from_headers(headers)
        .get(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|token| !token.is_empty())
}

/// True when a non-MASTER credential's expiry lies in the past.
pub fn credential_expired(role: Role, expiry: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    role != Role::Master && expiry.is_some_and(|expiry| expiry < now)
}

/// Hashes a password with Argon2id and a random salt.
pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("failed to hash password: {e}")))
}

/// Checks `password` against a stored PHC hash string. An unparseable hash never
/// verifies.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "stored password hash is not a valid PHC string");
            false
        }
    }
}

/// generate_profile_slug
///
/// Lowercases the username, collapses whitespace runs into `-`, and appends `-`
/// plus six random lowercase alphanumerics.
pub fn generate_profile_slug(username: &str) -> String {
    let base = username
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-");

    let mut rng = rand::rng();
    let suffix: String = (0..SLUG_SUFFIX_LEN)
        .map(|_| SLUG_SUFFIX_CHARSET[rng.random_range(0..SLUG_SUFFIX_CHARSET.len())] as char)
        .collect();

    format!("{base}-{suffix}")
}

/// seed_master
///
/// Creates the MASTER account from the configured credentials unless one already
/// exists. Returns whether an account was created. Without configured credentials
/// nothing happens.
pub async fn seed_master(
    repo: &dyn crate::repository::Repository,
    config: &AppConfig,
) -> Result<bool, AppError> {
    let (Some(username), Some(password)) = (&config.master_username, &config.master_password)
    else {
        return Ok(false);
    };

    if repo.master_exists().await? {
        return Ok(false);
    }

    let account = repo
        .create_account(crate::models::NewAccount {
            username: username.clone(),
            password_hash: hash_password(password)?,
            role: Role::Master,
            credential_expiry: None,
            profile_slug: generate_profile_slug("master admin"),
        })
        .await?;

    tracing::info!(account_id = %account.id, profile_slug = %account.profile_slug, "seeded master account");
    Ok(true)
}

/// AuthUser
///
/// The resolved identity of an authenticated request, loaded fresh from the
/// repository so that a deleted account is rejected even while its token is valid.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: Role,
    pub profile_slug: String,
}

/// AuthUser Extractor Implementation
///
/// Uses the claims the authorization gate put into the request extensions; when the
/// gate did not run for this route it decodes the token itself. The claims' subject
/// must still exist.
///
/// Rejection: `AppError::Auth` (401).
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let repo = RepositoryState::from_ref(state);

        let claims = match parts.extensions.get::<SessionClaims>() {
            Some(claims) => claims.clone(),
            None => {
                let config = AppConfig::from_ref(state);
                token_from_headers(&parts.headers)
                    .and_then(|token| decode_token(&token, &config.jwt_secret))
                    .ok_or_else(|| AppError::auth("Unauthorized"))?
            }
        };

        let account = repo
            .get_account(claims.sub)
            .await?
            .ok_or_else(|| AppError::auth("Unauthorized"))?;

        Ok(AuthUser {
            id: account.id,
            role: account.role,
            profile_slug: account.profile_slug,
        })
    }
}
