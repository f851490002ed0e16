//! Password hashing and the request extractors that resolve the logged-in account.

pub mod password_policy;

pub use password_policy::{is_valid_username, PasswordPolicy, PasswordPolicyError};

use crate::{
    entities::{Account, AccountModel},
    errors::{ApiError, ServiceError},
    middleware_helpers::session::SessionContext,
    AppState,
};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use once_cell::sync::Lazy;
use rand::RngCore;
use sea_orm::EntityTrait;
use std::sync::Arc;
use tracing::{debug, error};

/// Hashes `password` into an argon2 PHC string.
pub fn hash_password(password: &str) -> Result<String, ServiceError> {
    let mut salt_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| ServiceError::HashError(e.to_string()))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ServiceError::HashError(e.to_string()))
}

/// Checks `password` against a stored PHC string.
pub fn verify_password(password: &str, stored_hash: &str) -> Result<bool, ServiceError> {
    let parsed = PasswordHash::new(stored_hash).map_err(|e| {
        error!("Stored password hash is unreadable: {}", e);
        ServiceError::HashError(e.to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

static DUMMY_HASH: Lazy<Option<String>> =
    Lazy::new(|| hash_password("storefront-dummy-password").ok());

/// Runs one verification against a throwaway hash so unknown identifiers cost the same
/// as a wrong password.
pub fn verify_dummy(password: &str) {
    if let Some(hash) = DUMMY_HASH.as_deref() {
        let _ = verify_password(password, hash);
    }
}

/// Account bound to the request's session, if any.
#[derive(Debug, Clone)]
pub struct CurrentAccount(pub Option<AccountModel>);

/// Rejects anonymous requests with 401.
#[derive(Debug, Clone)]
pub struct RequireAccount(pub AccountModel);

/// Rejects non-staff requests with 401 or 403.
#[derive(Debug, Clone)]
pub struct RequireStaff(pub AccountModel);

async fn resolve_account(
    parts: &mut Parts,
    state: &Arc<AppState>,
) -> Result<Option<AccountModel>, ServiceError> {
    let context = SessionContext::from_request_parts(parts, state)
        .await
        .unwrap_or_else(|never| match never {});
    if context.is_new {
        return Ok(None);
    }

    let session = state.sessions.load(&context.key).await?;
    let Some(account_id) = session.account_id else {
        return Ok(None);
    };

    let account = Account::find_by_id(account_id).one(&*state.db).await?;
    match account {
        Some(a) if a.is_active => Ok(Some(a)),
        _ => {
            debug!(account_id, "Session refers to a missing or inactive account");
            Ok(None)
        }
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentAccount {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if let Some(cached) = parts.extensions.get::<CurrentAccount>() {
            return Ok(cached.clone());
        }
        let current = CurrentAccount(resolve_account(parts, state).await?);
        parts.extensions.insert(current.clone());
        Ok(current)
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequireAccount {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        match CurrentAccount::from_request_parts(parts, state).await? {
            CurrentAccount(Some(account)) => Ok(RequireAccount(account)),
            CurrentAccount(None) => Err(ApiError::Unauthorized),
        }
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequireStaff {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let RequireAccount(account) = RequireAccount::from_request_parts(parts, state).await?;
        if account.is_staff {
            Ok(RequireStaff(account))
        } else {
            Err(ServiceError::Forbidden("staff access required".into()).into())
        }
    }
}
