//! # Credential Verifier
//!
//! Turns a username and secret into a [`Principal`].
//!
//! ```text
//! verify(username, secret)
//!     │
//!     ├── load_credential(username) ──► None ──► argon2 verify against decoy
//!     │                                           └──► AuthFailure::NotFound
//!     │
//!     └── Some(credential) ──► argon2 verify against stored hash
//!                                 ├── mismatch ──► AuthFailure::BadSecret
//!                                 └── match ─────► Principal
//!                                                  + record_last_login (detached)
//! ```
//!
//! Both failure paths pay for one full hash verification, so response time
//! does not reveal whether the account exists.

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use std::sync::Arc;
use tracing::{debug, info, warn};

use vendra_core::Principal;

use crate::error::{AuthFailure, EngineError, EngineResult};
use crate::store::PosStore;

/// Hashes a secret into an argon2 PHC string with a fresh salt.
pub fn hash_secret(secret: &str) -> EngineResult<String> {
    vendra_db::repository::user::hash_password(secret)
        .map_err(|e| EngineError::Hashing(e.to_string()))
}

/// Checks a secret against a PHC string. Unparseable hashes never match.
fn verify_secret(secret: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(secret.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            warn!(error = %e, "Stored password hash is malformed");
            false
        }
    }
}

/// Verifies logins against a [`PosStore`].
pub struct CredentialVerifier {
    store: Arc<dyn PosStore>,
    /// Hash of a throwaway secret, verified when the username is unknown.
    decoy_hash: String,
}

impl CredentialVerifier {
    pub fn new(store: Arc<dyn PosStore>) -> EngineResult<Self> {
        let decoy_hash = hash_secret(&uuid::Uuid::new_v4().to_string())?;
        Ok(CredentialVerifier { store, decoy_hash })
    }

    /// Authenticates a user.
    ///
    /// ## Returns
    /// * `Ok(Principal)` - Secret matches an active account
    /// * `Err(EngineError::Auth(_))` - Unknown user or wrong secret;
    ///   both render as the same message
    /// * `Err(EngineError::PersistenceFailed)` - Credential lookup failed
    pub async fn verify(&self, username: &str, secret: &str) -> EngineResult<Principal> {
        let username = username.trim();
        debug!(username = %username, "Verifying credentials");

        let credential = self.store.load_credential(username).await?;

        let hash = match &credential {
            Some(c) => c.password_hash.clone(),
            None => self.decoy_hash.clone(),
        };

        let secret_owned = secret.to_string();
        let matches = tokio::task::spawn_blocking(move || verify_secret(&secret_owned, &hash))
            .await
            .map_err(|e| EngineError::Internal(format!("credential check aborted: {e}")))?;

        let credential = match credential {
            Some(c) if matches => c,
            Some(_) => return Err(self.refuse(username, AuthFailure::BadSecret)),
            None => return Err(self.refuse(username, AuthFailure::NotFound)),
        };

        let principal = credential.to_principal();
        info!(
            user_id = %principal.id,
            username = %principal.username,
            role = %principal.role,
            "Login accepted"
        );

        let store = Arc::clone(&self.store);
        let user_id = principal.id;
        tokio::spawn(async move {
            if let Err(e) = store.record_last_login(user_id).await {
                warn!(user_id = %user_id, error = %e, "Failed to record last login");
            }
        });

        Ok(principal)
    }

    fn refuse(&self, username: &str, failure: AuthFailure) -> EngineError {
        warn!(username = %username, cause = failure.code(), "Login refused");
        EngineError::Auth(failure)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
