//! # User Repository
//!
//! Accounts and their credential hashes. Hashes are argon2 PHC strings;
//! nothing outside [`hash_password`] and the credential verifier ever looks
//! inside them.

use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHasher};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use vendra_core::validation::validate_username;
use vendra_core::{Role, ValidationError};

/// Hashes a password into an argon2 PHC string with a fresh random salt.
pub fn hash_password(password: &str) -> DbResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| DbError::Hashing(e.to_string()))?;

    Ok(hash.to_string())
}

/// What the credential verifier needs about one account.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CredentialRecord {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub full_name: String,
    pub role: Role,
    pub is_active: bool,
    pub last_login: Option<DateTime<Utc>>,
}

/// Fields needed to create an account.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    /// Plain text; hashed before it reaches the database.
    pub password: String,
    pub full_name: String,
    pub email: Option<String>,
    pub role: Role,
}

impl NewUser {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        full_name: impl Into<String>,
        role: Role,
    ) -> Self {
        NewUser {
            username: username.into(),
            password: password.into(),
            full_name: full_name.into(),
            email: None,
            role,
        }
    }
}

/// Repository for user accounts.
#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        UserRepository { pool }
    }

    /// Loads the credential of an active account. Deactivated accounts
    /// look exactly like unknown ones.
    pub async fn get_credential(&self, username: &str) -> DbResult<Option<CredentialRecord>> {
        debug!(username = %username, "Loading credential");

        let record: Option<CredentialRecord> = sqlx::query_as(
            r#"
            SELECT id, username, password_hash, full_name, role, is_active, last_login
            FROM users
            WHERE username = ?1 AND is_active = 1
            "#,
        )
        .bind(username.trim())
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Creates an account and returns its id.
    ///
    /// ## Returns
    /// * `Err(DbError::UniqueViolation)` - Username taken
    /// * `Err(DbError::Validation)` - Bad username or empty password
    pub async fn insert_user(&self, user: &NewUser) -> DbResult<i64> {
        let username = user.username.trim();
        validate_username(username)?;
        if user.password.is_empty() {
            return Err(ValidationError::Required {
                field: "password".to_string(),
            }
            .into());
        }

        let password_hash = hash_password(&user.password)?;

        let result = sqlx::query(
            r#"
            INSERT INTO users (username, password_hash, full_name, email, role, is_active, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)
            "#,
        )
        .bind(username)
        .bind(password_hash)
        .bind(user.full_name.trim())
        .bind(&user.email)
        .bind(user.role)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { .. } => DbError::duplicate("username", username),
            other => other,
        })?;

        let id = result.last_insert_rowid();
        info!(user_id = %id, username = %username, role = %user.role, "User created");
        Ok(id)
    }

    /// Stamps the last login time.
    pub async fn record_last_login(&self, user_id: i64) -> DbResult<()> {
        let result = sqlx::query("UPDATE users SET last_login = ?2 WHERE id = ?1")
            .bind(user_id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("User", user_id));
        }
        Ok(())
    }

    /// Activates or deactivates an account.
    pub async fn set_active(&self, user_id: i64, active: bool) -> DbResult<()> {
        let result = sqlx::query("UPDATE users SET is_active = ?2 WHERE id = ?1")
            .bind(user_id)
            .bind(active)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("User", user_id));
        }
        Ok(())
    }

    /// Counts accounts, active or not.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
