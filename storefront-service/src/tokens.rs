use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};
use thiserror::Error;

/// Which identity class a token is bound to. Selects the identity and token
/// tables; the returned names are compile-time constants, never request input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerClass {
    Customer,
    Manager,
}

impl OwnerClass {
    fn identity_table(self) -> &'static str {
        match self {
            OwnerClass::Customer => "customers",
            OwnerClass::Manager => "managers",
        }
    }

    fn token_table(self) -> &'static str {
        match self {
            OwnerClass::Customer => "customer_tokens",
            OwnerClass::Manager => "manager_tokens",
        }
    }

    fn owner_column(self) -> &'static str {
        match self {
            OwnerClass::Customer => "customer_id",
            OwnerClass::Manager => "manager_id",
        }
    }
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("no such user")]
    UserNotFound,
    #[error("invalid password")]
    InvalidPassword,
    #[error("token expired")]
    TokenExpired,
    #[error("no authentication")]
    NotAuthenticated,
    #[error("token storage failed: {0}")]
    Storage(#[from] sqlx::Error),
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Issues and resolves opaque bearer tokens. Token material is 256 bits from
/// the OS CSPRNG; only the SHA-256 digest of the encoded value is persisted,
/// so a leaked table never yields usable credentials. An identity may hold
/// any number of live tokens at once.
pub struct TokenStore {
    pool: PgPool,
    ttl: Duration,
}

impl TokenStore {
    pub fn new(pool: PgPool, ttl: Duration) -> Self {
        Self { pool, ttl }
    }

    /// Verifies the login credentials and issues a fresh token on success.
    pub async fn issue(
        &self,
        class: OwnerClass,
        phone: &str,
        password: &str,
    ) -> Result<IssuedToken, TokenError> {
        let sql = format!(
            "SELECT id, password_hash FROM {} WHERE phone = $1",
            class.identity_table()
        );
        let row = sqlx::query(&sql)
            .bind(phone)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Err(TokenError::UserNotFound);
        };
        let owner_id: i64 = row.try_get("id")?;
        let stored_hash: String = row.try_get("password_hash")?;

        let parsed = PasswordHash::new(&stored_hash).map_err(|_| TokenError::InvalidPassword)?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .map_err(|_| TokenError::InvalidPassword)?;

        self.issue_for(class, owner_id).await
    }

    /// Issues a token for an already-authenticated identity (admin-driven
    /// manager registration auto-issues through this path).
    pub async fn issue_for(
        &self,
        class: OwnerClass,
        owner_id: i64,
    ) -> Result<IssuedToken, TokenError> {
        let token = generate_token();
        let token_hash = hash_token(&token);
        let issued_at = Utc::now();
        let expires_at = issued_at + self.ttl;

        let sql = format!(
            "INSERT INTO {} (token_hash, {}, issued_at, expires_at) VALUES ($1, $2, $3, $4)",
            class.token_table(),
            class.owner_column()
        );
        sqlx::query(&sql)
            .bind(token_hash.as_slice())
            .bind(owner_id)
            .bind(issued_at)
            .bind(expires_at)
            .execute(&self.pool)
            .await?;

        Ok(IssuedToken { token, expires_at })
    }

    /// Resolves a presented token to its owning identity. The three outcomes
    /// stay distinct: unknown token is `NotAuthenticated` (a benign no-session,
    /// never an internal error), a known-but-stale token is `TokenExpired`.
    pub async fn resolve(&self, class: OwnerClass, token: &str) -> Result<i64, TokenError> {
        let token_hash = hash_token(token);
        let sql = format!(
            "SELECT {} AS owner_id, expires_at FROM {} WHERE token_hash = $1",
            class.owner_column(),
            class.token_table()
        );
        let row = sqlx::query(&sql)
            .bind(token_hash.as_slice())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Err(TokenError::NotAuthenticated);
        };
        let owner_id: i64 = row.try_get("owner_id")?;
        let expires_at: DateTime<Utc> = row.try_get("expires_at")?;

        if Utc::now() > expires_at {
            return Err(TokenError::TokenExpired);
        }
        Ok(owner_id)
    }

    /// Lenient variant for the gate middleware: unknown or expired tokens map
    /// to `None`, deferring the authorization decision to the handler. Storage
    /// failures still surface loudly.
    pub async fn identity_for_token(
        &self,
        class: OwnerClass,
        token: &str,
    ) -> Result<Option<i64>, TokenError> {
        match self.resolve(class, token).await {
            Ok(id) => Ok(Some(id)),
            Err(TokenError::NotAuthenticated) | Err(TokenError::TokenExpired) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
}
