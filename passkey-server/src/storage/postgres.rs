//! PostgreSQL credential store
//!
//! Users and their passkeys survive restarts. Uniqueness is left to the
//! database: the credential id is the primary key, so two concurrent
//! registrations of the same id cannot both commit.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use passkey_core::{
    AttestationFormat, Base64UrlBytes, CounterUpdate, Credential, CredentialId, CredentialStore,
    StoreError, StoreResult, User, UserHandle,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use super::StorageError;

const CREDENTIAL_PKEY: &str = "credentials_pkey";

/// PostgreSQL-backed credential storage
pub struct PostgresCredentialStore {
    pool: PgPool,
}

impl PostgresCredentialStore {
    /// Connect with a bounded pool
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        tracing::info!(max_connections, "Connected to PostgreSQL database");
        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;

        tracing::info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for PostgresCredentialStore {
    async fn create_user(&self, user: User) -> StoreResult<()> {
        insert_user(&self.pool, &user).await
    }

    async fn find_user_by_identifier(&self, identifier: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT handle, identifier, display_name, password_hash, created_at
            FROM users
            WHERE identifier = $1
            "#,
        )
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(UserRow::into_user).transpose()
    }

    async fn find_user_by_handle(&self, handle: &UserHandle) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT handle, identifier, display_name, password_hash, created_at
            FROM users
            WHERE handle = $1
            "#,
        )
        .bind(handle.as_bytes())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(UserRow::into_user).transpose()
    }

    async fn list_credentials(&self, handle: &UserHandle) -> StoreResult<Vec<Credential>> {
        let rows = sqlx::query_as::<_, CredentialRow>(
            r#"
            SELECT id, user_handle, public_key, algorithm, sign_count, transports,
                   attestation_format, aaguid, created_at, last_used_at
            FROM credentials
            WHERE user_handle = $1
            ORDER BY created_at
            "#,
        )
        .bind(handle.as_bytes())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(CredentialRow::into_credential).collect()
    }

    async fn find_credential(&self, id: &CredentialId) -> StoreResult<Option<Credential>> {
        let row = sqlx::query_as::<_, CredentialRow>(
            r#"
            SELECT id, user_handle, public_key, algorithm, sign_count, transports,
                   attestation_format, aaguid, created_at, last_used_at
            FROM credentials
            WHERE id = $1
            "#,
        )
        .bind(id.as_bytes())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(CredentialRow::into_credential).transpose()
    }

    async fn add_credential(&self, credential: Credential) -> StoreResult<()> {
        insert_credential(&self.pool, &credential).await
    }

    async fn register_user_with_credential(
        &self,
        user: User,
        credential: Credential,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        insert_user(&mut *tx, &user).await?;
        insert_credential(&mut *tx, &credential).await?;
        tx.commit().await.map_err(map_sqlx_error)?;

        tracing::debug!(user_handle = %user.handle, credential_id = %credential.id, "User and credential committed");
        Ok(())
    }

    async fn update_credential_counter(
        &self,
        id: &CredentialId,
        sign_count: u32,
        used_at: DateTime<Utc>,
    ) -> StoreResult<CounterUpdate> {
        // the WHERE clause is the compare; row locking serialises racing updates
        let result = sqlx::query(
            r#"
            UPDATE credentials
            SET sign_count = $2, last_used_at = $3
            WHERE id = $1 AND (sign_count < $2 OR ($2 = 0 AND sign_count = 0))
            "#,
        )
        .bind(id.as_bytes())
        .bind(i64::from(sign_count))
        .bind(used_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 1 {
            return Ok(CounterUpdate::Advanced);
        }

        let stored: Option<i64> =
            sqlx::query_scalar("SELECT sign_count FROM credentials WHERE id = $1")
                .bind(id.as_bytes())
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        let stored = stored.ok_or(StoreError::NotFound)?;
        let stored = u32::try_from(stored)
            .map_err(|_| StoreError::Serialization(format!("sign_count {stored} out of range")))?;
        Ok(CounterUpdate::Stale { stored })
    }

    async fn touch_credential(&self, id: &CredentialId, used_at: DateTime<Utc>) -> StoreResult<()> {
        let result = sqlx::query("UPDATE credentials SET last_used_at = $2 WHERE id = $1")
            .bind(id.as_bytes())
            .bind(used_at)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "postgres"
    }

    async fn check_health(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

async fn insert_user<'e, E>(executor: E, user: &User) -> StoreResult<()>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO users (handle, identifier, display_name, password_hash, created_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(user.handle.as_bytes())
    .bind(&user.identifier)
    .bind(&user.display_name)
    .bind(user.password_hash.as_deref())
    .bind(user.created_at)
    .execute(executor)
    .await
    .map_err(|e| match unique_violation(&e) {
        // Either the identifier or the handle: both mean the account exists
        Some(_) => StoreError::AccountExists,
        None => map_sqlx_error(e),
    })?;
    Ok(())
}

async fn insert_credential<'e, E>(executor: E, credential: &Credential) -> StoreResult<()>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO credentials
            (id, user_handle, public_key, algorithm, sign_count, transports,
             attestation_format, aaguid, created_at, last_used_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(credential.id.as_bytes())
    .bind(credential.user_handle.as_bytes())
    .bind(credential.public_key.as_slice())
    .bind(credential.algorithm)
    .bind(i64::from(credential.sign_count))
    .bind(credential.transports.as_slice())
    .bind(credential.attestation_format.as_str())
    .bind(credential.aaguid)
    .bind(credential.created_at)
    .bind(credential.last_used_at)
    .execute(executor)
    .await
    .map_err(|e| {
        if unique_violation(&e).as_deref() == Some(CREDENTIAL_PKEY) {
            return StoreError::DuplicateCredentialId;
        }
        if let sqlx::Error::Database(db) = &e {
            if db.is_foreign_key_violation() {
                return StoreError::NotFound;
            }
        }
        map_sqlx_error(e)
    })?;
    Ok(())
}

/// Constraint name of a unique violation, if that is what `err` is.
fn unique_violation(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            Some(db.constraint().unwrap_or_default().to_string())
        }
        _ => None,
    }
}

fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::TypeNotFound { .. } => {
            StoreError::Serialization(err.to_string())
        }
        other => {
            tracing::error!(error = %other, "PostgreSQL operation failed");
            StoreError::Unavailable(other.to_string())
        }
    }
}

/// Database row for users
#[derive(sqlx::FromRow)]
struct UserRow {
    handle: Vec<u8>,
    identifier: String,
    display_name: String,
    password_hash: Option<String>,
    created_at: DateTime<Utc>,
}

impl UserRow {
    fn into_user(self) -> StoreResult<User> {
        Ok(User {
            handle: decode_handle(self.handle)?,
            identifier: self.identifier,
            display_name: self.display_name,
            password_hash: self.password_hash,
            created_at: self.created_at,
        })
    }
}

/// Database row for credentials
#[derive(sqlx::FromRow)]
struct CredentialRow {
    id: Vec<u8>,
    user_handle: Vec<u8>,
    public_key: Vec<u8>,
    algorithm: i64,
    sign_count: i64,
    transports: Vec<String>,
    attestation_format: String,
    aaguid: Uuid,
    created_at: DateTime<Utc>,
    last_used_at: Option<DateTime<Utc>>,
}

impl CredentialRow {
    fn into_credential(self) -> StoreResult<Credential> {
        let sign_count = u32::try_from(self.sign_count)
            .map_err(|_| StoreError::Serialization(format!("sign_count {} out of range", self.sign_count)))?;

        Ok(Credential {
            id: CredentialId::from(self.id),
            user_handle: decode_handle(self.user_handle)?,
            public_key: Base64UrlBytes(self.public_key),
            algorithm: self.algorithm,
            sign_count,
            transports: self.transports,
            attestation_format: AttestationFormat::from_fmt(&self.attestation_format),
            aaguid: self.aaguid,
            created_at: self.created_at,
            last_used_at: self.last_used_at,
        })
    }
}

fn decode_handle(bytes: Vec<u8>) -> StoreResult<UserHandle> {
    UserHandle::new(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

impl std::fmt::Debug for PostgresCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresCredentialStore")
            .field("pool", &"<PgPool>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        assert_eq!(map_sqlx_error(sqlx::Error::RowNotFound), StoreError::NotFound);
    }

    #[test]
    fn test_pool_timeout_is_transient() {
        let err = map_sqlx_error(sqlx::Error::PoolTimedOut);
        assert!(err.is_transient());
    }

    #[test]
    fn test_negative_counter_is_rejected() {
        let row = CredentialRow {
            id: vec![1; 16],
            user_handle: vec![2; 32],
            public_key: vec![0xa5],
            algorithm: -7,
            sign_count: -1,
            transports: Vec::new(),
            attestation_format: "none".to_string(),
            aaguid: Uuid::nil(),
            created_at: Utc::now(),
            last_used_at: None,
        };
        assert!(matches!(
            row.into_credential(),
            Err(StoreError::Serialization(_))
        ));
    }

    #[test]
    fn test_row_converts_to_credential() {
        let row = CredentialRow {
            id: vec![1; 16],
            user_handle: vec![2; 32],
            public_key: vec![0xa5],
            algorithm: -257,
            sign_count: 42,
            transports: vec!["usb".to_string()],
            attestation_format: "fido-u2f".to_string(),
            aaguid: Uuid::nil(),
            created_at: Utc::now(),
            last_used_at: None,
        };
        let credential = row.into_credential().unwrap();
        assert_eq!(credential.sign_count, 42);
        assert_eq!(credential.attestation_format, AttestationFormat::FidoU2f);
        assert_eq!(credential.user_handle.as_bytes(), &[2; 32]);
    }
}
