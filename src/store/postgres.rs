//! PostgreSQL implementation of the store contracts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use super::{Device, RefreshRecord, RefreshTokenStore, RevocationRegistry, StoreError};
use crate::config::Postgres;

pub const DEFAULT_CREDENTIALS: &str = "postgres";
pub const DEFAULT_DATABASE_NAME: &str = "tokenpair";
pub const DEFAULT_POOL_SIZE: u32 = 10;

/// Row of `refresh_tokens`.
#[derive(sqlx::FromRow)]
struct RefreshRow {
    user_id: String,
    pair_id: String,
    secret_hash: String,
    user_agent: String,
    ip_address: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    revoked: bool,
}

impl From<RefreshRow> for RefreshRecord {
    fn from(row: RefreshRow) -> Self {
        Self {
            user_id: row.user_id,
            pair_id: row.pair_id,
            secret_hash: row.secret_hash,
            device: Device {
                ip: row.ip_address,
                user_agent: row.user_agent,
            },
            issued_at: row.issued_at,
            expires_at: row.expires_at,
            revoked: row.revoked,
        }
    }
}

/// PostgreSQL store for refresh records and revocations.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Open a connection pool and apply pending migrations.
    pub async fn connect(config: &Postgres) -> Result<Self, StoreError> {
        let username = config.username.as_deref().unwrap_or(DEFAULT_CREDENTIALS);
        let password = config.password.as_deref().unwrap_or(DEFAULT_CREDENTIALS);
        let database = config.database.as_deref().unwrap_or(DEFAULT_DATABASE_NAME);

        let addr = format!(
            "postgres://{username}:{password}@{}/{database}",
            config.address
        );
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size.unwrap_or(DEFAULT_POOL_SIZE))
            .connect(&addr)
            .await?;

        tracing::info!(hostname = %config.address, %database, "postgres connected");

        sqlx::migrate!().run(&pool).await.map_err(sqlx::Error::from)?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl RefreshTokenStore for PgStore {
    async fn save(&self, record: &RefreshRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (user_id, pair_id, secret_hash, user_agent, ip_address, issued_at, expires_at, revoked)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&record.user_id)
        .bind(&record.pair_id)
        .bind(&record.secret_hash)
        .bind(&record.device.user_agent)
        .bind(&record.device.ip)
        .bind(record.issued_at)
        .bind(record.expires_at)
        .bind(record.revoked)
        .execute(&self.pool)
        .await
        .map_err(|err| {
            if err
                .as_database_error()
                .is_some_and(|db| db.is_unique_violation())
            {
                StoreError::Conflict {
                    pair_id: record.pair_id.clone(),
                }
            } else {
                StoreError::Sql(err)
            }
        })?;

        Ok(())
    }

    async fn find_active(
        &self,
        user_id: &str,
        pair_id: &str,
    ) -> Result<Option<RefreshRecord>, StoreError> {
        let row = sqlx::query_as::<_, RefreshRow>(
            r#"
            SELECT user_id, pair_id, secret_hash, user_agent, ip_address, issued_at, expires_at, revoked
            FROM refresh_tokens
            WHERE user_id = $1
              AND pair_id = $2
              AND revoked = false
              AND expires_at > NOW()
            "#,
        )
        .bind(user_id)
        .bind(pair_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(RefreshRecord::from))
    }

    async fn mark_revoked(&self, secret_hash: &str) -> Result<bool, StoreError> {
        // Conditioned on the row still being active: of two concurrent
        // consumers only one sees an affected row.
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = true
            WHERE secret_hash = $1 AND revoked = false AND expires_at > NOW()
            "#,
        )
        .bind(secret_hash)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn revoke_pair(&self, pair_id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = true
            WHERE pair_id = $1 AND revoked = false
            "#,
        )
        .bind(pair_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RevocationRegistry for PgStore {
    async fn record(
        &self,
        pair_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO revoked_tokens (pair_id, expires_at)
            VALUES ($1, $2)
            ON CONFLICT (pair_id) DO NOTHING
            "#,
        )
        .bind(pair_id)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn is_revoked(&self, pair_id: &str) -> Result<bool, StoreError> {
        let (revoked,) = sqlx::query_as::<_, (bool,)>(
            r#"SELECT EXISTS(SELECT 1 FROM revoked_tokens WHERE pair_id = $1)"#,
        )
        .bind(pair_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(revoked)
    }

    async fn sweep(&self) -> Result<u64, StoreError> {
        let result =
            sqlx::query(r#"DELETE FROM revoked_tokens WHERE expires_at < NOW()"#)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }
}
