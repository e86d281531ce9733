//! `PostgreSQL` unit of work for the projection store.
//!
//! # Overview
//!
//! One [`PgTx`] wraps one database transaction. Every entity touched by a
//! batch is loaded and persisted inside it; the batch becomes visible
//! atomically on commit, and a rollback leaves no trace. That is the property
//! the batch receiver builds its all-or-nothing contract on.
//!
//! # Schema
//!
//! Entities are stored as bincode blobs keyed by entity id:
//!
//! ```sql
//! CREATE TABLE projected_entities (
//!     entity_id TEXT PRIMARY KEY,
//!     data BYTEA NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL
//! );
//! ```

use flowsight_core::projection::{ProjectionEntity, ProjectionError, ProjectionTx, Result, UnitOfWork};
use sqlx::postgres::{PgPool, PgPoolOptions};

/// `PostgreSQL`-backed [`UnitOfWork`].
///
/// # Example
///
/// ```ignore
/// use flowsight_postgres::PgUnitOfWork;
///
/// let uow = PgUnitOfWork::connect("postgres://localhost/flowsight").await?;
/// uow.migrate().await?;
/// ```
#[derive(Clone)]
pub struct PgUnitOfWork {
    pool: PgPool,
}

impl PgUnitOfWork {
    /// Create a unit of work over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` with a pool sized for batch ingestion.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the connection fails.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| ProjectionError::Storage(format!("Failed to connect: {e}")))?;

        Ok(Self::new(pool))
    }

    /// Create the projection table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the DDL fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS projected_entities (
                entity_id TEXT PRIMARY KEY,
                data BYTEA NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ProjectionError::Storage(format!("Migration failed: {e}")))?;

        Ok(())
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Load a committed entity outside any transaction, for read paths and
    /// assertions.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] on query failure or
    /// [`ProjectionError::Serialization`] if the stored blob is corrupt.
    pub async fn get(&self, entity_id: &str) -> Result<Option<ProjectionEntity>> {
        let row: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT data FROM projected_entities WHERE entity_id = $1")
                .bind(entity_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| ProjectionError::Storage(format!("Failed to load entity: {e}")))?;

        row.map(|(data,)| decode_entity(&data)).transpose()
    }
}

impl UnitOfWork for PgUnitOfWork {
    type Tx = PgTx;

    async fn begin(&self) -> Result<Self::Tx> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ProjectionError::Transaction(format!("Failed to begin: {e}")))?;
        Ok(PgTx { tx })
    }
}

/// One open database transaction over the projection table.
pub struct PgTx {
    tx: sqlx::Transaction<'static, sqlx::Postgres>,
}

impl ProjectionTx for PgTx {
    async fn load(&mut self, entity_id: &str) -> Result<Option<ProjectionEntity>> {
        let row: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT data FROM projected_entities WHERE entity_id = $1")
                .bind(entity_id)
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(|e| ProjectionError::Storage(format!("Failed to load entity: {e}")))?;

        row.map(|(data,)| decode_entity(&data)).transpose()
    }

    async fn persist(&mut self, entity: &ProjectionEntity) -> Result<()> {
        let data = bincode::serialize(entity)
            .map_err(|e| ProjectionError::Serialization(format!("Failed to encode entity: {e}")))?;

        sqlx::query(
            "INSERT INTO projected_entities (entity_id, data, updated_at)
             VALUES ($1, $2, now())
             ON CONFLICT (entity_id) DO UPDATE
             SET data = EXCLUDED.data, updated_at = now()",
        )
        .bind(&entity.entity_id)
        .bind(data)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| ProjectionError::Storage(format!("Failed to persist entity: {e}")))?;

        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| ProjectionError::Transaction(format!("Commit failed: {e}")))?;
        metrics::counter!("projection.commits").increment(1);
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| ProjectionError::Transaction(format!("Rollback failed: {e}")))?;
        metrics::counter!("projection.rollbacks").increment(1);
        Ok(())
    }
}

fn decode_entity(data: &[u8]) -> Result<ProjectionEntity> {
    bincode::deserialize(data)
        .map_err(|e| ProjectionError::Serialization(format!("Failed to decode entity: {e}")))
}
