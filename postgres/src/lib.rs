//! # Flowsight Postgres
//!
//! `PostgreSQL` backends for the ingestion pipeline:
//!
//! - [`PgUnitOfWork`] / [`PgTx`]: the transactional projection store the
//!   batch receiver commits through
//! - [`PostgresGroupStore`]: shared pending-group storage for multi-process
//!   correlation deployments
//! - [`PostgresLockRegistry`]: per-key mutual exclusion via session advisory
//!   locks
//!
//! All three share one `sqlx` connection pool.
//!
//! # Example
//!
//! ```ignore
//! use flowsight_postgres::{PgUnitOfWork, PostgresGroupStore, PostgresLockRegistry};
//!
//! let uow = PgUnitOfWork::connect("postgres://localhost/flowsight").await?;
//! uow.migrate().await?;
//!
//! let groups = PostgresGroupStore::new(uow.pool().clone());
//! groups.migrate().await?;
//! let locks = PostgresLockRegistry::new(uow.pool().clone());
//! ```

pub mod correlation;
pub mod projection;

pub use correlation::{PostgresGroupStore, PostgresLockRegistry};
pub use projection::{PgTx, PgUnitOfWork};
