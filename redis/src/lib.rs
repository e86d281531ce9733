//! # Flowsight Redis
//!
//! Redis backends for multi-process correlation deployments:
//!
//! - [`RedisGroupStore`]: shared pending-group storage
//! - [`RedisLockRegistry`]: lease-based per-key locks with token-checked
//!   release
//!
//! Use both together: the store gives every consumer the same view of
//! pending partials, the lock registry makes each key's read-modify-write a
//! critical section across processes.

pub mod group_store;
pub mod lock;

pub use group_store::RedisGroupStore;
pub use lock::RedisLockRegistry;
