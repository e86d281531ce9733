//! Failure-injecting correlation fakes.

use flowsight_core::correlation::{CorrelationError, GroupStore, MessageGroup, Result};

/// Group store whose every operation fails, simulating backend
/// unavailability. Used to verify that `correlate` surfaces a retriable
/// error instead of acknowledging the partial.
#[derive(Clone, Copy, Debug, Default)]
pub struct FailingGroupStore;

impl FailingGroupStore {
    /// Create the failing store.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl GroupStore for FailingGroupStore {
    async fn get(&self, _correlation_key: &str) -> Result<Option<MessageGroup>> {
        Err(CorrelationError::Store("backend unavailable".to_string()))
    }

    async fn put(&self, _group: &MessageGroup) -> Result<()> {
        Err(CorrelationError::Store("backend unavailable".to_string()))
    }

    async fn delete(&self, _correlation_key: &str) -> Result<()> {
        Err(CorrelationError::Store("backend unavailable".to_string()))
    }
}
