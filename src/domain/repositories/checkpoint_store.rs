// src/domain/repositories/checkpoint_store.rs
use std::fmt::Debug;

use chrono::{DateTime, Utc};

use crate::domain::checkpoint::ImportCheckpoint;
use crate::domain::error::DomainResult;

/// Durable checkpoint persistence, one record per source scope.
///
/// Implementations must persist atomically: after a crash the store holds
/// either the previous checkpoint or the new one, never a torn write.
pub trait CheckpointStore: Send + Sync + Debug {
    fn load(&self, scope_key: &str) -> DomainResult<Option<ImportCheckpoint>>;

    fn save(&self, checkpoint: &ImportCheckpoint) -> DomainResult<()>;

    fn delete(&self, scope_key: &str) -> DomainResult<bool>;

    /// Sticky cancellation signal with expiry. While active, no job may
    /// start or resume.
    fn kill_switch_until(&self) -> DomainResult<Option<DateTime<Utc>>>;

    fn engage_kill_switch(&self, until: DateTime<Utc>) -> DomainResult<()>;

    fn clear_kill_switch(&self) -> DomainResult<()>;
}
