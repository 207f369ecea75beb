// src/domain/repositories/media_store.rs
use std::fmt::Debug;

use crate::domain::attachment::MediaId;
use crate::domain::error::DomainResult;

/// Media collaborator: fetches/copies attachment content and owns its
/// storage. Failures are recoverable per unit; the reconciler retries
/// within the configured attempt budget.
pub trait MediaStore: Send + Sync + Debug {
    fn import_from_path_or_url(&self, reference: &str) -> DomainResult<MediaId>;

    fn remove(&self, id: MediaId) -> DomainResult<bool>;
}
