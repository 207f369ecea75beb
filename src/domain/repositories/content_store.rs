// src/domain/repositories/content_store.rs
use std::fmt::Debug;

use crate::domain::error::DomainResult;
use crate::domain::listing::{Listing, ListingId, ListingSummary};

/// Content-store collaborator: persistence of listing records is external
/// to the import engine.
pub trait ContentStore: Send + Sync + Debug {
    /// Looks up a listing by external identifier within one import source.
    fn find_by_external_id(
        &self,
        external_id: &str,
        source: &str,
    ) -> DomainResult<Option<Listing>>;

    /// Pages through all listings tagged with the import source, for the
    /// full-scope deletion scan.
    fn list_by_source(
        &self,
        source: &str,
        offset: usize,
        limit: usize,
    ) -> DomainResult<Vec<ListingSummary>>;

    /// Inserts or updates, returning the stored id.
    fn upsert(&self, listing: &Listing) -> DomainResult<ListingId>;

    fn delete(&self, id: ListingId) -> DomainResult<bool>;
}
