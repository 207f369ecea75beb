// src/domain/repositories/taxonomy_store.rs
use std::fmt::Debug;

use crate::domain::error::DomainResult;
use crate::domain::listing::TermId;

/// Taxonomy collaborator. Hierarchies are supported through the optional
/// parent term.
pub trait TaxonomyStore: Send + Sync + Debug {
    fn find_or_create_term(
        &self,
        name: &str,
        taxonomy: &str,
        parent: Option<TermId>,
    ) -> DomainResult<TermId>;
}
