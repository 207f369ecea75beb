// src/infrastructure/repositories/json_content_store.rs
//! Listing and taxonomy persistence as one JSON document.
//!
//! The engine's natural destination is an external content system; this
//! store makes the binary usable standalone by keeping listings and terms
//! in a single file next to the checkpoints, written atomically.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::listing::{Listing, ListingId, ListingSummary, TermId};
use crate::domain::repositories::content_store::ContentStore;
use crate::domain::repositories::taxonomy_store::TaxonomyStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TermRecord {
    id: TermId,
    name: String,
    taxonomy: String,
    parent: Option<TermId>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    next_listing_id: ListingId,
    next_term_id: TermId,
    listings: Vec<Listing>,
    terms: Vec<TermRecord>,
}

#[derive(Debug)]
pub struct JsonContentStore {
    path: PathBuf,
    inner: Mutex<StoreDocument>,
}

impl JsonContentStore {
    pub fn new(path: impl Into<PathBuf>) -> DomainResult<Self> {
        let path = path.into();
        let inner = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content).map_err(|e| {
                DomainError::DeserializationError(format!(
                    "corrupt content store {}: {}",
                    path.display(),
                    e
                ))
            })?
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            StoreDocument::default()
        };
        Ok(Self {
            path,
            inner: Mutex::new(inner),
        })
    }

    fn flush(&self, doc: &StoreDocument) -> DomainResult<()> {
        let content = serde_json::to_string_pretty(doc)?;
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        std::io::Write::write_all(&mut tmp, content.as_bytes())?;
        tmp.persist(&self.path).map_err(|e| {
            DomainError::RepositoryError(format!("cannot persist {}: {}", self.path.display(), e))
        })?;
        debug!("Wrote content store {}", self.path.display());
        Ok(())
    }

    fn lock(&self) -> DomainResult<std::sync::MutexGuard<'_, StoreDocument>> {
        self.inner
            .lock()
            .map_err(|_| DomainError::RepositoryError("content store lock poisoned".to_string()))
    }
}

impl ContentStore for JsonContentStore {
    fn find_by_external_id(
        &self,
        external_id: &str,
        source: &str,
    ) -> DomainResult<Option<Listing>> {
        Ok(self
            .lock()?
            .listings
            .iter()
            .find(|l| l.external_id == external_id && l.source == source)
            .cloned())
    }

    fn list_by_source(
        &self,
        source: &str,
        offset: usize,
        limit: usize,
    ) -> DomainResult<Vec<ListingSummary>> {
        let doc = self.lock()?;
        let mut matching: Vec<&Listing> =
            doc.listings.iter().filter(|l| l.source == source).collect();
        matching.sort_by_key(|l| l.id);
        Ok(matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|l| ListingSummary {
                id: l.id.unwrap_or_default(),
                external_id: l.external_id.clone(),
                imported_by_engine: l.imported_by_engine,
            })
            .collect())
    }

    fn upsert(&self, listing: &Listing) -> DomainResult<ListingId> {
        let mut doc = self.lock()?;
        let id = match listing.id {
            Some(id) => {
                let slot = doc
                    .listings
                    .iter_mut()
                    .find(|l| l.id == Some(id))
                    .ok_or_else(|| DomainError::ListingNotFound(id.to_string()))?;
                *slot = listing.clone();
                id
            }
            None => {
                doc.next_listing_id += 1;
                let id = doc.next_listing_id;
                let mut stored = listing.clone();
                stored.id = Some(id);
                doc.listings.push(stored);
                id
            }
        };
        self.flush(&doc)?;
        Ok(id)
    }

    fn delete(&self, id: ListingId) -> DomainResult<bool> {
        let mut doc = self.lock()?;
        let before = doc.listings.len();
        doc.listings.retain(|l| l.id != Some(id));
        let removed = doc.listings.len() < before;
        if removed {
            self.flush(&doc)?;
        }
        Ok(removed)
    }
}

impl TaxonomyStore for JsonContentStore {
    fn find_or_create_term(
        &self,
        name: &str,
        taxonomy: &str,
        parent: Option<TermId>,
    ) -> DomainResult<TermId> {
        let mut doc = self.lock()?;
        if let Some(term) = doc
            .terms
            .iter()
            .find(|t| t.name == name && t.taxonomy == taxonomy && t.parent == parent)
        {
            return Ok(term.id);
        }
        doc.next_term_id += 1;
        let id = doc.next_term_id;
        doc.terms.push(TermRecord {
            id,
            name: name.to_string(),
            taxonomy: taxonomy.to_string(),
            parent,
        });
        self.flush(&doc)?;
        Ok(id)
    }
}
