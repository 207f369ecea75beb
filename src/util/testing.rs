// src/util/testing.rs
//! In-memory collaborator implementations for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::domain::attachment::MediaId;
use crate::domain::checkpoint::ImportCheckpoint;
use crate::domain::error::{DomainError, DomainResult};
use crate::domain::listing::{Listing, ListingId, ListingSummary, TermId};
use crate::domain::repositories::checkpoint_store::CheckpointStore;
use crate::domain::repositories::content_store::ContentStore;
use crate::domain::repositories::media_store::MediaStore;
use crate::domain::repositories::taxonomy_store::TaxonomyStore;
use crate::domain::services::clock::Clock;

#[derive(Debug, Default)]
struct ContentInner {
    next_id: ListingId,
    listings: Vec<Listing>,
}

/// Content store backed by a vector, ordered by id for stable paging.
#[derive(Debug, Default)]
pub struct InMemoryContentStore {
    inner: Mutex<ContentInner>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Listing> {
        self.inner.lock().unwrap().listings.clone()
    }

    pub fn get(&self, id: ListingId) -> Option<Listing> {
        self.inner
            .lock()
            .unwrap()
            .listings
            .iter()
            .find(|l| l.id == Some(id))
            .cloned()
    }

    /// Seeds a listing directly, assigning an id. Used for test fixtures.
    pub fn seed(&self, mut listing: Listing) -> ListingId {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = inner.next_id;
        listing.id = Some(id);
        inner.listings.push(listing);
        id
    }
}

impl ContentStore for InMemoryContentStore {
    fn find_by_external_id(
        &self,
        external_id: &str,
        source: &str,
    ) -> DomainResult<Option<Listing>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
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
        let inner = self.inner.lock().unwrap();
        let mut matching: Vec<&Listing> = inner
            .listings
            .iter()
            .filter(|l| l.source == source)
            .collect();
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
        let mut inner = self.inner.lock().unwrap();
        match listing.id {
            Some(id) => {
                let slot = inner
                    .listings
                    .iter_mut()
                    .find(|l| l.id == Some(id))
                    .ok_or_else(|| DomainError::ListingNotFound(id.to_string()))?;
                *slot = listing.clone();
                Ok(id)
            }
            None => {
                inner.next_id += 1;
                let id = inner.next_id;
                let mut stored = listing.clone();
                stored.id = Some(id);
                inner.listings.push(stored);
                Ok(id)
            }
        }
    }

    fn delete(&self, id: ListingId) -> DomainResult<bool> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.listings.len();
        inner.listings.retain(|l| l.id != Some(id));
        Ok(inner.listings.len() < before)
    }
}

#[derive(Debug, Default)]
struct TaxonomyInner {
    next_id: TermId,
    terms: Vec<(String, String, Option<TermId>, TermId)>,
}

#[derive(Debug, Default)]
pub struct InMemoryTaxonomyStore {
    inner: Mutex<TaxonomyInner>,
}

impl InMemoryTaxonomyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn term_count(&self) -> usize {
        self.inner.lock().unwrap().terms.len()
    }

    pub fn term_name(&self, id: TermId) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .terms
            .iter()
            .find(|(_, _, _, tid)| *tid == id)
            .map(|(name, _, _, _)| name.clone())
    }
}

impl TaxonomyStore for InMemoryTaxonomyStore {
    fn find_or_create_term(
        &self,
        name: &str,
        taxonomy: &str,
        parent: Option<TermId>,
    ) -> DomainResult<TermId> {
        let mut inner = self.inner.lock().unwrap();
        if let Some((_, _, _, id)) = inner
            .terms
            .iter()
            .find(|(n, t, p, _)| n == name && t == taxonomy && *p == parent)
        {
            return Ok(*id);
        }
        inner.next_id += 1;
        let id = inner.next_id;
        inner
            .terms
            .push((name.to_string(), taxonomy.to_string(), parent, id));
        Ok(id)
    }
}

#[derive(Debug, Default)]
struct MediaInner {
    next_id: MediaId,
    imported: Vec<(MediaId, String)>,
    removed: Vec<MediaId>,
    fail_remaining: HashMap<String, u32>,
}

/// Media store recording imports; individual references can be configured
/// to fail a number of times for retry-budget tests.
#[derive(Debug, Default)]
pub struct InMemoryMediaStore {
    inner: Mutex<MediaInner>,
}

impl InMemoryMediaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_times(&self, reference: &str, times: u32) {
        self.inner
            .lock()
            .unwrap()
            .fail_remaining
            .insert(reference.to_string(), times);
    }

    pub fn imported(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .imported
            .iter()
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn removed(&self) -> Vec<MediaId> {
        self.inner.lock().unwrap().removed.clone()
    }
}

impl MediaStore for InMemoryMediaStore {
    fn import_from_path_or_url(&self, reference: &str) -> DomainResult<MediaId> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(remaining) = inner.fail_remaining.get_mut(reference) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(DomainError::MediaOperationFailed(format!(
                    "simulated fetch failure: {}",
                    reference
                )));
            }
        }
        inner.next_id += 1;
        let id = inner.next_id;
        inner.imported.push((id, reference.to_string()));
        Ok(id)
    }

    fn remove(&self, id: MediaId) -> DomainResult<bool> {
        let mut inner = self.inner.lock().unwrap();
        inner.removed.push(id);
        Ok(true)
    }
}

#[derive(Debug, Default)]
struct CheckpointInner {
    checkpoints: HashMap<String, ImportCheckpoint>,
    kill_switch: Option<DateTime<Utc>>,
}

/// Checkpoint store backed by a map, used where tests do not care about
/// on-disk atomicity.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    inner: Mutex<CheckpointInner>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn load(&self, scope_key: &str) -> DomainResult<Option<ImportCheckpoint>> {
        Ok(self.inner.lock().unwrap().checkpoints.get(scope_key).cloned())
    }

    fn save(&self, checkpoint: &ImportCheckpoint) -> DomainResult<()> {
        self.inner
            .lock()
            .unwrap()
            .checkpoints
            .insert(checkpoint.scope_key.clone(), checkpoint.clone());
        Ok(())
    }

    fn delete(&self, scope_key: &str) -> DomainResult<bool> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .checkpoints
            .remove(scope_key)
            .is_some())
    }

    fn kill_switch_until(&self) -> DomainResult<Option<DateTime<Utc>>> {
        Ok(self.inner.lock().unwrap().kill_switch)
    }

    fn engage_kill_switch(&self, until: DateTime<Utc>) -> DomainResult<()> {
        self.inner.lock().unwrap().kill_switch = Some(until);
        Ok(())
    }

    fn clear_kill_switch(&self) -> DomainResult<()> {
        self.inner.lock().unwrap().kill_switch = None;
        Ok(())
    }
}

/// Clock advancing only when told to.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, duration: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now += duration;
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock().unwrap() = instant;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
