// src/domain/listing.rs
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::domain::attachment::{AttachmentId, AttachmentRecord};

pub type ListingId = i64;
pub type TermId = i64;

/// Feed-declared action for one listing node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingAction {
    New,
    Change,
    Delete,
    /// Shown-elsewhere reference kind; skipped when the destination has no
    /// such concept.
    Reference,
}

impl ListingAction {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "DELETE" => ListingAction::Delete,
            "NEW" => ListingAction::New,
            "REFERENCE" | "REF" => ListingAction::Reference,
            _ => ListingAction::Change,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishStatus {
    Published,
    Pending,
    Draft,
}

/// One taxonomy term assignment, deduplicated per (term, taxonomy) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TermAssignment {
    pub term_id: TermId,
    pub taxonomy: String,
}

/// One real-estate listing record as held by the content store.
///
/// `external_id` is the join key between feed nodes and stored records;
/// it is unique within one import source (folder).
#[derive(Builder, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[builder(setter(into))]
pub struct Listing {
    #[builder(default)]
    pub id: Option<ListingId>,
    pub external_id: String,
    pub source: String,
    pub title: String,
    #[builder(default = "PublishStatus::Published")]
    pub status: PublishStatus,
    pub language: String,
    #[builder(default)]
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    /// Last-update time declared by the feed, used for change detection.
    #[builder(default)]
    pub feed_updated_at: Option<DateTime<Utc>>,
    #[builder(default)]
    pub imported_at: Option<DateTime<Utc>>,
    /// False for records created manually; those are never deleted by a
    /// full-scope reconciliation.
    #[builder(default = "true")]
    pub imported_by_engine: bool,
    #[builder(default)]
    pub fields: BTreeMap<String, String>,
    #[builder(default)]
    pub unique_attributes: BTreeMap<String, String>,
    /// Grouped custom attributes: bucket name -> ordered values, serialized
    /// as JSON by the content store.
    #[builder(default)]
    pub attribute_buckets: BTreeMap<String, Vec<String>>,
    #[builder(default)]
    pub term_assignments: Vec<TermAssignment>,
    #[builder(default)]
    pub attachments: Vec<AttachmentRecord>,
    #[builder(default)]
    pub featured_attachment: Option<AttachmentId>,
    /// Full original document snapshot for future diffing.
    #[builder(default)]
    pub raw_source: Option<String>,
}

/// Slim projection used by the full-scope deletion scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingSummary {
    pub id: ListingId,
    pub external_id: String,
    pub imported_by_engine: bool,
}
