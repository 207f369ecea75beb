// src/application/services/listing_reconciler.rs
use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use crate::application::error::{ApplicationError, ApplicationResult};
use crate::application::services::attachment_reconciler::{
    AttachmentReconciler, ReconcileOutcome,
};
use crate::application::services::field_extractor::FieldExtractor;
use crate::application::services::resource_governor::ResourceGovernor;
use crate::config::LanguagePolicy;
use crate::domain::attachment::{AttachmentRecord, IncomingAttachment};
use crate::domain::checkpoint::{ImportMode, ImportScope};
use crate::domain::document::DocumentNode;
use crate::domain::feed::FeedListing;
use crate::domain::listing::{Listing, ListingAction, ListingBuilder, PublishStatus};
use crate::domain::repositories::content_store::ContentStore;
use crate::domain::repositories::media_store::MediaStore;
use crate::infrastructure::mapping_table::MappingTable;

/// Bookkeeping attribute keys re-stamped on every import.
pub const ATTR_IMPORTED_AT: &str = "_imported_at";
pub const ATTR_IMPORT_SOURCE: &str = "_import_source";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Shown-elsewhere reference kind the destination cannot host.
    UnsupportedKind,
    /// Declared language is not available at the destination.
    LanguageNotAvailable,
    /// Feed copy is not newer than the stored record.
    Unchanged,
}

/// What happened to one listing node.
#[derive(Debug)]
pub enum ListingDecision {
    Deleted { existed: bool },
    Skipped(SkipReason),
    Proceed(Box<ListingPlan>),
}

/// A persisted listing plus the attachment work still ahead of it.
#[derive(Debug)]
pub struct ListingPlan {
    pub listing: Listing,
    pub attachments: ReconcileOutcome,
    pub inserted: bool,
    /// Feed-declared timestamp, stamped onto the record only once its
    /// attachments are complete; until then the listing reads as changed
    /// and an interrupted import retries it.
    pub feed_updated_at: Option<DateTime<Utc>>,
}

/// Progress of the full-scope deletion scan across invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletionProgress {
    pub offset: usize,
    pub done: bool,
    pub deleted: u64,
}

/// Decides, per listing node, between insert, update-in-place, skip and
/// delete, and persists the core record. Attachment fetching is paced by
/// the caller; this service only classifies it.
#[derive(Debug)]
pub struct ListingReconciler {
    content_store: Arc<dyn ContentStore>,
    media_store: Arc<dyn MediaStore>,
    field_extractor: FieldExtractor,
    attachment_reconciler: AttachmentReconciler,
    languages: LanguagePolicy,
    force_review_status: bool,
}

impl ListingReconciler {
    pub fn new(
        content_store: Arc<dyn ContentStore>,
        media_store: Arc<dyn MediaStore>,
        field_extractor: FieldExtractor,
        languages: LanguagePolicy,
        force_review_status: bool,
    ) -> Self {
        Self {
            content_store,
            media_store,
            field_extractor,
            attachment_reconciler: AttachmentReconciler::new(),
            languages,
            force_review_status,
        }
    }

    #[instrument(level = "debug", skip(self, feed, table), fields(external_id = %feed.external_id))]
    pub fn reconcile<N: DocumentNode>(
        &self,
        feed: &FeedListing<'_, N>,
        source: &str,
        scope: ImportScope,
        mode: ImportMode,
        table: &MappingTable,
        now: DateTime<Utc>,
    ) -> ApplicationResult<ListingDecision> {
        let existing = self
            .content_store
            .find_by_external_id(&feed.external_id, source)?;

        // An explicit delete wins over everything, including the language
        // filter: the record may predate a policy change.
        if feed.action == ListingAction::Delete {
            return match existing {
                Some(listing) => {
                    self.remove_listing(&listing)?;
                    Ok(ListingDecision::Deleted { existed: true })
                }
                None => Ok(ListingDecision::Deleted { existed: false }),
            };
        }

        if feed.action == ListingAction::Reference {
            debug!("Skipping reference-kind listing {}", feed.external_id);
            return Ok(ListingDecision::Skipped(SkipReason::UnsupportedKind));
        }

        let language = feed
            .language
            .clone()
            .unwrap_or_else(|| self.languages.default.clone());
        if self.languages.filter_enabled && !self.languages.available.contains(&language) {
            debug!(
                "Skipping listing {} in unavailable language '{}'",
                feed.external_id, language
            );
            return Ok(ListingDecision::Skipped(SkipReason::LanguageNotAvailable));
        }

        // Change detection only applies when the run reconciles the whole
        // source and only updates what changed.
        if scope == ImportScope::Full && mode == ImportMode::DeletePartUpdateChanged {
            if let (Some(prev), Some(feed_ts)) = (&existing, feed.feed_updated_at) {
                if let Some(stored_ts) = prev.feed_updated_at {
                    if feed_ts <= stored_ts {
                        debug!(
                            "Listing {} unchanged ({} <= {})",
                            feed.external_id, feed_ts, stored_ts
                        );
                        return Ok(ListingDecision::Skipped(SkipReason::Unchanged));
                    }
                }
            }
        }

        let extracted = self.field_extractor.extract(feed.node, table, &language)?;

        let current_attachments: Vec<AttachmentRecord> = existing
            .as_ref()
            .map(|l| l.attachments.clone())
            .unwrap_or_default();
        let attachments = self
            .attachment_reconciler
            .reconcile(&current_attachments, &feed.attachments);

        let title = extracted
            .fields
            .get("title")
            .cloned()
            .unwrap_or_else(|| feed.external_id.clone());

        let inserted = existing.is_none();
        let mut listing = match existing {
            Some(mut prev) => {
                prev.title = title;
                prev.language = language;
                prev.updated_at = now;
                prev.fields = extracted.fields;
                prev.unique_attributes = extracted.unique_attributes;
                prev.attribute_buckets = extracted.attribute_buckets;
                prev.term_assignments = extracted.term_assignments;
                if self.force_review_status {
                    prev.status = PublishStatus::Pending;
                }
                prev
            }
            None => ListingBuilder::default()
                .external_id(feed.external_id.clone())
                .source(source)
                .title(title)
                .language(language)
                .status(if self.force_review_status {
                    PublishStatus::Pending
                } else {
                    PublishStatus::Published
                })
                .created_at(Some(now))
                .updated_at(now)
                .fields(extracted.fields)
                .unique_attributes(extracted.unique_attributes)
                .attribute_buckets(extracted.attribute_buckets)
                .term_assignments(extracted.term_assignments)
                .build()
                .map_err(|e| ApplicationError::Validation(e.to_string()))?,
        };

        // Bookkeeping is re-stamped even when field content is identical.
        // The feed timestamp is withheld until the caller finishes the
        // listing's attachments.
        listing.feed_updated_at = None;
        listing.imported_at = Some(now);
        listing.imported_by_engine = true;
        listing.raw_source = Some(feed.node.snapshot());
        listing
            .unique_attributes
            .insert(ATTR_IMPORTED_AT.to_string(), now.to_rfc3339());
        listing
            .unique_attributes
            .insert(ATTR_IMPORT_SOURCE.to_string(), source.to_string());

        // Drop the attachments classified for deletion, media first.
        for record in &current_attachments {
            if attachments.delete.contains(&record.id) {
                if let Err(e) = self.media_store.remove(record.media_id) {
                    warn!("Could not remove media {}: {}", record.media_id, e);
                }
            }
        }
        listing
            .attachments
            .retain(|a| attachments.keep.contains(&a.id));
        if let Some(featured) = listing.featured_attachment {
            if !attachments.keep.contains(&featured) {
                listing.featured_attachment = None;
            }
        }

        let id = self.content_store.upsert(&listing)?;
        listing.id = Some(id);

        Ok(ListingDecision::Proceed(Box::new(ListingPlan {
            listing,
            attachments,
            inserted,
            feed_updated_at: feed.feed_updated_at,
        })))
    }

    /// Writes a listing back, for callers mutating it attachment by
    /// attachment.
    pub fn persist(&self, listing: &Listing) -> ApplicationResult<()> {
        self.content_store.upsert(listing)?;
        Ok(())
    }

    /// Fetches one attachment into the media store and builds its record.
    pub fn import_attachment(
        &self,
        incoming: &IncomingAttachment,
        now: DateTime<Utc>,
    ) -> ApplicationResult<AttachmentRecord> {
        let media_id = self
            .media_store
            .import_from_path_or_url(&incoming.reference)?;
        let (checksum_kind, checksum) = match incoming.declared_checksum() {
            Some((kind, value)) => (Some(*kind), Some(value.to_string())),
            None => (None, None),
        };
        Ok(AttachmentRecord {
            id: media_id,
            media_id,
            original_ref: incoming.reference.clone(),
            original_size: incoming.declared_size,
            checksum,
            checksum_kind,
            modified_at: now,
            group_tag: incoming.group_tag.clone(),
        })
    }

    /// Removes engine-imported listings of one source that the feed no
    /// longer declares. `protected` is the feed's declared id set; it is
    /// empty in delete-all mode. Pauses at the deletion budget and reports
    /// the offset to resume from.
    #[instrument(level = "debug", skip(self, protected, governor))]
    pub fn delete_absent(
        &self,
        source: &str,
        protected: &HashSet<String>,
        start_offset: usize,
        page_size: usize,
        governor: &mut ResourceGovernor,
    ) -> ApplicationResult<DeletionProgress> {
        let mut offset = start_offset;
        let mut deleted = 0u64;

        loop {
            let page = self.content_store.list_by_source(source, offset, page_size)?;
            if page.is_empty() {
                return Ok(DeletionProgress {
                    offset,
                    done: true,
                    deleted,
                });
            }

            for summary in page {
                // Manually created records are never reconciled away.
                // Deleting shifts the listing under the offset, so only
                // retained records advance it.
                if !summary.imported_by_engine || protected.contains(&summary.external_id) {
                    offset += 1;
                    continue;
                }

                if let Some(listing) = self
                    .content_store
                    .find_by_external_id(&summary.external_id, source)?
                {
                    self.remove_listing(&listing)?;
                } else {
                    self.content_store.delete(summary.id)?;
                }
                deleted += 1;
                governor.note_deletion();
                if governor.should_yield().is_some() {
                    return Ok(DeletionProgress {
                        offset,
                        done: false,
                        deleted,
                    });
                }
            }
        }
    }

    /// Deletes one listing and its media.
    fn remove_listing(&self, listing: &Listing) -> ApplicationResult<()> {
        for attachment in &listing.attachments {
            if let Err(e) = self.media_store.remove(attachment.media_id) {
                warn!("Could not remove media {}: {}", attachment.media_id, e);
            }
        }
        if let Some(id) = listing.id {
            self.content_store.delete(id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ResourceBudgets, ValueFilterSettings};
    use crate::domain::services::transforms::{TransformContext, ValueFilter};
    use crate::infrastructure::xml::{parse_document, XmlElement};
    use crate::util::testing::{InMemoryContentStore, InMemoryMediaStore, InMemoryTaxonomyStore};
    use chrono::TimeZone;

    const TABLE: &str = "\
kind,source,destination,transform,transform_args,title:en,parent:en
field,texts->name,title,,,,
field,geo->postcode,postcode,,,,
";

    struct Fixture {
        content: Arc<InMemoryContentStore>,
        media: Arc<InMemoryMediaStore>,
        reconciler: ListingReconciler,
        table: MappingTable,
    }

    fn fixture() -> Fixture {
        fixture_with(LanguagePolicy::default(), false)
    }

    fn fixture_with(languages: LanguagePolicy, force_review: bool) -> Fixture {
        let content = Arc::new(InMemoryContentStore::new());
        let media = Arc::new(InMemoryMediaStore::new());
        let taxonomy = Arc::new(InMemoryTaxonomyStore::new());
        let filter = ValueFilterSettings::default();
        let extractor = FieldExtractor::new(
            taxonomy,
            ValueFilter::new(filter.enabled, filter.exempt_sources),
        );
        let reconciler = ListingReconciler::new(
            content.clone(),
            media.clone(),
            extractor,
            languages,
            force_review,
        );
        Fixture {
            content,
            media,
            reconciler,
            table: MappingTable::parse(TABLE, &TransformContext::default()).unwrap(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn listing_node(external_id: &str, lastmod: &str) -> XmlElement {
        parse_document(&format!(
            r#"<property action="CHANGE">
                <id>{external_id}</id>
                <lang>en</lang>
                <lastmod>{lastmod}</lastmod>
                <texts><name>Sunny flat</name></texts>
                <geo><postcode>81667</postcode></geo>
            </property>"#
        ))
        .unwrap()
    }

    fn reconcile(
        f: &Fixture,
        node: &XmlElement,
        scope: ImportScope,
        mode: ImportMode,
    ) -> ListingDecision {
        let feed = FeedListing::parse(node).unwrap();
        f.reconciler
            .reconcile(&feed, "acme", scope, mode, &f.table, now())
            .unwrap()
    }

    fn seed_existing(f: &Fixture, external_id: &str, feed_ts: &str) -> Listing {
        let node = listing_node(external_id, feed_ts);
        match reconcile(
            f,
            &node,
            ImportScope::Full,
            ImportMode::DeletePartUpdateChanged,
        ) {
            ListingDecision::Proceed(plan) => {
                // Finalize as the orchestrator would after attachments.
                let mut listing = plan.listing;
                listing.feed_updated_at = plan.feed_updated_at;
                f.reconciler.persist(&listing).unwrap();
                listing
            }
            other => panic!("expected insert, got {:?}", other),
        }
    }

    #[test]
    fn inserts_new_listing_with_bookkeeping() {
        let f = fixture();
        let node = listing_node("X-1", "2024-01-01");
        let decision = reconcile(
            &f,
            &node,
            ImportScope::Full,
            ImportMode::DeletePartUpdateChanged,
        );
        let plan = match decision {
            ListingDecision::Proceed(plan) => plan,
            other => panic!("unexpected decision: {:?}", other),
        };
        assert!(plan.inserted);
        assert_eq!(plan.listing.title, "Sunny flat");
        assert_eq!(plan.listing.status, PublishStatus::Published);
        assert_eq!(
            plan.listing
                .unique_attributes
                .get(ATTR_IMPORT_SOURCE)
                .map(String::as_str),
            Some("acme")
        );
        assert!(plan.listing.raw_source.as_deref().unwrap().contains("X-1"));
        assert_eq!(f.content.all().len(), 1);
    }

    #[test]
    fn update_preserves_identity_and_creation_time() {
        let f = fixture();
        let first = seed_existing(&f, "X-1", "2024-01-01");

        let node = listing_node("X-1", "2024-02-01");
        let decision = reconcile(
            &f,
            &node,
            ImportScope::Full,
            ImportMode::DeletePartUpdateChanged,
        );
        let plan = match decision {
            ListingDecision::Proceed(plan) => plan,
            other => panic!("unexpected decision: {:?}", other),
        };
        assert!(!plan.inserted);
        assert_eq!(plan.listing.id, first.id);
        assert_eq!(plan.listing.created_at, first.created_at);
        assert_eq!(f.content.all().len(), 1);
    }

    #[test]
    fn equal_timestamp_is_skipped_in_full_update_changed_mode() {
        let f = fixture();
        seed_existing(&f, "X-100", "2024-01-01");

        let node = listing_node("X-100", "2024-01-01");
        let decision = reconcile(
            &f,
            &node,
            ImportScope::Full,
            ImportMode::DeletePartUpdateChanged,
        );
        assert!(matches!(
            decision,
            ListingDecision::Skipped(SkipReason::Unchanged)
        ));

        // Delete-all mode re-imports regardless of timestamps.
        let decision = reconcile(
            &f,
            &node,
            ImportScope::Full,
            ImportMode::DeleteAllInsertAll,
        );
        assert!(matches!(decision, ListingDecision::Proceed(_)));
    }

    #[test]
    fn partial_scope_updates_even_at_equal_timestamp() {
        let f = fixture();
        seed_existing(&f, "X-1", "2024-01-01");
        let node = listing_node("X-1", "2024-01-01");
        let decision = reconcile(
            &f,
            &node,
            ImportScope::Partial,
            ImportMode::DeletePartUpdateChanged,
        );
        assert!(matches!(decision, ListingDecision::Proceed(_)));
    }

    #[test]
    fn delete_action_removes_record_and_media() {
        let f = fixture();
        let mut existing = seed_existing(&f, "X-1", "2024-01-01");
        existing.attachments.push(AttachmentRecord {
            id: 9,
            media_id: 909,
            original_ref: "a.jpg".to_string(),
            original_size: Some(10),
            checksum: None,
            checksum_kind: None,
            modified_at: now(),
            group_tag: "IMAGE".to_string(),
        });
        f.content.upsert(&existing).unwrap();

        let node =
            parse_document(r#"<property action="DELETE"><id>X-1</id></property>"#).unwrap();
        let decision = reconcile(
            &f,
            &node,
            ImportScope::Partial,
            ImportMode::DeletePartUpdateChanged,
        );
        assert!(matches!(decision, ListingDecision::Deleted { existed: true }));
        assert!(f.content.all().is_empty());
        assert_eq!(f.media.removed(), vec![909]);

        // Deleting again is a no-op, not an error.
        let decision = reconcile(
            &f,
            &node,
            ImportScope::Partial,
            ImportMode::DeletePartUpdateChanged,
        );
        assert!(matches!(decision, ListingDecision::Deleted { existed: false }));
    }

    #[test]
    fn reference_kind_is_skipped() {
        let f = fixture();
        let node =
            parse_document(r#"<property action="REFERENCE"><id>X-1</id></property>"#).unwrap();
        let decision = reconcile(
            &f,
            &node,
            ImportScope::Full,
            ImportMode::DeletePartUpdateChanged,
        );
        assert!(matches!(
            decision,
            ListingDecision::Skipped(SkipReason::UnsupportedKind)
        ));
        assert!(f.content.all().is_empty());
    }

    #[test]
    fn unavailable_language_is_skipped() {
        let mut languages = LanguagePolicy::default();
        languages.available = vec!["de".to_string()];
        let f = fixture_with(languages, false);
        let node = listing_node("X-1", "2024-01-01");
        let decision = reconcile(
            &f,
            &node,
            ImportScope::Full,
            ImportMode::DeletePartUpdateChanged,
        );
        assert!(matches!(
            decision,
            ListingDecision::Skipped(SkipReason::LanguageNotAvailable)
        ));
    }

    #[test]
    fn review_policy_forces_pending_status() {
        let f = fixture_with(LanguagePolicy::default(), true);
        let node = listing_node("X-1", "2024-01-01");
        let decision = reconcile(
            &f,
            &node,
            ImportScope::Full,
            ImportMode::DeletePartUpdateChanged,
        );
        let plan = match decision {
            ListingDecision::Proceed(plan) => plan,
            other => panic!("unexpected decision: {:?}", other),
        };
        assert_eq!(plan.listing.status, PublishStatus::Pending);
    }

    #[test]
    fn deletion_scan_removes_absent_engine_imports_only() {
        let f = fixture();
        seed_existing(&f, "X-1", "2024-01-01");
        seed_existing(&f, "X-2", "2024-01-01");
        seed_existing(&f, "X-3", "2024-01-01");
        // A manually created record in the same source.
        let manual = ListingBuilder::default()
            .external_id("MANUAL-1")
            .source("acme")
            .title("Hand-entered")
            .language("en")
            .updated_at(now())
            .imported_by_engine(false)
            .build()
            .unwrap();
        f.content.seed(manual);

        let protected: HashSet<String> =
            ["X-1".to_string(), "X-3".to_string()].into_iter().collect();
        let mut governor = ResourceGovernor::new(ResourceBudgets::default());
        let progress = f
            .reconciler
            .delete_absent("acme", &protected, 0, 2, &mut governor)
            .unwrap();

        assert!(progress.done);
        assert_eq!(progress.deleted, 1);
        let remaining: Vec<String> = f
            .content
            .all()
            .into_iter()
            .map(|l| l.external_id)
            .collect();
        assert!(remaining.contains(&"X-1".to_string()));
        assert!(!remaining.contains(&"X-2".to_string()));
        assert!(remaining.contains(&"X-3".to_string()));
        assert!(remaining.contains(&"MANUAL-1".to_string()));
    }

    #[test]
    fn deletion_scan_pauses_at_budget_and_resumes() {
        let f = fixture();
        for i in 0..5 {
            seed_existing(&f, &format!("X-{}", i), "2024-01-01");
        }
        let protected = HashSet::new();
        let mut budgets = ResourceBudgets::default();
        budgets.max_deletions_per_run = 2;

        let mut governor = ResourceGovernor::new(budgets.clone());
        let progress = f
            .reconciler
            .delete_absent("acme", &protected, 0, 10, &mut governor)
            .unwrap();
        assert!(!progress.done);
        assert_eq!(progress.deleted, 2);
        assert_eq!(f.content.all().len(), 3);

        // Second invocation resumes from the reported offset.
        let mut governor = ResourceGovernor::new(budgets.clone());
        let progress = f
            .reconciler
            .delete_absent("acme", &protected, progress.offset, 10, &mut governor)
            .unwrap();
        assert!(!progress.done);
        assert_eq!(f.content.all().len(), 1);

        let mut governor = ResourceGovernor::new(budgets);
        let progress = f
            .reconciler
            .delete_absent("acme", &protected, progress.offset, 10, &mut governor)
            .unwrap();
        assert!(progress.done);
        assert!(f.content.all().is_empty());
    }

    #[test]
    fn import_attachment_builds_record_from_declaration() {
        let f = fixture();
        let incoming = IncomingAttachment {
            reference: "https://cdn.example.com/a.jpg".to_string(),
            declared_size: Some(1024),
            check: Some(crate::domain::attachment::AttachmentCheck::Checksum {
                kind: crate::domain::attachment::ChecksumKind::Md5,
                value: "ab12".to_string(),
            }),
            group_tag: "IMAGE".to_string(),
            is_remote: true,
            featured: false,
        };
        let record = f.reconciler.import_attachment(&incoming, now()).unwrap();
        assert_eq!(record.original_ref, incoming.reference);
        assert_eq!(record.original_size, Some(1024));
        assert_eq!(record.checksum.as_deref(), Some("ab12"));
        assert_eq!(f.media.imported(), vec![incoming.reference.clone()]);
    }
}
