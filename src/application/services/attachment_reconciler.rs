// src/application/services/attachment_reconciler.rs
use std::collections::{HashMap, HashSet};

use tracing::{debug, instrument};

use crate::domain::attachment::{AttachmentId, AttachmentRecord, IncomingAttachment};
use crate::util::helper::normalize_filename;

/// Classification of one listing's attachments against the feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileOutcome {
    /// Existing attachments that stay valid.
    pub keep: Vec<AttachmentId>,
    /// Existing attachments to remove.
    pub delete: Vec<AttachmentId>,
    /// Incoming attachments that must be fetched/imported, each paired with
    /// its position in the declared list. The position stays meaningful even
    /// when two declarations share a reference.
    pub import_list: Vec<(usize, IncomingAttachment)>,
    /// Incoming references already satisfied by an existing attachment.
    pub exclude_from_import: HashMap<String, AttachmentId>,
    /// Set when the declared order differs from the stored order; every
    /// attachment is re-imported in that case.
    pub reset_all: bool,
}

/// Compares the attachment list recorded on an existing listing against the
/// list declared by the incoming document.
#[derive(Debug, Default)]
pub struct AttachmentReconciler;

impl AttachmentReconciler {
    pub fn new() -> Self {
        Self
    }

    #[instrument(level = "debug", skip_all, fields(existing = existing.len(), incoming = incoming.len()))]
    pub fn reconcile(
        &self,
        existing: &[AttachmentRecord],
        incoming: &[IncomingAttachment],
    ) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();

        if order_changed(existing, incoming) {
            debug!("Attachment order changed, re-importing all");
            outcome.reset_all = true;
            outcome.delete = existing.iter().map(|a| a.id).collect();
            outcome.import_list = incoming.iter().cloned().enumerate().collect();
            return outcome;
        }

        let mut matched_incoming: HashSet<usize> = HashSet::new();

        for record in existing {
            match best_match(record, incoming, &matched_incoming) {
                Some(idx) => {
                    matched_incoming.insert(idx);
                    outcome.keep.push(record.id);
                    outcome
                        .exclude_from_import
                        .insert(incoming[idx].reference.clone(), record.id);
                }
                None => outcome.delete.push(record.id),
            }
        }

        outcome.import_list = incoming
            .iter()
            .enumerate()
            .filter(|(idx, _)| !matched_incoming.contains(idx))
            .map(|(idx, a)| (idx, a.clone()))
            .collect();

        outcome
    }
}

/// Order comparison over the shared path/URL identifiers; entries that no
/// longer exist on either side are ignored.
fn order_changed(existing: &[AttachmentRecord], incoming: &[IncomingAttachment]) -> bool {
    let incoming_refs: HashSet<&str> = incoming.iter().map(|a| a.reference.as_str()).collect();
    let existing_refs: HashSet<&str> = existing.iter().map(|a| a.original_ref.as_str()).collect();

    let shared_existing: Vec<&str> = existing
        .iter()
        .map(|a| a.original_ref.as_str())
        .filter(|r| incoming_refs.contains(r))
        .collect();
    let shared_incoming: Vec<&str> = incoming
        .iter()
        .map(|a| a.reference.as_str())
        .filter(|r| existing_refs.contains(r))
        .collect();

    shared_existing != shared_incoming
}

/// Best-match priority: checksum, then valid-after mtime with matching
/// path, then path plus size, then normalized filename plus size. First
/// match wins within each level.
fn best_match(
    record: &AttachmentRecord,
    incoming: &[IncomingAttachment],
    taken: &HashSet<usize>,
) -> Option<usize> {
    let free = |pred: &dyn Fn(&IncomingAttachment) -> bool| {
        incoming
            .iter()
            .enumerate()
            .find(|(idx, a)| !taken.contains(idx) && pred(a))
            .map(|(idx, _)| idx)
    };

    free(&|a| {
        a.declared_checksum().is_some_and(|(kind, value)| {
            record.checksum.as_deref() == Some(value)
                && record.checksum_kind.map(|k| k == *kind).unwrap_or(true)
        })
    })
    .or_else(|| {
        free(&|a| {
            a.valid_after()
                .is_some_and(|ts| record.modified_at >= ts && a.reference == record.original_ref)
        })
    })
    .or_else(|| {
        free(&|a| {
            a.reference == record.original_ref
                && a.declared_size.is_some()
                && a.declared_size == record.original_size
        })
    })
    .or_else(|| {
        free(&|a| {
            a.declared_size.is_some()
                && a.declared_size == record.original_size
                && normalize_filename(&a.reference) == normalize_filename(&record.original_ref)
        })
    })
}

/// Primary/cover image selection after import.
///
/// A feed-designated cover always wins. Otherwise an already-set primary is
/// only replaced when the order changed; a listing without one gets the
/// first successfully imported attachment.
pub fn select_featured(
    current: Option<AttachmentId>,
    designated: Option<AttachmentId>,
    first_imported: Option<AttachmentId>,
    order_changed: bool,
) -> Option<AttachmentId> {
    if designated.is_some() {
        return designated;
    }
    if order_changed {
        first_imported.or(current)
    } else {
        current.or(first_imported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::attachment::{AttachmentCheck, ChecksumKind};
    use chrono::{TimeZone, Utc};

    fn record(id: AttachmentId, reference: &str, size: u64, checksum: &str) -> AttachmentRecord {
        AttachmentRecord {
            id,
            media_id: id + 100,
            original_ref: reference.to_string(),
            original_size: Some(size),
            checksum: Some(checksum.to_string()),
            checksum_kind: Some(ChecksumKind::Md5),
            modified_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            group_tag: "IMAGE".to_string(),
        }
    }

    fn incoming(reference: &str, size: u64, checksum: Option<&str>) -> IncomingAttachment {
        IncomingAttachment {
            reference: reference.to_string(),
            declared_size: Some(size),
            check: checksum.map(|c| AttachmentCheck::Checksum {
                kind: ChecksumKind::Md5,
                value: c.to_string(),
            }),
            group_tag: "IMAGE".to_string(),
            is_remote: false,
            featured: false,
        }
    }

    #[test]
    fn identical_sets_keep_everything() {
        let existing = vec![
            record(1, "a.jpg", 10, "aa"),
            record(2, "b.jpg", 20, "bb"),
            record(3, "c.jpg", 30, "cc"),
        ];
        let feed = vec![
            incoming("a.jpg", 10, Some("aa")),
            incoming("b.jpg", 20, Some("bb")),
            incoming("c.jpg", 30, Some("cc")),
        ];
        let outcome = AttachmentReconciler::new().reconcile(&existing, &feed);
        assert_eq!(outcome.keep, vec![1, 2, 3]);
        assert!(outcome.delete.is_empty());
        assert!(outcome.import_list.is_empty());
        assert!(!outcome.reset_all);
        assert_eq!(outcome.exclude_from_import.len(), 3);
    }

    #[test]
    fn changed_order_resets_all() {
        let existing = vec![
            record(1, "a.jpg", 10, "aa"),
            record(2, "b.jpg", 20, "bb"),
            record(3, "c.jpg", 30, "cc"),
        ];
        let feed = vec![
            incoming("c.jpg", 30, Some("cc")),
            incoming("b.jpg", 20, Some("bb")),
            incoming("a.jpg", 10, Some("aa")),
        ];
        let outcome = AttachmentReconciler::new().reconcile(&existing, &feed);
        assert!(outcome.reset_all);
        assert_eq!(outcome.delete, vec![1, 2, 3]);
        assert_eq!(outcome.import_list.len(), 3);
        assert!(outcome.keep.is_empty());
    }

    #[test]
    fn dropped_entries_do_not_count_as_order_change() {
        let existing = vec![
            record(1, "a.jpg", 10, "aa"),
            record(2, "b.jpg", 20, "bb"),
            record(3, "c.jpg", 30, "cc"),
        ];
        // b dropped, order of the remainder unchanged.
        let feed = vec![
            incoming("a.jpg", 10, Some("aa")),
            incoming("c.jpg", 30, Some("cc")),
        ];
        let outcome = AttachmentReconciler::new().reconcile(&existing, &feed);
        assert!(!outcome.reset_all);
        assert_eq!(outcome.keep, vec![1, 3]);
        assert_eq!(outcome.delete, vec![2]);
        assert!(outcome.import_list.is_empty());
    }

    #[test]
    fn new_incoming_goes_to_import_list() {
        let existing = vec![record(1, "a.jpg", 10, "aa")];
        let feed = vec![
            incoming("a.jpg", 10, Some("aa")),
            incoming("d.jpg", 40, Some("dd")),
        ];
        let outcome = AttachmentReconciler::new().reconcile(&existing, &feed);
        assert_eq!(outcome.keep, vec![1]);
        assert_eq!(outcome.import_list.len(), 1);
        let (position, declaration) = &outcome.import_list[0];
        assert_eq!(*position, 1);
        assert_eq!(declaration.reference, "d.jpg");
    }

    #[test]
    fn duplicate_references_keep_their_positions() {
        let existing = vec![record(1, "x.jpg", 10, "aa")];
        let feed = vec![
            incoming("x.jpg", 10, Some("aa")),
            incoming("x.jpg", 12, Some("bb")),
        ];
        let outcome = AttachmentReconciler::new().reconcile(&existing, &feed);
        let positions: Vec<usize> = outcome.import_list.iter().map(|(i, _)| *i).collect();
        // The two declarations share a reference but stay distinguishable
        // by their declared positions.
        assert_eq!(positions.len(), positions.iter().collect::<HashSet<_>>().len());
        assert!(positions.iter().all(|p| *p < feed.len()));
    }

    #[test]
    fn path_and_size_match_without_checksum() {
        let mut existing = record(1, "a.jpg", 10, "aa");
        existing.checksum = None;
        existing.checksum_kind = None;
        let feed = vec![incoming("a.jpg", 10, None)];
        let outcome = AttachmentReconciler::new().reconcile(&[existing], &feed);
        assert_eq!(outcome.keep, vec![1]);
        assert!(outcome.import_list.is_empty());
    }

    #[test]
    fn renamed_counter_suffix_matches_by_filename_and_size() {
        let mut existing = record(1, "/media/photo-2.jpg", 10, "aa");
        existing.checksum = None;
        let feed = vec![incoming("/incoming/photo.jpg", 10, None)];
        let outcome = AttachmentReconciler::new().reconcile(&[existing], &feed);
        assert_eq!(outcome.keep, vec![1]);
    }

    #[test]
    fn valid_after_keeps_fresh_copy() {
        let existing = vec![record(1, "a.jpg", 10, "aa")];
        let mut fresh = incoming("a.jpg", 99, None);
        fresh.check = Some(AttachmentCheck::ValidAfter(
            Utc.with_ymd_and_hms(2023, 12, 1, 0, 0, 0).unwrap(),
        ));
        let outcome = AttachmentReconciler::new().reconcile(&existing, &[fresh.clone()]);
        assert_eq!(outcome.keep, vec![1]);

        // Existing copy older than the declared instant must be re-imported.
        fresh.check = Some(AttachmentCheck::ValidAfter(
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        ));
        let outcome = AttachmentReconciler::new().reconcile(&existing, &[fresh]);
        assert_eq!(outcome.delete, vec![1]);
        assert_eq!(outcome.import_list.len(), 1);
    }

    #[test]
    fn featured_selection_rules() {
        // Feed designation always wins.
        assert_eq!(select_featured(Some(1), Some(7), Some(3), false), Some(7));
        // No current primary: first imported becomes primary.
        assert_eq!(select_featured(None, None, Some(3), false), Some(3));
        // Unchanged order never overrides an existing primary.
        assert_eq!(select_featured(Some(1), None, Some(3), false), Some(1));
        // Changed order re-selects from the fresh imports.
        assert_eq!(select_featured(Some(1), None, Some(3), true), Some(3));
        assert_eq!(select_featured(None, None, None, false), None);
    }
}
