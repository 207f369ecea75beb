// src/domain/feed.rs
//! Reading listing-level structure out of a feed document node: identity,
//! action marker, language, declared last-update, and attachment
//! declarations. Field-level content is the mapping table's business.

use chrono::{DateTime, Utc};

use crate::domain::attachment::{AttachmentCheck, ChecksumKind, IncomingAttachment};
use crate::domain::document::DocumentNode;
use crate::domain::error::{DomainError, DomainResult};
use crate::domain::listing::ListingAction;
use crate::domain::services::transforms::parse_feed_date;

/// One listing as declared by the feed, with the node it came from.
#[derive(Debug)]
pub struct FeedListing<'a, N> {
    pub node: &'a N,
    pub external_id: String,
    pub action: ListingAction,
    pub language: Option<String>,
    pub feed_updated_at: Option<DateTime<Utc>>,
    pub attachments: Vec<IncomingAttachment>,
}

impl<'a, N: DocumentNode> FeedListing<'a, N> {
    /// Reads the listing-level structure. A listing without an external
    /// identifier cannot be reconciled and is rejected.
    pub fn parse(node: &'a N) -> DomainResult<Self> {
        let external_id = node
            .children_named("id")
            .first()
            .map(|n| n.text().trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                DomainError::ListingOperationFailed(
                    "listing node without external identifier".to_string(),
                )
            })?;

        let action = node
            .attribute("action")
            .map(ListingAction::parse)
            .unwrap_or(ListingAction::Change);

        let language = node
            .children_named("lang")
            .first()
            .map(|n| n.text().trim().to_lowercase())
            .filter(|s| !s.is_empty());

        let feed_updated_at = node
            .children_named("lastmod")
            .first()
            .and_then(|n| parse_timestamp(n.text().trim()));

        let attachments = node
            .children_named("attachments")
            .first()
            .map(|container| {
                container
                    .children_named("attachment")
                    .into_iter()
                    .filter_map(parse_attachment)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            node,
            external_id,
            action,
            language,
            feed_updated_at,
            attachments,
        })
    }
}

fn parse_attachment<N: DocumentNode>(node: &N) -> Option<IncomingAttachment> {
    let reference = node
        .children_named("path")
        .first()
        .map(|n| n.text().trim().to_string())
        .filter(|s| !s.is_empty())?;

    let declared_size = node
        .children_named("size")
        .first()
        .and_then(|n| n.text().trim().parse::<u64>().ok());

    let check = node.children_named("check").first().and_then(|check_node| {
        let value = check_node.text().trim();
        match check_node.attribute("type").map(str::to_ascii_lowercase) {
            Some(kind) if kind == "md5" => Some(AttachmentCheck::Checksum {
                kind: ChecksumKind::Md5,
                value: value.to_lowercase(),
            }),
            Some(kind) if kind == "sha256" => Some(AttachmentCheck::Checksum {
                kind: ChecksumKind::Sha256,
                value: value.to_lowercase(),
            }),
            Some(kind) if kind == "valid-after" => {
                parse_timestamp(value).map(AttachmentCheck::ValidAfter)
            }
            _ => None,
        }
    });

    let is_remote = node
        .attribute("location")
        .map(|l| l.eq_ignore_ascii_case("remote"))
        .unwrap_or_else(|| reference.starts_with("http://") || reference.starts_with("https://"));

    let featured = node
        .attribute("featured")
        .map(|f| f == "1" || f.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    Some(IncomingAttachment {
        reference,
        declared_size,
        check,
        group_tag: node.attribute("group").unwrap_or("IMAGE").to_string(),
        is_remote,
        featured,
    })
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    parse_feed_date(raw)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
}
