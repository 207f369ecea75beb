// src/domain/attachment.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type AttachmentId = i64;
pub type MediaId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumKind {
    Md5,
    Sha256,
}

/// Validity declaration carried by an incoming attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttachmentCheck {
    /// Content checksum the existing copy must match to stay valid.
    Checksum { kind: ChecksumKind, value: String },
    /// Existing copies modified at or after this instant stay valid.
    ValidAfter(DateTime<Utc>),
}

/// A media attachment already persisted on an existing listing.
/// Ownership is exclusive to the listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentRecord {
    pub id: AttachmentId,
    pub media_id: MediaId,
    /// Path or URL the attachment was originally imported from.
    pub original_ref: String,
    pub original_size: Option<u64>,
    /// Hex checksum of the imported content, when known.
    pub checksum: Option<String>,
    pub checksum_kind: Option<ChecksumKind>,
    pub modified_at: DateTime<Utc>,
    pub group_tag: String,
}

/// An attachment declared by the current feed document, not yet imported.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingAttachment {
    pub reference: String,
    pub declared_size: Option<u64>,
    pub check: Option<AttachmentCheck>,
    pub group_tag: String,
    pub is_remote: bool,
    /// Feed designates this attachment as the listing's cover image.
    pub featured: bool,
}

impl IncomingAttachment {
    pub fn declared_checksum(&self) -> Option<(&ChecksumKind, &str)> {
        match &self.check {
            Some(AttachmentCheck::Checksum { kind, value }) => Some((kind, value.as_str())),
            _ => None,
        }
    }

    pub fn valid_after(&self) -> Option<DateTime<Utc>> {
        match &self.check {
            Some(AttachmentCheck::ValidAfter(ts)) => Some(*ts),
            _ => None,
        }
    }
}
