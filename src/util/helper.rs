// src/util/helper.rs
use chrono::{DateTime, Utc};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

/// Calculate MD5 hash of content as lowercase hex
pub fn md5_hex(content: &[u8]) -> String {
    format!("{:x}", md5::compute(content))
}

/// Calculate SHA-256 hash of content as lowercase hex
pub fn sha256_hex(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Mutual-exclusion token for a new job: hash of scope and start instant.
pub fn generate_token(scope_key: &str, now: DateTime<Utc>) -> String {
    md5_hex(format!("{}:{}", scope_key, now.timestamp_nanos_opt().unwrap_or_default()).as_bytes())
}

fn suffix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-(\d+|\d+x\d+)$").expect("valid regex"))
}

/// Plain file name of a path or URL with counter/size suffixes stripped:
/// `photo-2.jpg` and `photo-1024x768.jpg` both normalize to `photo.jpg`.
pub fn normalize_filename(reference: &str) -> String {
    let name = reference
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(reference)
        .split('?')
        .next()
        .unwrap_or_default();

    let (stem, ext) = match name.rsplit_once('.') {
        Some((s, e)) => (s, Some(e)),
        None => (name, None),
    };
    let stripped = suffix_regex().replace(stem, "");
    match ext {
        Some(e) => format!("{}.{}", stripped, e).to_ascii_lowercase(),
        None => stripped.to_ascii_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_digests() {
        assert_eq!(md5_hex(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn filename_normalization_strips_suffixes() {
        assert_eq!(normalize_filename("/srv/feeds/photo-2.jpg"), "photo.jpg");
        assert_eq!(
            normalize_filename("https://cdn.example.com/img/photo-1024x768.JPG?v=3"),
            "photo.jpg"
        );
        assert_eq!(normalize_filename("floorplan.pdf"), "floorplan.pdf");
        assert_eq!(normalize_filename("C:\\feeds\\plan-12.png"), "plan.png");
    }

    #[test]
    fn tokens_differ_per_instant() {
        let t1 = Utc::now();
        let t2 = t1 + chrono::Duration::nanoseconds(1);
        assert_ne!(generate_token("a", t1), generate_token("a", t2));
    }
}
