// src/infrastructure/repositories/filesystem_media_store.rs
//! Media storage on the local filesystem.
//!
//! Remote attachments are fetched over HTTP, local ones copied; either way
//! the content lands under the media directory under a name derived from
//! its checksum, whose leading bytes double as the stable media id.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, instrument};
use url::Url;

use crate::domain::attachment::MediaId;
use crate::domain::error::{DomainError, DomainResult};
use crate::domain::repositories::media_store::MediaStore;
use crate::util::helper::md5_hex;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct FilesystemMediaStore {
    media_dir: PathBuf,
    client: reqwest::blocking::Client,
}

impl FilesystemMediaStore {
    pub fn new(media_dir: impl Into<PathBuf>) -> DomainResult<Self> {
        let media_dir = media_dir.into();
        fs::create_dir_all(&media_dir).map_err(|e| {
            DomainError::MediaOperationFailed(format!(
                "cannot create media dir {}: {}",
                media_dir.display(),
                e
            ))
        })?;
        let client = reqwest::blocking::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| DomainError::MediaOperationFailed(e.to_string()))?;
        Ok(Self { media_dir, client })
    }

    fn fetch(&self, reference: &str) -> DomainResult<Vec<u8>> {
        match Url::parse(reference) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                debug!("Fetching {}", reference);
                let response = self.client.get(url).send().map_err(|e| {
                    DomainError::MediaOperationFailed(format!("fetch {} failed: {}", reference, e))
                })?;
                if !response.status().is_success() {
                    return Err(DomainError::MediaOperationFailed(format!(
                        "fetch {} failed with status {}",
                        reference,
                        response.status()
                    )));
                }
                Ok(response
                    .bytes()
                    .map_err(|e| {
                        DomainError::MediaOperationFailed(format!(
                            "read body of {} failed: {}",
                            reference, e
                        ))
                    })?
                    .to_vec())
            }
            _ => fs::read(reference).map_err(|e| {
                DomainError::MediaOperationFailed(format!("read {} failed: {}", reference, e))
            }),
        }
    }

    /// Stable id of a content hash: its leading eight bytes with the sign
    /// bit cleared, so ids are always non-negative.
    fn id_from_digest(digest: &str) -> MediaId {
        let prefix = &digest[..16.min(digest.len())];
        let bits = u64::from_str_radix(prefix, 16).unwrap_or_default() & (i64::MAX as u64);
        bits as MediaId
    }

    /// Filename of stored content: the id's hex form, the remainder of the
    /// digest, and the original extension. Starting with the id keeps
    /// [`Self::stored_file`]'s prefix lookup exact.
    fn file_name_for(id: MediaId, digest: &str, reference: &str) -> String {
        format!(
            "{:016x}{}{}",
            id as u64,
            digest.get(16..).unwrap_or_default(),
            Self::extension_of(reference)
        )
    }

    fn extension_of(reference: &str) -> String {
        Path::new(reference.split('?').next().unwrap_or(reference))
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_ascii_lowercase()))
            .unwrap_or_default()
    }

    fn stored_file(&self, id: MediaId) -> Option<PathBuf> {
        let prefix = format!("{:016x}", id as u64);
        fs::read_dir(&self.media_dir)
            .ok()?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .find(|p| {
                p.file_name()
                    .map(|n| n.to_string_lossy().starts_with(&prefix))
                    .unwrap_or(false)
            })
    }
}

impl MediaStore for FilesystemMediaStore {
    #[instrument(level = "debug", skip(self))]
    fn import_from_path_or_url(&self, reference: &str) -> DomainResult<MediaId> {
        let content = self.fetch(reference)?;
        let digest = md5_hex(&content);
        let id = Self::id_from_digest(&digest);
        let target = self
            .media_dir
            .join(Self::file_name_for(id, &digest, reference));
        if !target.exists() {
            fs::write(&target, &content).map_err(|e| {
                DomainError::MediaOperationFailed(format!(
                    "write {} failed: {}",
                    target.display(),
                    e
                ))
            })?;
        }
        debug!("Imported {} as {}", reference, target.display());
        Ok(id)
    }

    fn remove(&self, id: MediaId) -> DomainResult<bool> {
        match self.stored_file(id) {
            Some(path) => {
                fs::remove_file(&path).map_err(|e| {
                    DomainError::MediaOperationFailed(format!(
                        "remove {} failed: {}",
                        path.display(),
                        e
                    ))
                })?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn imports_local_file_by_checksum() {
        let media = tempfile::tempdir().unwrap();
        let source = tempfile::tempdir().unwrap();
        let photo = source.path().join("photo.JPG");
        fs::write(&photo, b"image-bytes").unwrap();

        let store = FilesystemMediaStore::new(media.path()).unwrap();
        let id = store
            .import_from_path_or_url(&photo.to_string_lossy())
            .unwrap();

        let stored: Vec<PathBuf> = fs::read_dir(media.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].to_string_lossy().ends_with(".jpg"));

        // Same content imports to the same id without duplicating.
        let again = store
            .import_from_path_or_url(&photo.to_string_lossy())
            .unwrap();
        assert_eq!(id, again);
        assert_eq!(fs::read_dir(media.path()).unwrap().count(), 1);
    }

    #[test]
    fn removes_by_id() {
        let media = tempfile::tempdir().unwrap();
        let source = tempfile::tempdir().unwrap();
        let photo = source.path().join("a.png");
        fs::write(&photo, b"png").unwrap();

        let store = FilesystemMediaStore::new(media.path()).unwrap();
        let id = store
            .import_from_path_or_url(&photo.to_string_lossy())
            .unwrap();
        assert!(store.remove(id).unwrap());
        assert!(!store.remove(id).unwrap());
        assert_eq!(fs::read_dir(media.path()).unwrap().count(), 0);
    }

    #[test]
    fn ids_are_never_negative() {
        assert!(FilesystemMediaStore::id_from_digest("ffffffffffffffffffffffffffffffff") >= 0);
        assert!(FilesystemMediaStore::id_from_digest("8000000000000000aaaaaaaaaaaaaaaa") >= 0);
        assert_eq!(
            FilesystemMediaStore::id_from_digest("0000000000000001ffffffffffffffff"),
            1
        );
    }

    #[test]
    fn stored_name_starts_with_the_id() {
        let media = tempfile::tempdir().unwrap();
        let source = tempfile::tempdir().unwrap();
        let photo = source.path().join("b.gif");
        fs::write(&photo, b"gif-bytes").unwrap();

        let store = FilesystemMediaStore::new(media.path()).unwrap();
        let id = store
            .import_from_path_or_url(&photo.to_string_lossy())
            .unwrap();

        let name = fs::read_dir(media.path())
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .file_name();
        assert!(name
            .to_string_lossy()
            .starts_with(&format!("{:016x}", id as u64)));
    }

    #[test]
    fn missing_local_file_is_recoverable() {
        let media = tempfile::tempdir().unwrap();
        let store = FilesystemMediaStore::new(media.path()).unwrap();
        assert!(matches!(
            store.import_from_path_or_url("/no/such/file.jpg"),
            Err(DomainError::MediaOperationFailed(_))
        ));
    }
}
