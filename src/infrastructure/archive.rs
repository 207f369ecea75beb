// src/infrastructure/archive.rs
//! Feed archive handling: a feed arrives as a plain XML file or as a zip
//! archive that may contain several XML documents and, one level deep,
//! nested zip archives.

use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::domain::error::{DomainError, DomainResult};

/// Result of locating/unpacking a feed.
#[derive(Debug, Clone, PartialEq)]
pub struct UnpackedFeed {
    pub zip_file: Option<PathBuf>,
    pub unzip_dir: PathBuf,
    /// Top-level XML documents, sorted by file name.
    pub xml_files: Vec<PathBuf>,
}

/// Unpacks (or merely locates) the feed behind `feed_path`.
///
/// Plain `.xml` paths are used in place; zip archives are extracted into
/// `work_dir`, with nested archives extracted exactly one level.
pub fn prepare_feed(feed_path: &Path, work_dir: &Path) -> DomainResult<UnpackedFeed> {
    if !feed_path.exists() {
        return Err(DomainError::Other(format!(
            "feed not found: {}",
            feed_path.display()
        )));
    }

    let extension = feed_path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    if extension == "xml" {
        let unzip_dir = feed_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        return Ok(UnpackedFeed {
            zip_file: None,
            unzip_dir,
            xml_files: vec![feed_path.to_path_buf()],
        });
    }

    let stem = feed_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "feed".to_string());
    let unzip_dir = work_dir.join(stem);
    std::fs::create_dir_all(&unzip_dir)?;

    info!(
        "Unpacking {} into {}",
        feed_path.display(),
        unzip_dir.display()
    );

    let file = File::open(feed_path)?;
    let mut archive = ZipArchive::new(file)
        .map_err(|e| DomainError::Other(format!("malformed archive {}: {}", feed_path.display(), e)))?;
    extract_archive(&mut archive, &unzip_dir, true)?;

    let xml_files = list_xml_files(&unzip_dir)?;
    if xml_files.is_empty() {
        return Err(DomainError::Other(format!(
            "archive {} contains no XML documents",
            feed_path.display()
        )));
    }

    Ok(UnpackedFeed {
        zip_file: Some(feed_path.to_path_buf()),
        unzip_dir,
        xml_files,
    })
}

/// XML documents directly inside `dir`, sorted by file name for a stable
/// processing order.
pub fn list_xml_files(dir: &Path) -> DomainResult<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .map(|e| e.eq_ignore_ascii_case("xml"))
                    .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Removes the unpack directory after a completed job. Plain-XML feeds have
/// no owned unpack dir, so the caller passes `owned = false` for those.
pub fn cleanup_unpack_dir(unzip_dir: &Path, owned: bool) {
    if owned && unzip_dir.exists() {
        if let Err(e) = std::fs::remove_dir_all(unzip_dir) {
            warn!("Could not remove unpack dir {}: {}", unzip_dir.display(), e);
        }
    }
}

fn extract_archive<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    target: &Path,
    descend: bool,
) -> DomainResult<()> {
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| DomainError::Other(format!("corrupt archive entry: {}", e)))?;
        if entry.is_dir() {
            continue;
        }

        let name = match entry.enclosed_name() {
            Some(n) => n,
            None => {
                warn!("Skipping archive entry with unsafe path: {}", entry.name());
                continue;
            }
        };
        // Archive layout is flattened: only the file name matters.
        let file_name = match name.file_name() {
            Some(f) => PathBuf::from(f),
            None => continue,
        };
        let lower = file_name.to_string_lossy().to_ascii_lowercase();

        if lower.ends_with(".zip") {
            if !descend {
                warn!("Ignoring nested archive below the first level: {}", lower);
                continue;
            }
            debug!("Extracting nested archive {}", lower);
            let mut buf = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut buf)?;
            let mut nested = ZipArchive::new(Cursor::new(buf))
                .map_err(|e| DomainError::Other(format!("malformed nested archive {}: {}", lower, e)))?;
            extract_archive(&mut nested, target, false)?;
        } else {
            let out_path = target.join(&file_name);
            let mut out = File::create(&out_path)?;
            std::io::copy(&mut entry, &mut out)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut writer = ZipWriter::new(file);
        for (name, content) in entries {
            writer
                .start_file(name.to_string(), SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap();
    }

    fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer = ZipWriter::new(&mut buf);
            for (name, content) in entries {
                writer
                    .start_file(name.to_string(), SimpleFileOptions::default())
                    .unwrap();
                writer.write_all(content).unwrap();
            }
            writer.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn plain_xml_is_used_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let xml = dir.path().join("feed.xml");
        std::fs::write(&xml, "<feed/>").unwrap();

        let unpacked = prepare_feed(&xml, dir.path()).unwrap();
        assert_eq!(unpacked.zip_file, None);
        assert_eq!(unpacked.xml_files, vec![xml]);
    }

    #[test]
    fn extracts_multiple_xml_documents_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("feed.zip");
        write_zip(
            &archive_path,
            &[
                ("b_second.xml", b"<feed/>".as_ref()),
                ("a_first.xml", b"<feed/>".as_ref()),
                ("notes.txt", b"ignored".as_ref()),
            ],
        );

        let work = dir.path().join("work");
        std::fs::create_dir_all(&work).unwrap();
        let unpacked = prepare_feed(&archive_path, &work).unwrap();
        let names: Vec<String> = unpacked
            .xml_files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a_first.xml", "b_second.xml"]);
        assert_eq!(unpacked.zip_file, Some(archive_path));
    }

    #[test]
    fn extracts_nested_archives_one_level() {
        let dir = tempfile::tempdir().unwrap();
        let inner = zip_bytes(&[("inner.xml", b"<feed/>".as_ref())]);
        let archive_path = dir.path().join("bundle.zip");
        write_zip(
            &archive_path,
            &[
                ("outer.xml", b"<feed/>".as_ref()),
                ("inner.zip", inner.as_slice()),
            ],
        );

        let work = dir.path().join("work");
        std::fs::create_dir_all(&work).unwrap();
        let unpacked = prepare_feed(&archive_path, &work).unwrap();
        let names: Vec<String> = unpacked
            .xml_files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["inner.xml", "outer.xml"]);
    }

    #[test]
    fn missing_feed_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        assert!(prepare_feed(&dir.path().join("gone.zip"), dir.path()).is_err());
    }
}
