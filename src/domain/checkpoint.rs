// src/domain/checkpoint.rs
use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether the feed represents the complete state of a source or a delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportScope {
    Full,
    Partial,
}

/// Full-scope reconciliation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
    /// Delete listings absent from the feed, skip unchanged ones.
    DeletePartUpdateChanged,
    /// Delete every existing listing of the source, then insert all.
    DeleteAllInsertAll,
}

impl Default for ImportMode {
    fn default() -> Self {
        ImportMode::DeletePartUpdateChanged
    }
}

/// Position of a job inside its state machine. `Yielded` is not a phase:
/// it is "checkpoint persisted, invocation ended."
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Unpacking,
    Deleting,
    IteratingListings,
    Finalizing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Structured job log entry, part of the always-produced summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Per-job outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounters {
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
    pub skipped: u64,
    pub errored: u64,
    pub attachments_imported: u64,
}

/// The durable, resumable state of one import job.
///
/// Exactly one checkpoint exists per source scope while a job runs; its
/// existence is the "a job is running" signal. Created on the first unit of
/// work, updated after every listing and attachment, deleted on completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportCheckpoint {
    /// Mutual-exclusion token; a resumption must present it (or force).
    pub token: String,
    pub scope_key: String,
    pub zip_file: Option<PathBuf>,
    pub unzip_dir: PathBuf,
    pub import_scope: ImportScope,
    pub phase: JobPhase,
    pub processed_xml_files: Vec<PathBuf>,
    pub current_xml_file: Option<PathBuf>,
    pub next_property_index: usize,
    pub total_property_count: usize,
    pub next_attachment_index: usize,
    pub total_attachment_count: usize,
    pub current_agency_index: usize,
    pub logged_agency_names: Vec<String>,
    /// Offset into the full-scope deletion scan, so deletion batches are
    /// resumable too.
    pub deletion_offset: usize,
    pub deletion_done: bool,
    /// "file:listing:index" -> fetch attempts, surviving resumption.
    pub attachment_attempts: HashMap<String, u32>,
    pub counters: JobCounters,
    pub log: Vec<LogEntry>,
    pub last_update: DateTime<Utc>,
}

impl ImportCheckpoint {
    pub fn new(
        token: String,
        scope_key: String,
        zip_file: Option<PathBuf>,
        unzip_dir: PathBuf,
        import_scope: ImportScope,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            token,
            scope_key,
            zip_file,
            unzip_dir,
            import_scope,
            phase: JobPhase::Unpacking,
            processed_xml_files: Vec::new(),
            current_xml_file: None,
            next_property_index: 0,
            total_property_count: 0,
            next_attachment_index: 0,
            total_attachment_count: 0,
            current_agency_index: 0,
            logged_agency_names: Vec::new(),
            deletion_offset: 0,
            deletion_done: false,
            attachment_attempts: HashMap::new(),
            counters: JobCounters::default(),
            log: Vec::new(),
            last_update: now,
        }
    }

    /// A checkpoint older than the stall threshold is abandoned: its token
    /// no longer excludes a fresh invocation.
    pub fn is_stalled(&self, now: DateTime<Utc>, stall_threshold_secs: i64) -> bool {
        (now - self.last_update).num_seconds() > stall_threshold_secs
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_update = now;
    }

    pub fn push_log(&mut self, level: LogLevel, now: DateTime<Utc>, message: impl Into<String>) {
        self.log.push(LogEntry {
            level,
            at: now,
            message: message.into(),
        });
    }

    /// Key into the per-attachment attempt budget map.
    pub fn attempt_key(file: &std::path::Path, property_index: usize, attachment_index: usize) -> String {
        format!(
            "{}:{}:{}",
            file.file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_default(),
            property_index,
            attachment_index
        )
    }

    pub fn record_attempt(&mut self, key: &str) -> u32 {
        let count = self.attachment_attempts.entry(key.to_string()).or_insert(0);
        *count += 1;
        *count
    }
}
