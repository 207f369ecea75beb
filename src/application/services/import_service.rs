// src/application/services/import_service.rs
//! Checkpointed import orchestration.
//!
//! One call to [`ImportService::run`] is one invocation: it adopts or
//! creates the scope's checkpoint, works through the job's phases until a
//! budget is hit or a file is completed, persists the checkpoint and hands
//! control back. Completing an XML file always ends the invocation;
//! finalization runs in the next invocation once no files are pending.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::application::error::{ApplicationError, ApplicationResult};
use crate::application::services::attachment_reconciler::select_featured;
use crate::application::services::listing_reconciler::{ListingDecision, ListingReconciler};
use crate::application::services::resource_governor::ResourceGovernor;
use crate::config::Settings;
use crate::domain::checkpoint::{ImportCheckpoint, ImportMode, ImportScope, JobPhase, LogEntry, LogLevel};
use crate::domain::checkpoint::JobCounters;
use crate::domain::document::DocumentNode;
use crate::domain::feed::FeedListing;
use crate::domain::repositories::checkpoint_store::CheckpointStore;
use crate::domain::services::clock::Clock;
use crate::infrastructure::archive::{self, UnpackedFeed};
use crate::infrastructure::mapping_table::MappingTable;
use crate::infrastructure::xml::{self, XmlElement};
use crate::util::helper::generate_token;

/// How one invocation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    /// The job is done and its checkpoint is gone.
    Completed,
    /// A budget or file boundary was reached; resume with the token.
    Yielded,
    /// The kill switch stopped the job at a checkpoint.
    Aborted(DateTime<Utc>),
}

/// Invocation summary handed back to the caller.
#[derive(Debug, Clone)]
pub struct JobStatus {
    pub state: JobState,
    pub token: String,
    pub scope_key: String,
    pub counters: JobCounters,
    pub processed_files: usize,
    pub pending_files: usize,
    pub log: Vec<LogEntry>,
}

enum FileOutcome {
    Completed,
    Yielded,
    Aborted(DateTime<Utc>),
}

/// Drives import jobs through their phase machine, one bounded invocation
/// at a time.
#[derive(Debug)]
pub struct ImportService {
    checkpoint_store: Arc<dyn CheckpointStore>,
    clock: Arc<dyn Clock>,
    reconciler: ListingReconciler,
    mapping_table: MappingTable,
    settings: Settings,
}

impl ImportService {
    pub fn new(
        checkpoint_store: Arc<dyn CheckpointStore>,
        clock: Arc<dyn Clock>,
        reconciler: ListingReconciler,
        mapping_table: MappingTable,
        settings: Settings,
    ) -> Self {
        Self {
            checkpoint_store,
            clock,
            reconciler,
            mapping_table,
            settings,
        }
    }

    /// Source scope a feed path belongs to: the containing folder's name.
    pub fn scope_key_for(feed_path: &Path) -> String {
        feed_path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .or_else(|| {
                feed_path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "default".to_string())
    }

    pub fn start_import(&self, feed_path: &Path, force: bool) -> ApplicationResult<JobStatus> {
        self.run(feed_path, None, force)
    }

    pub fn resume_import(&self, feed_path: &Path, token: &str) -> ApplicationResult<JobStatus> {
        self.run(feed_path, Some(token), false)
    }

    /// One invocation of the job for `feed_path`'s scope.
    #[instrument(level = "debug", skip(self), fields(feed = %feed_path.display()))]
    pub fn run(
        &self,
        feed_path: &Path,
        resume_token: Option<&str>,
        force: bool,
    ) -> ApplicationResult<JobStatus> {
        let now = self.clock.now();
        if let Some(until) = self.kill_switch_active(now)? {
            return Err(ApplicationError::KillSwitchActive(until));
        }

        let scope_key = Self::scope_key_for(feed_path);
        let mut cp = match self.checkpoint_store.load(&scope_key)? {
            Some(existing) => self.adopt_checkpoint(existing, resume_token, force, now)?,
            None => {
                if let Some(token) = resume_token {
                    return Err(ApplicationError::UnknownToken(token.to_string()));
                }
                self.create_checkpoint(feed_path, &scope_key, now)?
            }
        };

        let files = match self.locate_files(feed_path, &cp) {
            Ok(files) => files,
            Err(e @ ApplicationError::CheckpointInconsistent(_)) => {
                // The input the checkpoint refers to is gone; the job can
                // never finish, so the checkpoint is discarded.
                warn!("Discarding checkpoint for '{}': {}", scope_key, e);
                self.checkpoint_store.delete(&scope_key)?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let mut governor = ResourceGovernor::new(self.settings.budgets.clone());

        if cp.phase == JobPhase::Unpacking {
            cp.phase = JobPhase::Deleting;
            cp.touch(now);
            self.checkpoint_store.save(&cp)?;
        }

        if cp.phase == JobPhase::Deleting {
            if cp.import_scope == ImportScope::Full && !cp.deletion_done {
                let protected = match self.settings.import_mode {
                    ImportMode::DeletePartUpdateChanged => self
                        .declared_ids(&files)
                        .map_err(|e| self.abort_job(&cp, e))?,
                    ImportMode::DeleteAllInsertAll => HashSet::new(),
                };
                let progress = self.reconciler.delete_absent(
                    &cp.scope_key,
                    &protected,
                    cp.deletion_offset,
                    self.settings.deletion_page_size,
                    &mut governor,
                )?;
                cp.deletion_offset = progress.offset;
                cp.deletion_done = progress.done;
                cp.counters.deleted += progress.deleted;
                cp.touch(self.clock.now());
                self.checkpoint_store.save(&cp)?;
                if !progress.done {
                    return Ok(self.job_status(JobState::Yielded, &cp, &files));
                }
            }
            cp.deletion_done = true;
            cp.phase = JobPhase::IteratingListings;
            self.checkpoint_store.save(&cp)?;
        }

        if cp.phase == JobPhase::IteratingListings {
            let pending: Vec<PathBuf> = files
                .xml_files
                .iter()
                .filter(|f| !cp.processed_xml_files.contains(f))
                .cloned()
                .collect();
            match pending.first() {
                None => {
                    cp.phase = JobPhase::Finalizing;
                    self.checkpoint_store.save(&cp)?;
                }
                Some(first) => {
                    let file = cp
                        .current_xml_file
                        .clone()
                        .filter(|f| pending.contains(f))
                        .unwrap_or_else(|| first.clone());
                    let outcome = self
                        .process_file(&mut cp, &file, &mut governor)
                        .map_err(|e| self.abort_job(&cp, e))?;
                    let state = match outcome {
                        FileOutcome::Completed => {
                            cp.processed_xml_files.push(file);
                            cp.current_xml_file = None;
                            cp.next_property_index = 0;
                            cp.total_property_count = 0;
                            cp.next_attachment_index = 0;
                            JobState::Yielded
                        }
                        FileOutcome::Yielded => JobState::Yielded,
                        FileOutcome::Aborted(until) => JobState::Aborted(until),
                    };
                    cp.touch(self.clock.now());
                    self.checkpoint_store.save(&cp)?;
                    return Ok(self.job_status(state, &cp, &files));
                }
            }
        }

        self.finalize(cp, &files)
    }

    /// Current checkpoint of a feed's scope, if a job is in flight.
    pub fn status(&self, feed_path: &Path) -> ApplicationResult<Option<ImportCheckpoint>> {
        Ok(self.checkpoint_store.load(&Self::scope_key_for(feed_path))?)
    }

    /// Discards a scope's checkpoint and its unpack directory.
    pub fn reset(&self, feed_path: &Path) -> ApplicationResult<bool> {
        let scope_key = Self::scope_key_for(feed_path);
        match self.checkpoint_store.load(&scope_key)? {
            Some(cp) => {
                archive::cleanup_unpack_dir(&cp.unzip_dir, cp.zip_file.is_some());
                self.checkpoint_store.delete(&scope_key)?;
                info!("Reset import state for '{}'", scope_key);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn engage_kill_switch(&self, duration_secs: i64) -> ApplicationResult<DateTime<Utc>> {
        let until = self.clock.now() + chrono::Duration::seconds(duration_secs);
        self.checkpoint_store.engage_kill_switch(until)?;
        warn!("Kill switch engaged until {}", until);
        Ok(until)
    }

    pub fn clear_kill_switch(&self) -> ApplicationResult<()> {
        self.checkpoint_store.clear_kill_switch()?;
        info!("Kill switch cleared");
        Ok(())
    }

    /// An engaged kill switch outlives its cause but not its expiry.
    fn kill_switch_active(&self, now: DateTime<Utc>) -> ApplicationResult<Option<DateTime<Utc>>> {
        match self.checkpoint_store.kill_switch_until()? {
            Some(until) if now < until => Ok(Some(until)),
            Some(_) => {
                self.checkpoint_store.clear_kill_switch()?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn adopt_checkpoint(
        &self,
        mut cp: ImportCheckpoint,
        resume_token: Option<&str>,
        force: bool,
        now: DateTime<Utc>,
    ) -> ApplicationResult<ImportCheckpoint> {
        match resume_token {
            Some(token) if token == cp.token => Ok(cp),
            Some(token) if !force => Err(ApplicationError::UnknownToken(token.to_string())),
            _ => {
                let stalled = cp.is_stalled(now, self.settings.stall_threshold_secs);
                if resume_token.is_none() && !stalled && !force {
                    return Err(ApplicationError::JobAlreadyRunning(
                        cp.scope_key.clone(),
                        cp.token.clone(),
                    ));
                }
                // Takeover: a fresh token fences out the previous holder.
                let reason = if stalled { "stalled" } else { "forced" };
                warn!("Taking over {} job for '{}'", reason, cp.scope_key);
                cp.token = generate_token(&cp.scope_key, now);
                cp.push_log(
                    LogLevel::Warn,
                    now,
                    format!("Job taken over ({})", reason),
                );
                Ok(cp)
            }
        }
    }

    fn create_checkpoint(
        &self,
        feed_path: &Path,
        scope_key: &str,
        now: DateTime<Utc>,
    ) -> ApplicationResult<ImportCheckpoint> {
        let unpacked = archive::prepare_feed(feed_path, &self.work_dir())?;
        let scope = self.detect_scope(&unpacked)?;
        let token = generate_token(scope_key, now);
        let mut cp = ImportCheckpoint::new(
            token,
            scope_key.to_string(),
            unpacked.zip_file,
            unpacked.unzip_dir,
            scope,
            now,
        );
        if scope == ImportScope::Partial {
            // A delta feed never reconciles away what it does not mention.
            cp.deletion_done = true;
        }
        cp.push_log(
            LogLevel::Info,
            now,
            format!(
                "Import started: {} document(s), {:?} scope",
                unpacked.xml_files.len(),
                scope
            ),
        );
        self.checkpoint_store.save(&cp)?;
        info!(
            "Started import job {} for '{}' ({} document(s))",
            cp.token,
            scope_key,
            unpacked.xml_files.len()
        );
        Ok(cp)
    }

    /// Scope declared by the first document's root element.
    fn detect_scope(&self, unpacked: &UnpackedFeed) -> ApplicationResult<ImportScope> {
        let first = unpacked
            .xml_files
            .first()
            .ok_or_else(|| ApplicationError::Validation("feed contains no documents".to_string()))?;
        let root = xml::parse_file(first)?;
        Ok(match root.attribute("scope") {
            Some(s) if s.eq_ignore_ascii_case("partial") => ImportScope::Partial,
            _ => ImportScope::Full,
        })
    }

    /// Re-validates the checkpoint's inputs and returns the file list.
    fn locate_files(
        &self,
        feed_path: &Path,
        cp: &ImportCheckpoint,
    ) -> ApplicationResult<UnpackedFeed> {
        if let Some(zip) = &cp.zip_file {
            if cp.unzip_dir.exists() {
                let xml_files = archive::list_xml_files(&cp.unzip_dir)?;
                if !xml_files.is_empty() {
                    return Ok(UnpackedFeed {
                        zip_file: cp.zip_file.clone(),
                        unzip_dir: cp.unzip_dir.clone(),
                        xml_files,
                    });
                }
            }
            if !zip.exists() {
                return Err(ApplicationError::CheckpointInconsistent(format!(
                    "archive {} no longer exists",
                    zip.display()
                )));
            }
            return Ok(archive::prepare_feed(zip, &self.work_dir())?);
        }

        if !feed_path.exists() {
            return Err(ApplicationError::CheckpointInconsistent(format!(
                "feed document {} no longer exists",
                feed_path.display()
            )));
        }
        Ok(archive::prepare_feed(feed_path, &self.work_dir())?)
    }

    fn work_dir(&self) -> PathBuf {
        PathBuf::from(&self.settings.state_dir).join("unpack")
    }

    /// Fatal failure: the job cannot continue, so its checkpoint and unpack
    /// directory are discarded before the error surfaces.
    fn abort_job(&self, cp: &ImportCheckpoint, e: ApplicationError) -> ApplicationError {
        warn!("Aborting import job for '{}': {}", cp.scope_key, e);
        if let Err(delete_err) = self.checkpoint_store.delete(&cp.scope_key) {
            warn!(
                "Could not discard checkpoint for '{}': {}",
                cp.scope_key, delete_err
            );
        }
        archive::cleanup_unpack_dir(&cp.unzip_dir, cp.zip_file.is_some());
        e
    }

    /// External identifiers declared anywhere in the feed; those survive the
    /// full-scope deletion scan. A document that cannot be parsed makes the
    /// scan unsafe, so the error propagates and aborts the job.
    fn declared_ids(&self, files: &UnpackedFeed) -> ApplicationResult<HashSet<String>> {
        let mut ids = HashSet::new();
        for file in &files.xml_files {
            let root = xml::parse_file(file)?;
            for (_, node) in self.listing_nodes(&root) {
                if let Ok(feed) = FeedListing::parse(node) {
                    ids.insert(feed.external_id);
                }
            }
        }
        Ok(ids)
    }

    /// Listing nodes of one document, each with its agency's name. Listings
    /// may sit under agency elements or directly under the root.
    fn listing_nodes<'a>(&self, root: &'a XmlElement) -> Vec<(Option<String>, &'a XmlElement)> {
        let mut nodes = Vec::new();
        for agency in root.children_named(&self.settings.feed.agency_element) {
            let name = agency
                .children_named("name")
                .first()
                .map(|n| n.text().trim().to_string())
                .filter(|n| !n.is_empty());
            for node in agency.children_named(&self.settings.feed.listing_element) {
                nodes.push((name.clone(), node));
            }
        }
        for node in root.children_named(&self.settings.feed.listing_element) {
            nodes.push((None, node));
        }
        nodes
    }

    fn process_file(
        &self,
        cp: &mut ImportCheckpoint,
        file: &Path,
        governor: &mut ResourceGovernor,
    ) -> ApplicationResult<FileOutcome> {
        cp.current_xml_file = Some(file.to_path_buf());

        // A document that cannot be parsed aborts the whole job; the caller
        // discards the checkpoint.
        let root = xml::parse_file(file)?;

        let nodes = self.listing_nodes(&root);
        cp.total_property_count = nodes.len();

        for (index, (agency, node)) in nodes.iter().enumerate().skip(cp.next_property_index) {
            let now = self.clock.now();
            if let Some(until) = self.kill_switch_active(now)? {
                cp.push_log(
                    LogLevel::Warn,
                    now,
                    "Cancellation requested, stopping at checkpoint",
                );
                return Ok(FileOutcome::Aborted(until));
            }

            if let Some(name) = agency {
                if !cp.logged_agency_names.contains(name) {
                    info!("Importing listings from '{}'", name);
                    cp.push_log(
                        LogLevel::Info,
                        now,
                        format!("Importing listings from '{}'", name),
                    );
                    cp.logged_agency_names.push(name.clone());
                }
                cp.current_agency_index = cp
                    .logged_agency_names
                    .iter()
                    .position(|n| n == name)
                    .unwrap_or(0);
            }

            match self.process_listing(cp, file, index, node, governor) {
                Ok(true) => {}
                Ok(false) => {
                    // Paused inside the listing's attachments; the listing
                    // index stays put so resumption revisits it.
                    return Ok(FileOutcome::Yielded);
                }
                Err(e) => {
                    // A failing listing is logged and skipped; the job
                    // continues.
                    warn!("Listing {} of {} failed: {}", index, file.display(), e);
                    cp.counters.errored += 1;
                    cp.push_log(
                        LogLevel::Error,
                        now,
                        format!("Listing {} failed: {}", index, e),
                    );
                }
            }

            governor.note_listing();
            cp.next_property_index = index + 1;
            cp.next_attachment_index = 0;
            cp.touch(self.clock.now());
            self.checkpoint_store.save(cp)?;
            if governor.should_yield().is_some() && cp.next_property_index < nodes.len() {
                return Ok(FileOutcome::Yielded);
            }
        }

        Ok(FileOutcome::Completed)
    }

    /// Handles one listing node. Returns `false` when the invocation must
    /// pause inside this listing's attachments.
    fn process_listing(
        &self,
        cp: &mut ImportCheckpoint,
        file: &Path,
        index: usize,
        node: &XmlElement,
        governor: &mut ResourceGovernor,
    ) -> ApplicationResult<bool> {
        let now = self.clock.now();
        let feed = FeedListing::parse(node)?;
        let decision = self.reconciler.reconcile(
            &feed,
            &cp.scope_key,
            cp.import_scope,
            self.settings.import_mode,
            &self.mapping_table,
            now,
        )?;

        let plan = match decision {
            ListingDecision::Deleted { existed } => {
                if existed {
                    cp.counters.deleted += 1;
                } else {
                    cp.counters.skipped += 1;
                }
                return Ok(true);
            }
            ListingDecision::Skipped(_) => {
                cp.counters.skipped += 1;
                return Ok(true);
            }
            ListingDecision::Proceed(plan) => *plan,
        };

        let mut listing = plan.listing;
        let outcome = plan.attachments;
        cp.total_attachment_count = feed.attachments.len();

        let mut first_imported = None;
        for (feed_index, incoming) in &outcome.import_list {
            let key = ImportCheckpoint::attempt_key(file, index, *feed_index);
            if cp
                .attachment_attempts
                .get(&key)
                .map(|c| *c >= self.settings.max_attachment_attempts)
                .unwrap_or(false)
            {
                continue;
            }

            // A failed fetch is retried up to the attempt budget. Every try
            // is counted and checkpointed, so an interrupted retry sequence
            // resumes with its count intact.
            loop {
                let attempts = cp.record_attempt(&key);
                let now = self.clock.now();
                let result = self.reconciler.import_attachment(incoming, now);
                governor.note_attachment();
                match result {
                    Ok(record) => {
                        if first_imported.is_none() {
                            first_imported = Some(record.id);
                        }
                        listing.attachments.push(record);
                        cp.counters.attachments_imported += 1;
                        self.reconciler.persist(&listing)?;
                        cp.next_attachment_index = *feed_index + 1;
                        cp.touch(now);
                        self.checkpoint_store.save(cp)?;
                        break;
                    }
                    Err(e) if attempts >= self.settings.max_attachment_attempts => {
                        warn!(
                            "Attachment '{}' permanently skipped after {} attempts: {}",
                            incoming.reference, attempts, e
                        );
                        cp.push_log(
                            LogLevel::Error,
                            now,
                            format!(
                                "Attachment '{}' permanently skipped after {} attempts: {}",
                                incoming.reference, attempts, e
                            ),
                        );
                        cp.counters.errored += 1;
                        cp.next_attachment_index = *feed_index + 1;
                        cp.touch(now);
                        self.checkpoint_store.save(cp)?;
                        break;
                    }
                    Err(e) => {
                        cp.push_log(
                            LogLevel::Warn,
                            now,
                            format!(
                                "Attachment '{}' failed (attempt {}): {}",
                                incoming.reference, attempts, e
                            ),
                        );
                        cp.touch(now);
                        self.checkpoint_store.save(cp)?;
                        if governor.should_yield().is_some() {
                            return Ok(false);
                        }
                    }
                }
            }
            if governor.should_yield().is_some() {
                return Ok(false);
            }
        }

        let designated = feed.attachments.iter().find(|a| a.featured).and_then(|a| {
            outcome
                .exclude_from_import
                .get(&a.reference)
                .copied()
                .or_else(|| {
                    listing
                        .attachments
                        .iter()
                        .find(|r| r.original_ref == a.reference)
                        .map(|r| r.id)
                })
        });
        listing.featured_attachment = select_featured(
            listing.featured_attachment,
            designated,
            first_imported,
            outcome.reset_all,
        );
        // Attachments are settled (imported, kept, or out of attempts); only
        // now does the listing count as up to date with the feed's declared
        // timestamp.
        listing.feed_updated_at = plan.feed_updated_at;
        self.reconciler.persist(&listing)?;

        if plan.inserted {
            cp.counters.inserted += 1;
        } else {
            cp.counters.updated += 1;
        }
        Ok(true)
    }

    fn finalize(
        &self,
        mut cp: ImportCheckpoint,
        files: &UnpackedFeed,
    ) -> ApplicationResult<JobStatus> {
        let now = self.clock.now();
        let c = cp.counters;
        let summary = format!(
            "Import finished: {} inserted, {} updated, {} deleted, {} skipped, {} errored, {} attachments",
            c.inserted, c.updated, c.deleted, c.skipped, c.errored, c.attachments_imported
        );
        info!("{}", summary);
        cp.push_log(LogLevel::Info, now, summary);
        self.checkpoint_store.delete(&cp.scope_key)?;
        archive::cleanup_unpack_dir(&cp.unzip_dir, cp.zip_file.is_some());
        Ok(self.job_status(JobState::Completed, &cp, files))
    }

    fn job_status(&self, state: JobState, cp: &ImportCheckpoint, files: &UnpackedFeed) -> JobStatus {
        let pending = files
            .xml_files
            .iter()
            .filter(|f| !cp.processed_xml_files.contains(f))
            .count();
        JobStatus {
            state,
            token: cp.token.clone(),
            scope_key: cp.scope_key.clone(),
            counters: cp.counters,
            processed_files: cp.processed_xml_files.len(),
            pending_files: pending,
            log: cp.log.clone(),
        }
    }
}
