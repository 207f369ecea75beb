// src/cli/import_commands.rs
use std::path::Path;

use crossterm::style::Stylize;
use tracing::instrument;

use crate::cli::error::{CliError, CliResult};
use crate::application::services::import_service::{JobState, JobStatus};
use crate::domain::checkpoint::{ImportCheckpoint, LogLevel};
use crate::infrastructure::di::ServiceContainer;

#[instrument(skip(services))]
pub fn import(services: &ServiceContainer, feed: &Path, force: bool, follow: bool) -> CliResult<()> {
    let status = services.import_service.start_import(feed, force)?;
    drive(services, feed, status, follow)
}

#[instrument(skip(services))]
pub fn resume(services: &ServiceContainer, feed: &Path, token: &str, follow: bool) -> CliResult<()> {
    let status = services.import_service.resume_import(feed, token)?;
    drive(services, feed, status, follow)
}

/// Reports each invocation; with `follow` set, keeps resuming until the job
/// leaves the yielded state.
fn drive(
    services: &ServiceContainer,
    feed: &Path,
    mut status: JobStatus,
    follow: bool,
) -> CliResult<()> {
    loop {
        report(&status);
        match status.state {
            JobState::Completed => return Ok(()),
            JobState::Aborted(until) => {
                eprintln!(
                    "{}",
                    format!("Import stopped by kill switch (engaged until {})", until).red()
                );
                return Err(CliError::OperationAborted);
            }
            JobState::Yielded if follow => {
                status = services.import_service.resume_import(feed, &status.token)?;
            }
            JobState::Yielded => {
                eprintln!(
                    "Resume with: estatesync resume {} {}",
                    feed.display(),
                    status.token
                );
                return Ok(());
            }
        }
    }
}

fn report(status: &JobStatus) {
    let c = &status.counters;
    match &status.state {
        JobState::Completed => eprintln!("{}", "Import completed".green()),
        JobState::Yielded => eprintln!(
            "{} ({} file(s) processed, {} pending)",
            "Yielded".yellow(),
            status.processed_files,
            status.pending_files
        ),
        JobState::Aborted(_) => eprintln!("{}", "Aborted".red()),
    }
    eprintln!(
        "  {} inserted, {} updated, {} deleted, {} skipped, {} errored, {} attachments",
        c.inserted, c.updated, c.deleted, c.skipped, c.errored, c.attachments_imported
    );
    for entry in &status.log {
        match entry.level {
            LogLevel::Error => eprintln!("  {} {}", "error:".red(), entry.message),
            LogLevel::Warn => eprintln!("  {} {}", "warning:".yellow(), entry.message),
            LogLevel::Info => {}
        }
    }
}

pub fn status(services: &ServiceContainer, feed: &Path, is_json: bool) -> CliResult<()> {
    match services.import_service.status(feed)? {
        None => {
            eprintln!("No import job in flight for {}", feed.display());
            Ok(())
        }
        Some(checkpoint) => {
            if is_json {
                let json = serde_json::to_string_pretty(&checkpoint)
                    .map_err(|e| CliError::Other(e.to_string()))?;
                println!("{}", json);
            } else {
                print_checkpoint(&checkpoint);
            }
            Ok(())
        }
    }
}

fn print_checkpoint(cp: &ImportCheckpoint) {
    println!("token:      {}", cp.token);
    println!("scope:      {}", cp.scope_key);
    println!("phase:      {:?}", cp.phase);
    println!(
        "progress:   file {}, listing {}/{}",
        cp.current_xml_file
            .as_ref()
            .and_then(|f| f.file_name())
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| "-".to_string()),
        cp.next_property_index,
        cp.total_property_count
    );
    println!("updated:    {}", cp.last_update);
    let c = cp.counters;
    println!(
        "counters:   {} inserted, {} updated, {} deleted, {} skipped, {} errored",
        c.inserted, c.updated, c.deleted, c.skipped, c.errored
    );
    for entry in cp.log.iter().rev().take(5).rev() {
        println!("  [{:?}] {}", entry.level, entry.message);
    }
}

pub fn reset(services: &ServiceContainer, feed: &Path) -> CliResult<()> {
    if services.import_service.reset(feed)? {
        eprintln!("{}", "Import state discarded".green());
    } else {
        eprintln!("No import job in flight for {}", feed.display());
    }
    Ok(())
}

pub fn kill(services: &ServiceContainer, minutes: i64, clear: bool) -> CliResult<()> {
    if clear {
        services.import_service.clear_kill_switch()?;
        eprintln!("{}", "Kill switch cleared".green());
    } else {
        if minutes <= 0 {
            return Err(CliError::InvalidInput(
                "kill switch duration must be positive".to_string(),
            ));
        }
        let until = services.import_service.engage_kill_switch(minutes * 60)?;
        eprintln!(
            "{}",
            format!("Kill switch engaged until {}", until).yellow()
        );
    }
    Ok(())
}
