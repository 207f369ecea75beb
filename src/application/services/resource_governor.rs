// src/application/services/resource_governor.rs
use std::time::Instant;

use tracing::debug;

use crate::config::ResourceBudgets;

/// Why the current invocation must hand control back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YieldReason {
    ListingBudget,
    DeletionBudget,
    AttachmentBudget,
    TimeBudget,
}

/// Tracks per-invocation work counters and elapsed wall-clock time against
/// the configured budgets. Consulted after every listing and attachment.
#[derive(Debug)]
pub struct ResourceGovernor {
    budgets: ResourceBudgets,
    started: Instant,
    listings: u64,
    deletions: u64,
    attachments: u64,
}

impl ResourceGovernor {
    pub fn new(budgets: ResourceBudgets) -> Self {
        Self {
            budgets,
            started: Instant::now(),
            listings: 0,
            deletions: 0,
            attachments: 0,
        }
    }

    pub fn note_listing(&mut self) {
        self.listings += 1;
    }

    pub fn note_deletion(&mut self) {
        self.deletions += 1;
    }

    pub fn note_attachment(&mut self) {
        self.attachments += 1;
    }

    /// Decides "continue" vs "yield now". The time guard reserves the
    /// worst-case estimate for one more listing below the hard ceiling.
    pub fn should_yield(&self) -> Option<YieldReason> {
        if self.listings >= self.budgets.max_listings_per_run {
            return Some(YieldReason::ListingBudget);
        }
        if self.deletions >= self.budgets.max_deletions_per_run {
            return Some(YieldReason::DeletionBudget);
        }
        if self.attachments >= self.budgets.max_attachments_per_run {
            return Some(YieldReason::AttachmentBudget);
        }
        let ceiling = self
            .budgets
            .max_execution_secs
            .saturating_sub(self.budgets.listing_reserve_secs);
        if self.started.elapsed().as_secs() >= ceiling {
            debug!("Time budget exhausted after {:?}", self.started.elapsed());
            return Some(YieldReason::TimeBudget);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budgets(listings: u64, deletions: u64, attachments: u64) -> ResourceBudgets {
        ResourceBudgets {
            max_listings_per_run: listings,
            max_deletions_per_run: deletions,
            max_attachments_per_run: attachments,
            max_execution_secs: 3600,
            listing_reserve_secs: 5,
        }
    }

    #[test]
    fn yields_when_listing_budget_reached() {
        let mut governor = ResourceGovernor::new(budgets(2, 10, 10));
        assert_eq!(governor.should_yield(), None);
        governor.note_listing();
        assert_eq!(governor.should_yield(), None);
        governor.note_listing();
        assert_eq!(governor.should_yield(), Some(YieldReason::ListingBudget));
    }

    #[test]
    fn yields_on_deletion_and_attachment_budgets() {
        let mut governor = ResourceGovernor::new(budgets(10, 1, 10));
        governor.note_deletion();
        assert_eq!(governor.should_yield(), Some(YieldReason::DeletionBudget));

        let mut governor = ResourceGovernor::new(budgets(10, 10, 1));
        governor.note_attachment();
        assert_eq!(governor.should_yield(), Some(YieldReason::AttachmentBudget));
    }

    #[test]
    fn time_guard_reserves_listing_estimate() {
        let mut b = budgets(10, 10, 10);
        // Ceiling minus reserve is zero: the governor yields immediately.
        b.max_execution_secs = 5;
        b.listing_reserve_secs = 5;
        let governor = ResourceGovernor::new(b);
        assert_eq!(governor.should_yield(), Some(YieldReason::TimeBudget));
    }
}
