//! Eligibility selector building the batch for one pass.

use rowsync_core::{error::Result, models::CategoryGroup, Record};
use tracing::debug;

use crate::store::StoreTransaction;

/// Default row cap per category group.
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Selects the records due in the current pass.
///
/// Issues one query per [`CategoryGroup`] in [`CategoryGroup::ALL`] order,
/// each capped at `page_size` rows, and concatenates the results. A batch
/// therefore holds at most `page_size * CategoryGroup::ALL.len()` records.
#[derive(Debug, Clone, Copy)]
pub struct EligibilitySelector {
    page_size: usize,
}

impl EligibilitySelector {
    /// Creates a selector with the given per-group cap.
    pub fn new(page_size: usize) -> Self {
        Self { page_size }
    }

    /// Per-group row cap.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Largest batch a single pass can produce.
    pub fn max_batch(&self) -> usize {
        self.page_size * CategoryGroup::ALL.len()
    }

    /// Runs the group queries inside `tx`.
    ///
    /// # Errors
    ///
    /// Returns the first store error; nothing is returned for the groups
    /// already queried.
    pub async fn select(&self, tx: &mut dyn StoreTransaction) -> Result<Vec<Record>> {
        let limit = i64::try_from(self.page_size).unwrap_or(i64::MAX);
        let mut batch = Vec::with_capacity(self.max_batch());

        for group in CategoryGroup::ALL {
            let records = tx.select_eligible(group, limit).await?;
            debug!(group = %group, selected = records.len(), "group selected");
            batch.extend(records);
        }

        Ok(batch)
    }
}

impl Default for EligibilitySelector {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}
