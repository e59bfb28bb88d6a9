//! Fan-out over a resource's `items` list.
//!
//! The item store is re-initialised with the declared values, then each
//! value in order: move the current pointer, reload the resource (so
//! templated fields observe `item.current` and fresh upstream outputs),
//! and run the run-block processor. The store is cleared afterwards on
//! both the success and the failure path; clear failures are fatal to
//! the request.

use crate::errors::ResolverError;
use crate::resource::{ResourceNodeEntry, ResourceRecord};

use super::Resolver;

impl Resolver {
    /// Runs an iterated resource: one run-block invocation per item
    /// value, in declared order.
    pub(crate) async fn run_with_items(
        &mut self,
        entry: &ResourceNodeEntry,
        record: &ResourceRecord,
    ) -> Result<(), ResolverError> {
        let items = record.items.clone().unwrap_or_default();
        tracing::debug!(
            action_id = record.action_id.as_str(),
            items = items.len(),
            "starting iteration"
        );
        self.readers.item.init(&items).await?;

        let result = self.iterate(entry, &items).await;

        // The table must be empty after every outer completion.
        self.readers.item.clear().await?;
        result
    }

    async fn iterate(
        &mut self,
        entry: &ResourceNodeEntry,
        items: &[String],
    ) -> Result<(), ResolverError> {
        for value in items {
            self.readers.item.set_current(value).await?;

            let fresh = self.load_record(&entry.file).await?;
            self.process_run_block(entry, &fresh, true).await?;
        }
        Ok(())
    }
}
