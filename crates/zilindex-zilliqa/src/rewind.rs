//! Startup rewinder.
//!
//! The cursor is the highest height in the transaction collection. On
//! startup everything above `cursor - margin` (or an explicit height) is
//! deleted from every collection, so a run interrupted mid-range or a
//! shallow chain reorg leaves no partial state behind.

use std::sync::Arc;
use tracing::info;

use zilindex_core::cursor::{rewind_target, Cursor};
use zilindex_core::document::Collection;
use zilindex_storage::{DocumentStore, StoreError};

/// Recover the last indexed height from stored transactions.
pub async fn recover_cursor(store: &dyn DocumentStore) -> Result<Option<u64>, StoreError> {
    store.max_height(Collection::Transactions).await
}

/// Delete every document above `height` in every collection. Returns the
/// number of documents removed.
pub async fn rewind(store: &dyn DocumentStore, height: u64) -> Result<u64, StoreError> {
    let mut total = 0;
    for collection in Collection::ALL {
        let deleted = store.delete_above_height(collection, height).await?;
        if deleted > 0 {
            info!(%collection, height, deleted, "rewound collection");
        }
        total += deleted;
    }
    Ok(total)
}

pub struct Rewinder {
    store: Arc<dyn DocumentStore>,
    margin: u64,
    start_height: u64,
}

impl Rewinder {
    pub fn new(store: Arc<dyn DocumentStore>, margin: u64, start_height: u64) -> Self {
        Self {
            store,
            margin,
            start_height,
        }
    }

    /// Recover the cursor, rewind to the computed (or `explicit`) target and
    /// return the cursor positioned at that target.
    ///
    /// A store that was never written to yields a fresh cursor and deletes
    /// nothing, unless an explicit height is given.
    pub async fn startup(&self, explicit: Option<u64>) -> Result<Cursor, StoreError> {
        let last = recover_cursor(self.store.as_ref()).await?;
        let Some(target) = rewind_target(last, self.margin, explicit) else {
            info!(start = self.start_height, "nothing indexed yet");
            return Ok(Cursor::new(None, self.start_height));
        };
        self.rewind_to(target, last).await
    }

    /// Rewind unconditionally to `target`.
    pub async fn rewind_to(&self, target: u64, last: Option<u64>) -> Result<Cursor, StoreError> {
        let deleted = rewind(self.store.as_ref(), target).await?;
        info!(last_indexed = ?last, target, deleted, "rewind complete");
        let mut cursor = Cursor::new(None, self.start_height);
        cursor.rewind(target);
        Ok(cursor)
    }
}
