//! Indexer cursor: the last fully indexed height.
//!
//! The cursor is never persisted on its own. On startup it is recovered as
//! the highest height present in the transaction store; `None` means the
//! chain has never been indexed, which is distinct from "indexed to 0".

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Last height whose writes were flushed.
    last_indexed: Option<u64>,
    /// First height to index when nothing has been indexed yet.
    start_height: u64,
}

impl Cursor {
    pub fn new(last_indexed: Option<u64>, start_height: u64) -> Self {
        Self {
            last_indexed,
            start_height,
        }
    }

    pub fn last_indexed(&self) -> Option<u64> {
        self.last_indexed
    }

    /// Returns `true` if nothing has ever been indexed.
    pub fn is_fresh(&self) -> bool {
        self.last_indexed.is_none()
    }

    /// The next height to index.
    pub fn next_height(&self) -> u64 {
        match self.last_indexed {
            Some(h) => h + 1,
            None => self.start_height,
        }
    }

    /// Move forward to `height`. Lower heights are ignored.
    pub fn advance(&mut self, height: u64) {
        if self.last_indexed.map_or(true, |h| height > h) {
            self.last_indexed = Some(height);
        }
    }

    /// Reset to `height`, which may be lower than the current position.
    pub fn rewind(&mut self, height: u64) {
        self.last_indexed = Some(height);
    }
}

/// Compute the height to rewind to on startup.
///
/// An explicit override wins. Otherwise the last indexed height minus the
/// safety margin, saturating at zero. `None` when there is nothing to
/// rewind.
pub fn rewind_target(last_indexed: Option<u64>, margin: u64, override_height: Option<u64>) -> Option<u64> {
    override_height.or_else(|| last_indexed.map(|h| h.saturating_sub(margin)))
}
