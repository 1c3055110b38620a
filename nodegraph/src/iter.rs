//! [`EntriesIterator`]: a snapshot of a directory's entries taken once under
//! a read lock, walked without holding any lock, and cancellable from any
//! task at any time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{NodeGraphError, NodeGraphResult};
use crate::metadata::MetadataMap;
use crate::node::Node;

/// One directory entry as handed back by [`EntriesIterator`].
pub struct EntriesItem {
    pub name: String,
    pub node: Node,
    pub metadata: MetadataMap,
}

/// Iterates a directory listing snapshot. The snapshot is fixed at the
/// moment the iterator was created — later mutations of the directory are
/// not reflected. `cancel` is safe to call from any thread at any time,
/// including concurrently with `get_entry`.
pub struct EntriesIterator {
    items: Vec<(String, Node, MetadataMap)>,
    pos: usize,
    cancelled: Arc<AtomicBool>,
}

impl EntriesIterator {
    pub(crate) fn new(items: Vec<(String, Node, MetadataMap)>) -> Self {
        Self {
            items,
            pos: 0,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stops the iteration. After this, `next` keeps reporting that there's
    /// more to see, but `get_entry` fails with [`NodeGraphError::IterationCancelled`].
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether another call to `get_entry` would yield an entry (or, if
    /// cancelled, would report the cancellation).
    pub fn next(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst) || self.pos < self.items.len()
    }

    pub fn get_entry(&mut self) -> NodeGraphResult<EntriesItem> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(NodeGraphError::IterationCancelled);
        }
        let (name, node, metadata) = self
            .items
            .get(self.pos)
            .cloned()
            .ok_or(NodeGraphError::IterationCancelled)?;
        self.pos += 1;
        Ok(EntriesItem { name, node, metadata })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_iterator_reports_no_next() {
        let it = EntriesIterator::new(Vec::new());
        assert!(!it.next());
    }

    #[test]
    fn cancel_makes_get_entry_fail_even_with_items_left() {
        let mut it = EntriesIterator::new(Vec::new());
        it.cancel();
        assert!(it.next());
        assert!(matches!(it.get_entry(), Err(NodeGraphError::IterationCancelled)));
    }
}
