use std::fmt::Display;
use std::ops::{Deref, DerefMut};

use tracing::{debug, error, info_span, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::queue::OperationQueue;
use crate::stats::QueueStats;
use crate::store::TransactionalStore;

/// A unit of work around a queue without auto-commit.
///
/// [`BatchScope::finish`] commits what is left in the page. Dropping the scope
/// without finishing (an early return, `?`, or a panic) discards the page so a
/// half-built unit of work never reaches the store. The store's scoped cache is
/// cleared on every exit path.
pub struct BatchScope<S: TransactionalStore> {
    id: Uuid,
    queue: OperationQueue<S>,
    finished: bool,
}

impl<S: TransactionalStore> BatchScope<S> {
    pub fn begin(store: S, page_size: usize) -> Self {
        let id = Uuid::new_v4();
        debug!(batch = %id, page_size, "starting batch operations");

        Self {
            id,
            queue: OperationQueue::new(store, QueueConfig::new(page_size, false)),
            finished: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn queue_mut(&mut self) -> &mut OperationQueue<S> {
        &mut self.queue
    }

    /// Commit the remaining operations and close the scope.
    pub fn finish(mut self) -> QueueStats {
        if self.queue.pending() > 0 {
            debug!(
                batch = %self.id,
                operations = self.queue.pending(),
                "committing final batch"
            );
            self.queue.commit();
        }
        self.finished = true;
        self.queue.stats()
    }

    /// Discard the remaining operations and close the scope.
    ///
    /// Returns the number of discarded operations.
    pub fn abort(mut self) -> usize {
        self.finished = true;
        self.queue.rollback_current_page()
    }
}

impl<S: TransactionalStore> Deref for BatchScope<S> {
    type Target = OperationQueue<S>;

    fn deref(&self) -> &Self::Target {
        &self.queue
    }
}

impl<S: TransactionalStore> DerefMut for BatchScope<S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.queue
    }
}

impl<S: TransactionalStore> Drop for BatchScope<S> {
    fn drop(&mut self) {
        if !self.finished {
            let discarded = self.queue.rollback_current_page();
            warn!(batch = %self.id, discarded, "batch scope dropped before finishing");
        }

        self.queue.store().clear_scoped_cache();
        debug!(batch = %self.id, "batch operations completed, cache cleared");
    }
}

/// Value returned by a successful [`batch_operations`] block, with the final queue stats.
#[derive(Debug)]
pub struct BatchOutput<T> {
    pub value: T,
    pub stats: QueueStats,
}

/// Run `block` against a fresh queue inside a [`BatchScope`].
///
/// On `Ok` the remaining page is committed. On `Err` the page is discarded and the
/// error is returned unchanged.
///
/// # Example
///
/// ```
/// use tinybatch::{batch_operations, DbResult, EntityType, Payload, SledStore};
///
/// let store = SledStore::temporary().unwrap();
/// let tournaments = EntityType::new("tournaments", "id").field("name");
///
/// let output = batch_operations(&store, 50, |queue| -> DbResult<()> {
///     queue.create(&tournaments, Payload::new().with("id", "t1").with("name", "Genesis"));
///     Ok(())
/// })
/// .unwrap();
///
/// assert_eq!(output.stats.operations_successful, 1);
/// assert_eq!(store.count(&tournaments).unwrap(), 1);
/// ```
pub fn batch_operations<S, T, E, F>(store: S, page_size: usize, block: F) -> Result<BatchOutput<T>, E>
where
    S: TransactionalStore,
    E: Display,
    F: FnOnce(&mut OperationQueue<S>) -> Result<T, E>,
{
    let mut scope = BatchScope::begin(store, page_size);
    let span = info_span!("batch", id = %scope.id());
    let _entered = span.enter();

    match block(scope.queue_mut()) {
        Ok(value) => Ok(BatchOutput {
            value,
            stats: scope.finish(),
        }),
        Err(e) => {
            error!(error = %e, "batch operation failed");
            scope.abort();
            Err(e)
        }
    }
}
