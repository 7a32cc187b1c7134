//! Paged operation queue.
//!
//! Operations are buffered into a [`Page`]. A flush runs the whole page inside one
//! transaction, deletes first and creates last, with every operation isolated
//! in its own savepoint so a failing operation never aborts its siblings. Failures
//! are kept as [`ErrorRecord`]s until [`OperationQueue::retry_errors`].
//!
//! No method of the queue returns an error. Whether work actually landed is visible
//! through [`OperationQueue::stats`] and [`OperationQueue::errors`].
//!
//! A queue has a single writer: every mutating method takes `&mut self`. Share it
//! between producers by wrapping it in a `Mutex`.

use std::mem;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::entity::EntityType;
use crate::operation::{CustomOperation, QueuedOperation, Upsert};
use crate::page::Page;
use crate::result::DbResult;
use crate::stats::{QueueStats, Statistics};
use crate::store::{Transaction, TransactionalStore};
use crate::value::{Payload, Value};

/// A failed operation and why it failed.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub operation: QueuedOperation,
    pub error: String,
}

/// Buffers mutations into pages and flushes each page in one transaction.
pub struct OperationQueue<S: TransactionalStore> {
    store: S,
    config: QueueConfig,
    current_page: Page,
    errors: Vec<ErrorRecord>,
    stats: Statistics,
}

impl<S: TransactionalStore> OperationQueue<S> {
    /// Create a queue writing to `store`.
    ///
    /// A `page_size` of 0 is treated as 1.
    pub fn new(store: S, config: QueueConfig) -> Self {
        if config.page_size == 0 {
            warn!("page_size of 0 is not allowed, using 1");
        }
        let config = QueueConfig {
            page_size: config.page_size.max(1),
            ..config
        };

        debug!(
            page_size = config.page_size,
            auto_commit = config.auto_commit,
            "queue initialized"
        );

        Self {
            store,
            current_page: Page::new(config.page_size),
            config,
            errors: Vec::new(),
            stats: Statistics::default(),
        }
    }

    /// Append an operation to the current page.
    ///
    /// With `auto_commit` enabled a full page is flushed before returning.
    pub fn enqueue(&mut self, operation: QueuedOperation) {
        debug!(
            kind = %operation.kind(),
            target = operation.target(),
            "queued operation"
        );
        self.current_page.push(operation);

        if self.config.auto_commit && self.current_page.is_full() {
            self.flush_page();
        }
    }

    pub fn create(&mut self, entity_type: &EntityType, payload: Payload) {
        self.enqueue(QueuedOperation::create(entity_type, payload));
    }

    pub fn update(&mut self, entity_type: &EntityType, key: impl Into<Value>, payload: Payload) {
        self.enqueue(QueuedOperation::update(entity_type, key, payload));
    }

    pub fn delete(&mut self, entity_type: &EntityType, key: impl Into<Value>) {
        self.enqueue(QueuedOperation::delete(entity_type, key));
    }

    /// Queue a command that runs inside the page transaction.
    ///
    /// # Example
    ///
    /// ```
    /// use tinybatch::{
    ///     DbResult, EntityType, OperationQueue, Payload, QueueConfig, SledStore, Transaction,
    /// };
    ///
    /// let store = SledStore::temporary().unwrap();
    /// let events = EntityType::new("events", "id").field("name");
    /// let mut queue = OperationQueue::new(store, QueueConfig::default());
    ///
    /// let target = events.clone();
    /// queue.custom(
    ///     move |tx: &mut dyn Transaction, payload: &Payload| -> DbResult<()> {
    ///         tx.add(&target, payload)?;
    ///         Ok(())
    ///     },
    ///     Payload::new().with("id", 1).with("name", "Ultimate Singles"),
    /// );
    /// queue.commit();
    ///
    /// assert_eq!(queue.stats().operations_successful, 1);
    /// ```
    pub fn custom(&mut self, callback: impl CustomOperation + 'static, payload: Payload) {
        self.enqueue(QueuedOperation::custom(callback, payload));
    }

    /// Queue an update when the payload carries a primary key, a create otherwise.
    pub fn save(&mut self, entity_type: &EntityType, payload: Payload) {
        match entity_type.key_of(&payload).cloned() {
            Some(key) => self.update(entity_type, key, payload),
            None => self.create(entity_type, payload),
        }
    }

    /// Queue a write that updates the record if it exists and creates it otherwise.
    pub fn upsert(&mut self, entity_type: &EntityType, payload: Payload) {
        self.custom(Upsert::new(entity_type), payload);
    }

    /// Flush the current page regardless of its size.
    pub fn commit(&mut self) {
        if !self.current_page.is_empty() {
            debug!(operations = self.current_page.len(), "manual commit requested");
            self.flush_page();
        }
    }

    /// Run every operation of the current page inside one transaction.
    ///
    /// Does nothing on an empty page. Failed operations are moved to the error set;
    /// if the transaction itself cannot be opened or committed, every operation of
    /// the page is recorded as failed.
    pub fn flush_page(&mut self) {
        if self.current_page.is_empty() {
            return;
        }

        let operations = self.current_page.take().into_sorted();
        let count = operations.len();
        debug!(operations = count, "flushing page");

        let start = Instant::now();
        let (successful, failed) = match self.execute_page(&operations) {
            Ok(failures) => {
                let failed = failures.len();
                self.errors.extend(failures);
                (count - failed, failed)
            }
            Err(e) => {
                error!(operations = count, error = %e, "entire page failed");
                let message = format!("page failed: {e}");
                self.errors
                    .extend(operations.into_iter().map(|operation| ErrorRecord {
                        operation,
                        error: message.clone(),
                    }));
                (0, count)
            }
        };

        self.store.clear_scoped_cache();

        let elapsed = start.elapsed();
        self.stats
            .record_page(successful as u64, failed as u64, elapsed);

        debug!(
            page = self.stats.pages_processed,
            successful,
            failed,
            elapsed_ms = elapsed.as_millis() as u64,
            "page flushed"
        );
    }

    /// Execute sorted operations in one transaction and return the ones that failed.
    fn execute_page(&self, operations: &[QueuedOperation]) -> DbResult<Vec<ErrorRecord>> {
        let mut tx = self.store.open_scope()?;
        let mut failures = vec![];

        for operation in operations {
            let savepoint = tx.savepoint();
            if let Err(e) = operation.execute(&mut tx) {
                tx.rollback_to(savepoint);
                error!(
                    kind = %operation.kind(),
                    target = operation.target(),
                    error = %e,
                    "operation failed"
                );
                failures.push(ErrorRecord {
                    operation: operation.clone(),
                    error: e.to_string(),
                });
            }
        }

        tx.commit()?;
        Ok(failures)
    }

    /// Discard the current page without touching the store.
    ///
    /// Returns the number of discarded operations.
    pub fn rollback_current_page(&mut self) -> usize {
        let discarded = self.current_page.take().len();
        info!(discarded, "discarded queued operations");
        discarded
    }

    /// Move every failed operation back into the current page and flush it.
    pub fn retry_errors(&mut self) {
        if self.errors.is_empty() {
            debug!("no errors to retry");
            return;
        }

        let errors = mem::take(&mut self.errors);
        info!(operations = errors.len(), "retrying failed operations");
        for record in errors {
            self.current_page.push(record.operation);
        }

        self.flush_page();
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats::snapshot(&self.stats, self.current_page.len(), self.errors.len())
    }

    /// Failed operations waiting for a retry, oldest first.
    pub fn errors(&self) -> &[ErrorRecord] {
        &self.errors
    }

    /// Number of operations in the current page.
    pub fn pending(&self) -> usize {
        self.current_page.len()
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::TinyBatchError;
    use crate::store::SledStore;

    fn organizations() -> EntityType {
        EntityType::new("organizations", "id")
            .unique("normalized_key")
            .field("display_name")
    }

    fn org(n: usize) -> Payload {
        Payload::new()
            .with("normalized_key", format!("org_{n}@example.com"))
            .with("display_name", format!("Org {n}"))
    }

    fn queue(page_size: usize, auto_commit: bool) -> OperationQueue<SledStore> {
        OperationQueue::new(
            SledStore::temporary().unwrap(),
            QueueConfig::new(page_size, auto_commit),
        )
    }

    #[test]
    fn commit_flushes_partial_page() {
        let mut queue = queue(5, false);
        let organizations = organizations();

        for n in 0..3 {
            queue.create(&organizations, org(n));
        }
        assert_eq!(queue.pending(), 3);
        assert_eq!(queue.store().count(&organizations).unwrap(), 0);

        queue.commit();

        let stats = queue.stats();
        assert_eq!(stats.pages_processed, 1);
        assert_eq!(stats.operations_successful, 3);
        assert_eq!(stats.current_page_size, 0);
        assert_eq!(queue.store().count(&organizations).unwrap(), 3);
    }

    #[test]
    fn auto_commit_flushes_full_pages() {
        let mut queue = queue(2, true);
        let organizations = organizations();

        for n in 0..5 {
            queue.create(&organizations, org(n));
        }

        let stats = queue.stats();
        assert_eq!(stats.pages_processed, 2);
        assert_eq!(stats.operations_successful, 4);
        assert_eq!(stats.current_page_size, 1);

        queue.commit();
        assert_eq!(queue.stats().pages_processed, 3);
        assert_eq!(queue.store().count(&organizations).unwrap(), 5);
    }

    #[test]
    fn no_auto_commit_keeps_growing() {
        let mut queue = queue(2, false);
        let organizations = organizations();

        for n in 0..5 {
            queue.create(&organizations, org(n));
        }

        assert_eq!(queue.pending(), 5);
        assert_eq!(queue.stats().pages_processed, 0);
    }

    #[test]
    fn empty_flush_changes_nothing() {
        let mut queue = queue(2, true);

        queue.flush_page();
        queue.commit();

        assert_eq!(queue.stats().pages_processed, 0);
        assert_eq!(queue.stats().total_operations, 0);
    }

    #[test]
    fn failed_operation_is_isolated() {
        let mut queue = queue(3, false);
        let organizations = organizations();

        queue.create(&organizations, org(1));
        queue.commit();

        queue.create(&organizations, org(1));
        queue.create(&organizations, org(2));
        queue.create(&organizations, org(3));
        queue.commit();

        let stats = queue.stats();
        assert_eq!(stats.operations_successful, 3);
        assert_eq!(stats.operations_failed, 1);
        assert_eq!(stats.errors_pending, 1);
        assert_eq!(stats.success_rate, 75.0);
        assert_eq!(queue.store().count(&organizations).unwrap(), 3);

        let error = &queue.errors()[0];
        assert_eq!(error.operation.payload(), &org(1));
        assert!(error.error.contains("already exists"));
    }

    #[test]
    fn deletes_run_before_creates() {
        let mut queue = queue(10, false);
        let organizations = organizations();

        queue.create(&organizations, org(1).with("id", 1));
        queue.commit();

        // Re-creating id 1 only works if the delete runs first.
        queue.create(&organizations, org(1).with("id", 1));
        queue.delete(&organizations, 1);
        queue.commit();

        assert_eq!(queue.stats().operations_failed, 0);
        assert_eq!(queue.store().count(&organizations).unwrap(), 1);
    }

    #[test]
    fn update_missing_record_fails() {
        let mut queue = queue(10, false);
        let organizations = organizations();

        queue.update(&organizations, 99, Payload::new().with("display_name", "x"));
        queue.delete(&organizations, 98);
        queue.commit();

        assert_eq!(queue.stats().operations_failed, 2);
        assert!(queue
            .errors()
            .iter()
            .all(|record| record.error.starts_with("record not found")));
    }

    #[test]
    fn rollback_discards_page() {
        let mut queue = queue(10, false);
        let organizations = organizations();

        queue.create(&organizations, org(1));
        queue.create(&organizations, org(2));

        assert_eq!(queue.rollback_current_page(), 2);
        assert_eq!(queue.pending(), 0);

        queue.commit();
        let stats = queue.stats();
        assert_eq!(stats.operations_successful, 0);
        assert_eq!(stats.operations_failed, 0);
        assert_eq!(queue.store().count(&organizations).unwrap(), 0);
    }

    #[test]
    fn retry_only_failed_operations() {
        let mut queue = queue(10, false);
        let organizations = organizations();

        queue.update(&organizations, 1, Payload::new().with("display_name", "Renamed"));
        queue.create(&organizations, org(2));
        queue.commit();
        assert_eq!(queue.errors().len(), 1);

        // Make the update succeed on retry.
        queue.create(&organizations, org(1).with("id", 1));
        queue.commit();

        queue.retry_errors();

        let stats = queue.stats();
        assert_eq!(stats.errors_pending, 0);
        assert_eq!(stats.pages_processed, 3);
        assert_eq!(stats.operations_successful, 3);
        assert_eq!(stats.operations_failed, 1);

        let record = queue
            .store()
            .get(&organizations, &Value::Int(1))
            .unwrap()
            .unwrap();
        assert_eq!(record.get("display_name"), Some(&Value::from("Renamed")));
    }

    #[test]
    fn retry_without_errors_is_noop() {
        let mut queue = queue(10, false);

        queue.retry_errors();
        assert_eq!(queue.stats().pages_processed, 0);
    }

    #[test]
    fn custom_failure_rolls_back_its_own_writes() {
        let mut queue = queue(10, false);
        let organizations = organizations();

        let target = organizations.clone();
        queue.custom(
            move |tx: &mut dyn Transaction, payload: &Payload| -> DbResult<()> {
                tx.add(&target, payload)?;
                Err(TinyBatchError::custom("child insert failed"))
            },
            org(1),
        );
        queue.create(&organizations, org(2));
        queue.commit();

        let stats = queue.stats();
        assert_eq!(stats.operations_successful, 1);
        assert_eq!(stats.operations_failed, 1);
        assert_eq!(queue.errors()[0].error, "child insert failed");
        assert_eq!(queue.store().count(&organizations).unwrap(), 1);
    }

    #[test]
    fn save_picks_create_or_update() {
        let mut queue = queue(10, false);
        let organizations = organizations();

        queue.save(&organizations, org(1).with("id", 7));
        queue.commit();
        // Update of a record that does not exist yet.
        assert_eq!(queue.stats().operations_failed, 1);

        queue.save(&organizations, org(1));
        queue.commit();
        assert_eq!(queue.stats().operations_successful, 1);
    }

    #[test]
    fn upsert_replaces_existing() {
        let mut queue = queue(10, false);
        let organizations = organizations();

        queue.upsert(&organizations, org(1).with("id", 1));
        queue.commit();
        queue.upsert(
            &organizations,
            Payload::new().with("id", 1).with("display_name", "Renamed"),
        );
        queue.commit();

        let all = queue.store().all(&organizations).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].get("display_name"), Some(&Value::from("Renamed")));
        assert_eq!(
            all[0].get("normalized_key"),
            Some(&Value::from("org_1@example.com"))
        );
    }

    #[test]
    fn zero_page_size_is_clamped() {
        let mut queue = queue(0, true);
        let organizations = organizations();

        assert_eq!(queue.config().page_size, 1);
        queue.create(&organizations, org(1));
        assert_eq!(queue.stats().pages_processed, 1);
    }
}
