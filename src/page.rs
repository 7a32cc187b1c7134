use std::mem;

use crate::operation::QueuedOperation;

/// Ordered buffer of operations waiting for one transactional flush.
#[derive(Debug)]
pub struct Page {
    operations: Vec<QueuedOperation>,
    capacity: usize,
}

impl Page {
    pub fn new(capacity: usize) -> Self {
        Self {
            operations: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, operation: QueuedOperation) {
        self.operations.push(operation);
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.operations.len() >= self.capacity
    }

    /// Replace this page with an empty one and return the old page.
    pub fn take(&mut self) -> Page {
        let empty = Page::new(self.capacity);
        mem::replace(self, empty)
    }

    /// Operations in execution order: by priority, ties kept in enqueue order.
    pub fn into_sorted(self) -> Vec<QueuedOperation> {
        let mut operations = self.operations;
        // `sort_by_key` is stable.
        operations.sort_by_key(QueuedOperation::priority);
        operations
    }
}
