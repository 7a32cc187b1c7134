use std::time::Duration;

use serde::Serialize;

/// Running totals for the life of one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Statistics {
    pub pages_processed: u64,
    pub operations_successful: u64,
    pub operations_failed: u64,
    pub total_processing_time: Duration,
}

impl Statistics {
    pub(crate) fn record_page(&mut self, successful: u64, failed: u64, elapsed: Duration) {
        self.pages_processed += 1;
        self.operations_successful += successful;
        self.operations_failed += failed;
        self.total_processing_time += elapsed;
    }

    /// Alias of `operations_successful`.
    pub fn items_processed(&self) -> u64 {
        self.operations_successful
    }

    pub fn total_operations(&self) -> u64 {
        self.operations_successful + self.operations_failed
    }

    /// Percentage of attempted operations that succeeded.
    pub fn success_rate(&self) -> f64 {
        self.operations_successful as f64 / self.total_operations().max(1) as f64 * 100.0
    }

    pub fn avg_page_time(&self) -> Duration {
        let pages = u32::try_from(self.pages_processed.max(1)).unwrap_or(u32::MAX);
        self.total_processing_time / pages
    }
}

/// Point-in-time snapshot returned by [`crate::OperationQueue::stats`].
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueueStats {
    pub pages_processed: u64,
    pub operations_successful: u64,
    pub operations_failed: u64,
    pub items_processed: u64,
    pub total_operations: u64,
    pub total_processing_time: Duration,
    pub avg_page_time: Duration,
    pub success_rate: f64,
    /// Operations waiting in the current page.
    pub current_page_size: usize,
    /// Failed operations waiting for a retry.
    pub errors_pending: usize,
}

impl QueueStats {
    pub(crate) fn snapshot(stats: &Statistics, current_page_size: usize, errors_pending: usize) -> Self {
        Self {
            pages_processed: stats.pages_processed,
            operations_successful: stats.operations_successful,
            operations_failed: stats.operations_failed,
            items_processed: stats.items_processed(),
            total_operations: stats.total_operations(),
            total_processing_time: stats.total_processing_time,
            avg_page_time: stats.avg_page_time(),
            success_rate: stats.success_rate(),
            current_page_size,
            errors_pending,
        }
    }
}
