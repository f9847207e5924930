use serde::Serialize;

use super::message::{MessageStatus, Priority};

/// Per-tenant queue counts, computed on demand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    /// Messages waiting for dispatch (`pending` + `retry`).
    pub total_queued: i64,
    pub high_priority: i64,
    pub medium_priority: i64,
    pub low_priority: i64,
    pub pending: i64,
    pub retry: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
}

impl QueueSnapshot {
    pub fn add(&mut self, status: MessageStatus, priority: Priority, count: i64) {
        match status {
            MessageStatus::Pending => self.pending += count,
            MessageStatus::Retry => self.retry += count,
            MessageStatus::Processing => self.processing += count,
            MessageStatus::Completed => self.completed += count,
            MessageStatus::Failed => self.failed += count,
        }

        if status.is_queued() {
            self.total_queued += count;
            match priority {
                Priority::High => self.high_priority += count,
                Priority::Medium => self.medium_priority += count,
                Priority::Low => self.low_priority += count,
            }
        }
    }
}
