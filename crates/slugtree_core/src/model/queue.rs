//! Regeneration queue entry model.

use serde::Serialize;

pub type EntryId = i64;

/// Worker identity recorded on a claimed entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueOwner {
    pub application_id: String,
    pub worker_id: String,
}

/// One persisted asynchronous rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueEntry {
    pub entry_id: EntryId,
    /// Versioned change-set JSON.
    pub payload: String,
    pub running: bool,
    pub owner_application_id: Option<String>,
    pub owner_worker_id: Option<String>,
    pub claim_token: Option<String>,
    /// Epoch milliseconds.
    pub started_at: Option<i64>,
    pub ended_at: Option<i64>,
    /// Set on failure; failed entries are parked until requeued.
    pub error_text: Option<String>,
    pub created_at: i64,
}

impl QueueEntry {
    pub fn is_failed(&self) -> bool {
        self.error_text.is_some()
    }

    /// Claimable by the next worker.
    pub fn is_pending(&self) -> bool {
        !self.running && self.error_text.is_none()
    }
}
