//! Chained background worker for the regeneration queue.
//!
//! # Responsibility
//! - Run queued change-sets one at a time, each link on its own thread.
//! - Recover claims left behind by dead workers of this application.
//!
//! # Invariants
//! - At most one chain is active per runner.
//! - A link holds the store lock for exactly one entry.
//! - Panics while processing are recorded on the entry; the chain continues.

use crate::error::{SlugError, SlugResult};
use crate::logging::panic_message;
use crate::model::change_set::ChangeSet;
use crate::model::queue::{EntryId, QueueEntry, QueueOwner};
use crate::pattern::analyzer::PatternAnalyzer;
use crate::repo::content_repo::SqliteContentRepository;
use crate::repo::queue_repo::{QueueRepository, SqliteQueueRepository};
use crate::repo::slug_repo::SqliteSlugRepository;
use crate::service::commit::{CommitExecutor, CommitMode, CommitReport};
use crate::service::tree_diff::TreeDiffBuilder;
use log::{error, info, warn};
use rusqlite::Connection;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;
use uuid::Uuid;

/// Result of one link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Nothing claimable (empty queue or another entry running).
    Idle,
    Completed {
        entry_id: EntryId,
        report: CommitReport,
    },
    /// Entry parked with its error text.
    Failed { entry_id: EntryId, error: String },
}

pub struct QueueRunner {
    conn: Arc<Mutex<Connection>>,
    analyzer: Arc<PatternAnalyzer>,
    application_id: String,
    live_workers: Mutex<HashSet<String>>,
    chain_active: AtomicBool,
}

struct WorkerRegistration<'a> {
    runner: &'a QueueRunner,
    worker_id: String,
}

impl<'a> WorkerRegistration<'a> {
    fn register(runner: &'a QueueRunner) -> Self {
        let worker_id = Uuid::new_v4().to_string();
        runner.live_set().insert(worker_id.clone());
        Self { runner, worker_id }
    }
}

impl Drop for WorkerRegistration<'_> {
    fn drop(&mut self) {
        self.runner.live_set().remove(&self.worker_id);
    }
}

impl QueueRunner {
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        analyzer: Arc<PatternAnalyzer>,
        application_id: impl Into<String>,
    ) -> Self {
        Self {
            conn,
            analyzer,
            application_id: application_id.into(),
            live_workers: Mutex::new(HashSet::new()),
            chain_active: AtomicBool::new(false),
        }
    }

    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    pub fn is_chain_active(&self) -> bool {
        self.chain_active.load(Ordering::SeqCst)
    }

    /// Starts a chain unless one is already active; returns whether it started.
    pub fn trigger(self: &Arc<Self>) -> bool {
        if self
            .chain_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        info!(
            "event=queue_chain module=queue status=start application_id={}",
            self.application_id
        );
        self.spawn_link();
        true
    }

    /// Sweeps stale claims, then starts a chain when work is waiting.
    pub fn safety_net_tick(self: &Arc<Self>) -> SlugResult<usize> {
        let reset = self.sweep()?;
        if self.pending_count()? > 0 {
            self.trigger();
        }
        info!(
            "event=queue_safety_net module=queue status=ok application_id={} reset={reset}",
            self.application_id
        );
        Ok(reset)
    }

    /// Processes entries on the caller's thread until nothing is claimable.
    pub fn drain_blocking(&self) -> SlugResult<Vec<DispatchOutcome>> {
        let mut outcomes = Vec::new();
        loop {
            match self.dispatch_once()? {
                DispatchOutcome::Idle => return Ok(outcomes),
                outcome => outcomes.push(outcome),
            }
        }
    }

    /// Resets running entries of this application whose worker is gone.
    pub fn sweep(&self) -> SlugResult<usize> {
        let conn = self.lock()?;
        let queue = SqliteQueueRepository::try_new(&conn)?;
        let live = self.live_set().clone();
        Ok(queue.sweep_stale(&self.application_id, &live)?)
    }

    /// One link: sweep, claim, process and record a single entry.
    pub fn dispatch_once(&self) -> SlugResult<DispatchOutcome> {
        let worker = WorkerRegistration::register(self);
        let conn = self.lock()?;
        let queue = SqliteQueueRepository::try_new(&conn)?;

        let live = self.live_set().clone();
        queue.sweep_stale(&self.application_id, &live)?;

        let owner = QueueOwner {
            application_id: self.application_id.clone(),
            worker_id: worker.worker_id.clone(),
        };
        let Some(entry) = queue.claim_next(&owner)? else {
            return Ok(DispatchOutcome::Idle);
        };

        let started_at = Instant::now();
        info!(
            "event=queue_entry module=queue status=start entry_id={} worker_id={}",
            entry.entry_id, owner.worker_id
        );

        let processed = panic::catch_unwind(AssertUnwindSafe(|| {
            process_entry(&conn, &self.analyzer, &entry)
        }));
        let outcome = match processed {
            Ok(Ok(report)) if report.is_clean() => {
                queue.complete(entry.entry_id)?;
                info!(
                    "event=queue_entry module=queue status=ok entry_id={} written={} duration_ms={}",
                    entry.entry_id,
                    report.written,
                    started_at.elapsed().as_millis()
                );
                DispatchOutcome::Completed {
                    entry_id: entry.entry_id,
                    report,
                }
            }
            Ok(Ok(report)) => self.park(&queue, entry.entry_id, report.summary())?,
            Ok(Err(err)) => {
                let message = format!("{}: {err}", err.code());
                self.park(&queue, entry.entry_id, message)?
            }
            Err(payload) => {
                let message = format!("panic: {}", panic_message(payload.as_ref()));
                self.park(&queue, entry.entry_id, message)?
            }
        };
        Ok(outcome)
    }

    fn park(
        &self,
        queue: &SqliteQueueRepository<'_>,
        entry_id: EntryId,
        message: String,
    ) -> SlugResult<DispatchOutcome> {
        queue.mark_failed(entry_id, &message)?;
        warn!("event=queue_entry module=queue status=error entry_id={entry_id} error_code=entry_parked");
        Ok(DispatchOutcome::Failed {
            entry_id,
            error: message,
        })
    }

    fn spawn_link(self: &Arc<Self>) {
        let runner = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("slug-queue-link".to_string())
            .spawn(move || runner.run_link());
        if let Err(err) = spawned {
            self.chain_active.store(false, Ordering::SeqCst);
            error!(
                "event=queue_chain module=queue status=error error_code=spawn_failed error={err}"
            );
        }
    }

    fn run_link(self: Arc<Self>) {
        match self.dispatch_once() {
            Ok(DispatchOutcome::Idle) => {
                self.chain_active.store(false, Ordering::SeqCst);
                info!(
                    "event=queue_chain module=queue status=ok application_id={}",
                    self.application_id
                );
                // Entries enqueued while the flag was still set would be stranded.
                if matches!(self.pending_count(), Ok(count) if count > 0) {
                    self.trigger();
                }
            }
            Ok(_) => self.spawn_link(),
            Err(err) => {
                self.chain_active.store(false, Ordering::SeqCst);
                error!(
                    "event=queue_chain module=queue status=error error_code={} error={err}",
                    err.code()
                );
            }
        }
    }

    fn pending_count(&self) -> SlugResult<u64> {
        let conn = self.lock()?;
        let queue = SqliteQueueRepository::try_new(&conn)?;
        let count = queue.pending_count()?;
        Ok(count)
    }

    fn lock(&self) -> SlugResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| SlugError::LockPoisoned)
    }

    fn live_set(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        match self.live_workers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn process_entry(
    conn: &Connection,
    analyzer: &PatternAnalyzer,
    entry: &QueueEntry,
) -> SlugResult<CommitReport> {
    let captured = ChangeSet::from_payload(&entry.payload)?;
    let content = SqliteContentRepository::try_new(conn)?;
    let slugs = SqliteSlugRepository::try_new(conn)?;

    let refreshed = TreeDiffBuilder::new(&content, &slugs, analyzer).refresh(&captured)?;
    CommitExecutor::new(&slugs).commit(&mut [refreshed], CommitMode::SkipConflicts)
}
