//! Durable regeneration queue.
//!
//! # Responsibility
//! - Persist queued change-set payloads with claim and ownership metadata.
//! - Provide single-flight FIFO claiming and stale-claim recovery.
//!
//! # Invariants
//! - At most one entry has `running = 1` across every process sharing the file.
//! - Claim is one conditional UPDATE; the claim token identifies the winner.
//! - Failed entries keep `error_text` and are never claimed until requeued.

use crate::model::queue::{EntryId, QueueEntry, QueueOwner};
use crate::repo::{ensure_connection_ready, int_to_bool, RepoError, RepoResult};
use log::info;
use rusqlite::{params, Connection, Row, Transaction, TransactionBehavior};
use std::collections::HashSet;
use uuid::Uuid;

const ENTRY_SELECT_SQL: &str = "SELECT
    entry_id,
    payload,
    running,
    owner_application_id,
    owner_worker_id,
    claim_token,
    started_at,
    ended_at,
    error_text,
    created_at
FROM regeneration_queue";

/// Repository interface for the regeneration queue.
pub trait QueueRepository {
    fn enqueue(&self, payload: &str) -> RepoResult<EntryId>;
    /// Claims the oldest claimable entry if nothing is running anywhere.
    fn claim_next(&self, owner: &QueueOwner) -> RepoResult<Option<QueueEntry>>;
    /// Parks an entry with its failure text.
    fn mark_failed(&self, entry_id: EntryId, message: &str) -> RepoResult<()>;
    /// Deletes a successfully processed entry.
    fn complete(&self, entry_id: EntryId) -> RepoResult<()>;
    /// Resets running entries of `application_id` whose worker is not live.
    fn sweep_stale(&self, application_id: &str, live_workers: &HashSet<String>)
        -> RepoResult<usize>;
    fn get_entry(&self, entry_id: EntryId) -> RepoResult<Option<QueueEntry>>;
    fn list_entries(&self) -> RepoResult<Vec<QueueEntry>>;
    fn pending_count(&self) -> RepoResult<u64>;
    /// Clears the failure of one parked entry so it can be claimed again.
    fn requeue_failed(&self, entry_id: EntryId) -> RepoResult<()>;
    fn requeue_all_failed(&self) -> RepoResult<usize>;
}

/// SQLite-backed queue repository.
pub struct SqliteQueueRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteQueueRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, &["regeneration_queue"])?;
        Ok(Self { conn })
    }
}

impl QueueRepository for SqliteQueueRepository<'_> {
    fn enqueue(&self, payload: &str) -> RepoResult<EntryId> {
        self.conn.execute(
            "INSERT INTO regeneration_queue (payload) VALUES (?1);",
            [payload],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn claim_next(&self, owner: &QueueOwner) -> RepoResult<Option<QueueEntry>> {
        let claim_token = Uuid::new_v4().to_string();
        let claimed = self.conn.execute(
            "UPDATE regeneration_queue
             SET running = 1,
                 owner_application_id = ?1,
                 owner_worker_id = ?2,
                 claim_token = ?3,
                 started_at = (strftime('%s', 'now') * 1000),
                 ended_at = NULL
             WHERE entry_id = (
                    SELECT entry_id
                    FROM regeneration_queue
                    WHERE running = 0
                      AND error_text IS NULL
                    ORDER BY entry_id ASC
                    LIMIT 1
                 )
               AND running = 0
               AND NOT EXISTS (
                    SELECT 1
                    FROM regeneration_queue
                    WHERE running = 1
                 );",
            params![
                owner.application_id.as_str(),
                owner.worker_id.as_str(),
                claim_token.as_str(),
            ],
        )?;
        if claimed == 0 {
            return Ok(None);
        }

        let mut stmt = self
            .conn
            .prepare(&format!("{ENTRY_SELECT_SQL} WHERE claim_token = ?1;"))?;
        let mut rows = stmt.query([claim_token.as_str()])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_entry_row(row)?)),
            None => Err(RepoError::InvalidData(
                "claimed queue entry vanished before read-back".to_string(),
            )),
        }
    }

    fn mark_failed(&self, entry_id: EntryId, message: &str) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE regeneration_queue
             SET running = 0,
                 claim_token = NULL,
                 ended_at = (strftime('%s', 'now') * 1000),
                 error_text = ?2
             WHERE entry_id = ?1;",
            params![entry_id, message],
        )?;
        if changed == 0 {
            return Err(RepoError::EntryNotFound(entry_id));
        }
        Ok(())
    }

    fn complete(&self, entry_id: EntryId) -> RepoResult<()> {
        let changed = self.conn.execute(
            "DELETE FROM regeneration_queue WHERE entry_id = ?1;",
            [entry_id],
        )?;
        if changed == 0 {
            return Err(RepoError::EntryNotFound(entry_id));
        }
        Ok(())
    }

    fn sweep_stale(
        &self,
        application_id: &str,
        live_workers: &HashSet<String>,
    ) -> RepoResult<usize> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let candidates = {
            let mut stmt = tx.prepare(
                "SELECT entry_id, owner_worker_id
                 FROM regeneration_queue
                 WHERE running = 1
                   AND (owner_application_id = ?1 OR owner_application_id IS NULL);",
            )?;
            let rows = stmt
                .query_map([application_id], |row| {
                    Ok((row.get::<_, EntryId>(0)?, row.get::<_, Option<String>>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut reset = 0;
        for (entry_id, worker_id) in candidates {
            let alive = worker_id
                .as_ref()
                .is_some_and(|worker| live_workers.contains(worker));
            if alive {
                continue;
            }
            reset += tx.execute(
                "UPDATE regeneration_queue
                 SET running = 0,
                     owner_application_id = NULL,
                     owner_worker_id = NULL,
                     claim_token = NULL,
                     started_at = NULL
                 WHERE entry_id = ?1
                   AND running = 1;",
                [entry_id],
            )?;
            info!(
                "event=queue_sweep module=queue status=reset entry_id={entry_id} application_id={application_id}"
            );
        }
        tx.commit()?;
        Ok(reset)
    }

    fn get_entry(&self, entry_id: EntryId) -> RepoResult<Option<QueueEntry>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{ENTRY_SELECT_SQL} WHERE entry_id = ?1;"))?;
        let mut rows = stmt.query([entry_id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_entry_row(row)?));
        }
        Ok(None)
    }

    fn list_entries(&self) -> RepoResult<Vec<QueueEntry>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{ENTRY_SELECT_SQL} ORDER BY entry_id ASC;"))?;
        let mut rows = stmt.query([])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_entry_row(row)?);
        }
        Ok(items)
    }

    fn pending_count(&self) -> RepoResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*)
             FROM regeneration_queue
             WHERE running = 0
               AND error_text IS NULL;",
            [],
            |row| row.get(0),
        )?;
        u64::try_from(count)
            .map_err(|_| RepoError::InvalidData(format!("negative queue count `{count}`")))
    }

    fn requeue_failed(&self, entry_id: EntryId) -> RepoResult<()> {
        let entry = self
            .get_entry(entry_id)?
            .ok_or(RepoError::EntryNotFound(entry_id))?;
        if !entry.is_failed() {
            return Err(RepoError::InvalidData(format!(
                "queue entry {entry_id} is not failed"
            )));
        }
        self.conn.execute(
            "UPDATE regeneration_queue
             SET error_text = NULL,
                 ended_at = NULL,
                 started_at = NULL,
                 owner_application_id = NULL,
                 owner_worker_id = NULL
             WHERE entry_id = ?1;",
            [entry_id],
        )?;
        Ok(())
    }

    fn requeue_all_failed(&self) -> RepoResult<usize> {
        let changed = self.conn.execute(
            "UPDATE regeneration_queue
             SET error_text = NULL,
                 ended_at = NULL,
                 started_at = NULL,
                 owner_application_id = NULL,
                 owner_worker_id = NULL
             WHERE error_text IS NOT NULL
               AND running = 0;",
            [],
        )?;
        Ok(changed)
    }
}

fn parse_entry_row(row: &Row<'_>) -> RepoResult<QueueEntry> {
    Ok(QueueEntry {
        entry_id: row.get("entry_id")?,
        payload: row.get("payload")?,
        running: int_to_bool(row.get("running")?, "regeneration_queue.running")?,
        owner_application_id: row.get("owner_application_id")?,
        owner_worker_id: row.get("owner_worker_id")?,
        claim_token: row.get("claim_token")?,
        started_at: row.get("started_at")?,
        ended_at: row.get("ended_at")?,
        error_text: row.get("error_text")?,
        created_at: row.get("created_at")?,
    })
}
