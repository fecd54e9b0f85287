//! Slug assignment repository.
//!
//! # Responsibility
//! - Read assignments by node/culture and by `(site, culture, slug)`.
//! - Apply a batch of slug writes atomically.
//!
//! # Invariants
//! - `apply_writes` is all-or-nothing.
//! - Holder lookups are ordered `is_custom DESC, node_id ASC` so pinned holders
//!   are reported first.

use crate::model::content::{NodeId, SiteId};
use crate::model::slug::{SlugAssignment, SlugWrite};
use crate::repo::{bool_to_int, ensure_connection_ready, int_to_bool, RepoResult};
use rusqlite::{params, Connection, Row, Transaction, TransactionBehavior};

const ASSIGNMENT_SELECT_SQL: &str = "SELECT
    site_id,
    culture_code,
    node_id,
    slug,
    is_custom
FROM slug_assignments";

/// Repository interface for slug assignments.
pub trait SlugRepository {
    fn get_assignment(
        &self,
        node_id: NodeId,
        culture_code: &str,
    ) -> RepoResult<Option<SlugAssignment>>;
    /// Every assignment holding `slug` in one site and culture.
    fn find_holders(
        &self,
        site_id: SiteId,
        culture_code: &str,
        slug: &str,
    ) -> RepoResult<Vec<SlugAssignment>>;
    fn list_for_site(&self, site_id: SiteId) -> RepoResult<Vec<SlugAssignment>>;
    /// Applies all writes in one transaction and returns the row count touched.
    fn apply_writes(&self, writes: &[SlugWrite]) -> RepoResult<usize>;
}

/// SQLite-backed slug repository.
pub struct SqliteSlugRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteSlugRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, &["slug_assignments"])?;
        Ok(Self { conn })
    }
}

impl SlugRepository for SqliteSlugRepository<'_> {
    fn get_assignment(
        &self,
        node_id: NodeId,
        culture_code: &str,
    ) -> RepoResult<Option<SlugAssignment>> {
        let mut stmt = self.conn.prepare(&format!(
            "{ASSIGNMENT_SELECT_SQL} WHERE node_id = ?1 AND culture_code = ?2;"
        ))?;
        let mut rows = stmt.query(params![node_id, culture_code])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_assignment_row(row)?));
        }
        Ok(None)
    }

    fn find_holders(
        &self,
        site_id: SiteId,
        culture_code: &str,
        slug: &str,
    ) -> RepoResult<Vec<SlugAssignment>> {
        let mut stmt = self.conn.prepare(&format!(
            "{ASSIGNMENT_SELECT_SQL}
             WHERE site_id = ?1
               AND culture_code = ?2
               AND slug = ?3
             ORDER BY is_custom DESC, node_id ASC;"
        ))?;
        let mut rows = stmt.query(params![site_id, culture_code, slug])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_assignment_row(row)?);
        }
        Ok(items)
    }

    fn list_for_site(&self, site_id: SiteId) -> RepoResult<Vec<SlugAssignment>> {
        let mut stmt = self.conn.prepare(&format!(
            "{ASSIGNMENT_SELECT_SQL}
             WHERE site_id = ?1
             ORDER BY culture_code ASC, slug ASC, node_id ASC;"
        ))?;
        let mut rows = stmt.query([site_id])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_assignment_row(row)?);
        }
        Ok(items)
    }

    fn apply_writes(&self, writes: &[SlugWrite]) -> RepoResult<usize> {
        if writes.is_empty() {
            return Ok(0);
        }

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let mut touched = 0;
        for write in writes {
            touched += match write {
                SlugWrite::Upsert(assignment) => tx.execute(
                    "INSERT INTO slug_assignments (node_id, culture_code, site_id, slug, is_custom)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(node_id, culture_code) DO UPDATE SET
                        site_id = excluded.site_id,
                        slug = excluded.slug,
                        is_custom = excluded.is_custom,
                        updated_at = (strftime('%s', 'now') * 1000);",
                    params![
                        assignment.node_id,
                        assignment.culture_code.as_str(),
                        assignment.site_id,
                        assignment.slug.as_str(),
                        bool_to_int(assignment.is_custom),
                    ],
                )?,
                SlugWrite::Remove {
                    node_id,
                    culture_code,
                } => tx.execute(
                    "DELETE FROM slug_assignments WHERE node_id = ?1 AND culture_code = ?2;",
                    params![node_id, culture_code.as_str()],
                )?,
            };
        }
        tx.commit()?;
        Ok(touched)
    }
}

fn parse_assignment_row(row: &Row<'_>) -> RepoResult<SlugAssignment> {
    Ok(SlugAssignment {
        site_id: row.get("site_id")?,
        culture_code: row.get("culture_code")?,
        node_id: row.get("node_id")?,
        slug: row.get("slug")?,
        is_custom: int_to_bool(row.get("is_custom")?, "slug_assignments.is_custom")?,
    })
}
