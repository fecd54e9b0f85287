//! Content tree repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide the tree reads the slug builder needs (nodes, children, types).
//! - Provide host-side writes standing in for the content system.
//!
//! # Invariants
//! - Child listing is deterministic: `node_order ASC, node_id ASC`.
//! - A node's `alias_path` and `node_level` always follow its parent; moves
//!   and alias renames rewrite the whole subtree in one transaction.
//! - Parent and child always belong to the same site.

use crate::model::content::{
    ContentNode, ContentType, ContentTypeId, NewContentNode, NodeId, NodeVariant, Site, SiteId,
};
use crate::repo::{ensure_connection_ready, RepoError, RepoResult};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::collections::{BTreeMap, HashSet};

const NODE_SELECT_SQL: &str = "SELECT
    node_id,
    site_id,
    parent_id,
    type_id,
    node_alias,
    alias_path,
    node_order,
    node_level
FROM content_nodes";

/// Repository interface for content tree reads and host writes.
pub trait ContentRepository {
    fn get_site(&self, site_id: SiteId) -> RepoResult<Option<Site>>;
    fn list_sites(&self) -> RepoResult<Vec<Site>>;
    fn get_content_type(&self, type_id: ContentTypeId) -> RepoResult<Option<ContentType>>;
    /// Every content type ordered by id.
    fn list_content_types(&self) -> RepoResult<Vec<ContentType>>;
    fn get_node(&self, node_id: NodeId) -> RepoResult<Option<ContentNode>>;
    /// Lists children of `parent_id`, or top-level nodes of the site for `None`.
    fn list_children(
        &self,
        site_id: SiteId,
        parent_id: Option<NodeId>,
    ) -> RepoResult<Vec<ContentNode>>;
    /// Lists nodes of one type, shallowest first.
    fn list_nodes_of_type(&self, type_id: ContentTypeId) -> RepoResult<Vec<ContentNode>>;

    fn create_site(
        &self,
        code_name: &str,
        default_culture: Option<&str>,
        cultures: &[&str],
    ) -> RepoResult<Site>;
    fn create_content_type(&self, code_name: &str, url_pattern: &str) -> RepoResult<ContentType>;
    fn update_url_pattern(&self, type_id: ContentTypeId, url_pattern: &str) -> RepoResult<()>;
    fn create_node(&self, input: &NewContentNode) -> RepoResult<ContentNode>;
    fn upsert_variant(&self, node_id: NodeId, variant: &NodeVariant) -> RepoResult<()>;
    /// Renames one node alias; descendant alias paths follow.
    fn rename_alias(&self, node_id: NodeId, node_alias: &str) -> RepoResult<()>;
    /// Moves one node under another parent at an optional sibling index.
    fn move_node(
        &self,
        node_id: NodeId,
        new_parent_id: Option<NodeId>,
        target_order: Option<i64>,
    ) -> RepoResult<()>;
}

/// SQLite-backed content repository.
pub struct SqliteContentRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteContentRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(
            conn,
            &["sites", "site_cultures", "content_types", "content_nodes", "node_variants"],
        )?;
        Ok(Self { conn })
    }
}

impl ContentRepository for SqliteContentRepository<'_> {
    fn get_site(&self, site_id: SiteId) -> RepoResult<Option<Site>> {
        let row: Option<(String, Option<String>)> = self
            .conn
            .query_row(
                "SELECT code_name, default_culture
                 FROM sites
                 WHERE site_id = ?1;",
                [site_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((code_name, default_culture)) => Ok(Some(Site {
                site_id,
                code_name,
                default_culture,
                cultures: load_site_cultures(self.conn, site_id)?,
            })),
        }
    }

    fn list_sites(&self) -> RepoResult<Vec<Site>> {
        let mut stmt = self
            .conn
            .prepare("SELECT site_id FROM sites ORDER BY site_id ASC;")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, SiteId>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut sites = Vec::with_capacity(ids.len());
        for site_id in ids {
            if let Some(site) = self.get_site(site_id)? {
                sites.push(site);
            }
        }
        Ok(sites)
    }

    fn get_content_type(&self, type_id: ContentTypeId) -> RepoResult<Option<ContentType>> {
        let row = self
            .conn
            .query_row(
                "SELECT type_id, code_name, url_pattern
                 FROM content_types
                 WHERE type_id = ?1;",
                [type_id],
                parse_content_type_row,
            )
            .optional()?;
        Ok(row)
    }

    fn list_content_types(&self) -> RepoResult<Vec<ContentType>> {
        let mut stmt = self.conn.prepare(
            "SELECT type_id, code_name, url_pattern
             FROM content_types
             ORDER BY type_id ASC;",
        )?;
        let types = stmt
            .query_map([], parse_content_type_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(types)
    }

    fn get_node(&self, node_id: NodeId) -> RepoResult<Option<ContentNode>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{NODE_SELECT_SQL} WHERE node_id = ?1;"))?;
        let mut rows = stmt.query([node_id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_node_row(self.conn, row)?));
        }
        Ok(None)
    }

    fn list_children(
        &self,
        site_id: SiteId,
        parent_id: Option<NodeId>,
    ) -> RepoResult<Vec<ContentNode>> {
        let mut stmt = self.conn.prepare(&format!(
            "{NODE_SELECT_SQL}
             WHERE site_id = ?1
               AND parent_id IS ?2
             ORDER BY node_order ASC, node_id ASC;"
        ))?;
        let mut rows = stmt.query(params![site_id, parent_id])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_node_row(self.conn, row)?);
        }
        Ok(items)
    }

    fn list_nodes_of_type(&self, type_id: ContentTypeId) -> RepoResult<Vec<ContentNode>> {
        let mut stmt = self.conn.prepare(&format!(
            "{NODE_SELECT_SQL}
             WHERE type_id = ?1
             ORDER BY site_id ASC, node_level ASC, node_order ASC, node_id ASC;"
        ))?;
        let mut rows = stmt.query([type_id])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_node_row(self.conn, row)?);
        }
        Ok(items)
    }

    fn create_site(
        &self,
        code_name: &str,
        default_culture: Option<&str>,
        cultures: &[&str],
    ) -> RepoResult<Site> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO sites (code_name, default_culture) VALUES (?1, ?2);",
            params![code_name, default_culture],
        )?;
        let site_id = tx.last_insert_rowid();
        for culture in cultures {
            tx.execute(
                "INSERT OR IGNORE INTO site_cultures (site_id, culture_code) VALUES (?1, ?2);",
                params![site_id, culture],
            )?;
        }
        tx.commit()?;

        self.get_site(site_id)?
            .ok_or(RepoError::SiteNotFound(site_id))
    }

    fn create_content_type(&self, code_name: &str, url_pattern: &str) -> RepoResult<ContentType> {
        self.conn.execute(
            "INSERT INTO content_types (code_name, url_pattern) VALUES (?1, ?2);",
            params![code_name, url_pattern],
        )?;
        let type_id = self.conn.last_insert_rowid();
        self.get_content_type(type_id)?
            .ok_or(RepoError::ContentTypeNotFound(type_id))
    }

    fn update_url_pattern(&self, type_id: ContentTypeId, url_pattern: &str) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE content_types
             SET url_pattern = ?2,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE type_id = ?1;",
            params![type_id, url_pattern],
        )?;
        if changed == 0 {
            return Err(RepoError::ContentTypeNotFound(type_id));
        }
        Ok(())
    }

    fn create_node(&self, input: &NewContentNode) -> RepoResult<ContentNode> {
        if self.get_site(input.site_id)?.is_none() {
            return Err(RepoError::SiteNotFound(input.site_id));
        }
        if self.get_content_type(input.type_id)?.is_none() {
            return Err(RepoError::ContentTypeNotFound(input.type_id));
        }

        let alias = input.node_alias.trim();
        let (alias_path, node_level) = match input.parent_id {
            Some(parent_id) => {
                let parent = self.load_in_site(parent_id, input.site_id)?;
                (child_alias_path(&parent.alias_path, alias), parent.node_level + 1)
            }
            None => (child_alias_path("", alias), 0),
        };

        let node_order = next_node_order(self.conn, input.site_id, input.parent_id)?;
        self.conn.execute(
            "INSERT INTO content_nodes (
                site_id,
                parent_id,
                type_id,
                node_alias,
                alias_path,
                node_order,
                node_level
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                input.site_id,
                input.parent_id,
                input.type_id,
                alias,
                alias_path,
                node_order,
                node_level,
            ],
        )?;
        let node_id = self.conn.last_insert_rowid();
        self.get_node(node_id)?.ok_or(RepoError::NodeNotFound(node_id))
    }

    fn upsert_variant(&self, node_id: NodeId, variant: &NodeVariant) -> RepoResult<()> {
        if self.get_node(node_id)?.is_none() {
            return Err(RepoError::NodeNotFound(node_id));
        }
        let fields_json = serde_json::to_string(&variant.fields)
            .map_err(|err| RepoError::InvalidData(format!("unencodable variant fields: {err}")))?;
        self.conn.execute(
            "INSERT INTO node_variants (node_id, culture_code, document_name, fields_json)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(node_id, culture_code) DO UPDATE SET
                document_name = excluded.document_name,
                fields_json = excluded.fields_json,
                updated_at = (strftime('%s', 'now') * 1000);",
            params![
                node_id,
                variant.culture_code.as_str(),
                variant.document_name.as_str(),
                fields_json,
            ],
        )?;
        Ok(())
    }

    fn rename_alias(&self, node_id: NodeId, node_alias: &str) -> RepoResult<()> {
        let node = self
            .get_node(node_id)?
            .ok_or(RepoError::NodeNotFound(node_id))?;
        let parent_path = parent_alias_path(&node);
        let alias = node_alias.trim();
        let new_path = child_alias_path(parent_path, alias);

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        tx.execute(
            "UPDATE content_nodes
             SET node_alias = ?2,
                 alias_path = ?3,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE node_id = ?1;",
            params![node_id, alias, new_path],
        )?;
        rewrite_subtree(&tx, node_id, &node.alias_path, &new_path, 0)?;
        tx.commit()?;
        Ok(())
    }

    fn move_node(
        &self,
        node_id: NodeId,
        new_parent_id: Option<NodeId>,
        target_order: Option<i64>,
    ) -> RepoResult<()> {
        let node = self
            .get_node(node_id)?
            .ok_or(RepoError::NodeNotFound(node_id))?;

        let (new_parent_path, new_level) = match new_parent_id {
            Some(parent_id) => {
                let parent = self.load_in_site(parent_id, node.site_id)?;
                if self.is_ancestor_or_self(node_id, parent_id)? {
                    return Err(RepoError::CycleDetected {
                        node_id,
                        parent_id,
                    });
                }
                (parent.alias_path, parent.node_level + 1)
            }
            None => (String::new(), 0),
        };
        let new_path = child_alias_path(&new_parent_path, &node.node_alias);

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let mut sibling_ids = list_child_ids(&tx, node.site_id, new_parent_id)?;
        sibling_ids.retain(|id| *id != node_id);

        let target_index = target_order
            .unwrap_or(sibling_ids.len() as i64)
            .clamp(0, sibling_ids.len() as i64) as usize;
        sibling_ids.insert(target_index, node_id);

        tx.execute(
            "UPDATE content_nodes
             SET parent_id = ?2,
                 alias_path = ?3,
                 node_level = ?4,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE node_id = ?1;",
            params![node_id, new_parent_id, new_path, new_level],
        )?;
        rewrite_subtree(
            &tx,
            node_id,
            &node.alias_path,
            &new_path,
            new_level - node.node_level,
        )?;
        renumber(&tx, &sibling_ids)?;

        if node.parent_id != new_parent_id {
            let previous_siblings = list_child_ids(&tx, node.site_id, node.parent_id)?;
            renumber(&tx, &previous_siblings)?;
        }

        tx.commit()?;
        Ok(())
    }
}

impl SqliteContentRepository<'_> {
    fn load_in_site(&self, node_id: NodeId, site_id: SiteId) -> RepoResult<ContentNode> {
        let node = self
            .get_node(node_id)?
            .ok_or(RepoError::NodeNotFound(node_id))?;
        if node.site_id != site_id {
            return Err(RepoError::SiteMismatch {
                node_id,
                expected: site_id,
                actual: node.site_id,
            });
        }
        Ok(node)
    }

    fn is_ancestor_or_self(&self, node_id: NodeId, candidate: NodeId) -> RepoResult<bool> {
        let mut visited = HashSet::new();
        let mut cursor = Some(candidate);
        while let Some(current) = cursor {
            if current == node_id || !visited.insert(current) {
                return Ok(true);
            }
            cursor = self
                .conn
                .query_row(
                    "SELECT parent_id FROM content_nodes WHERE node_id = ?1;",
                    [current],
                    |row| row.get::<_, Option<NodeId>>(0),
                )
                .optional()?
                .flatten();
        }
        Ok(false)
    }
}

fn parent_alias_path(node: &ContentNode) -> &str {
    match node.alias_path.rfind('/') {
        Some(index) => &node.alias_path[..index],
        None => "",
    }
}

fn child_alias_path(parent_path: &str, alias: &str) -> String {
    format!("{}/{}", parent_path.trim_end_matches('/'), alias)
}

fn rewrite_subtree(
    conn: &Connection,
    node_id: NodeId,
    old_path: &str,
    new_path: &str,
    level_delta: i64,
) -> RepoResult<()> {
    conn.execute(
        "WITH RECURSIVE subtree(node_id) AS (
            SELECT node_id
            FROM content_nodes
            WHERE parent_id = ?1
            UNION ALL
            SELECT child.node_id
            FROM content_nodes child
            INNER JOIN subtree parent ON child.parent_id = parent.node_id
        )
        UPDATE content_nodes
        SET alias_path = ?3 || substr(alias_path, length(?2) + 1),
            node_level = node_level + ?4,
            updated_at = (strftime('%s', 'now') * 1000)
        WHERE node_id IN (SELECT node_id FROM subtree);",
        params![node_id, old_path, new_path, level_delta],
    )?;
    Ok(())
}

fn renumber(conn: &Connection, ordered_ids: &[NodeId]) -> RepoResult<()> {
    for (index, id) in ordered_ids.iter().enumerate() {
        conn.execute(
            "UPDATE content_nodes
             SET node_order = ?2,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE node_id = ?1
               AND node_order <> ?2;",
            params![id, index as i64],
        )?;
    }
    Ok(())
}

fn list_child_ids(
    conn: &Connection,
    site_id: SiteId,
    parent_id: Option<NodeId>,
) -> RepoResult<Vec<NodeId>> {
    let mut stmt = conn.prepare(
        "SELECT node_id
         FROM content_nodes
         WHERE site_id = ?1
           AND parent_id IS ?2
         ORDER BY node_order ASC, node_id ASC;",
    )?;
    let ids = stmt
        .query_map(params![site_id, parent_id], |row| row.get::<_, NodeId>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn next_node_order(
    conn: &Connection,
    site_id: SiteId,
    parent_id: Option<NodeId>,
) -> RepoResult<i64> {
    let next = conn.query_row(
        "SELECT COALESCE(MAX(node_order), -1) + 1
         FROM content_nodes
         WHERE site_id = ?1
           AND parent_id IS ?2;",
        params![site_id, parent_id],
        |row| row.get(0),
    )?;
    Ok(next)
}

fn load_site_cultures(conn: &Connection, site_id: SiteId) -> RepoResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT culture_code
         FROM site_cultures
         WHERE site_id = ?1
         ORDER BY culture_code ASC;",
    )?;
    let cultures = stmt
        .query_map([site_id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(cultures)
}

fn load_variants(conn: &Connection, node_id: NodeId) -> RepoResult<BTreeMap<String, NodeVariant>> {
    let mut stmt = conn.prepare(
        "SELECT culture_code, document_name, fields_json
         FROM node_variants
         WHERE node_id = ?1
         ORDER BY culture_code ASC;",
    )?;
    let mut rows = stmt.query([node_id])?;
    let mut variants = BTreeMap::new();
    while let Some(row) = rows.next()? {
        let culture_code: String = row.get(0)?;
        let fields_json: String = row.get(2)?;
        let fields: BTreeMap<String, String> =
            serde_json::from_str(&fields_json).map_err(|err| {
                RepoError::InvalidData(format!(
                    "invalid fields_json for node {node_id} culture {culture_code}: {err}"
                ))
            })?;
        variants.insert(
            culture_code.clone(),
            NodeVariant {
                culture_code,
                document_name: row.get(1)?,
                fields,
            },
        );
    }
    Ok(variants)
}

fn parse_content_type_row(row: &Row<'_>) -> rusqlite::Result<ContentType> {
    Ok(ContentType {
        type_id: row.get(0)?,
        code_name: row.get(1)?,
        url_pattern: row.get(2)?,
    })
}

fn parse_node_row(conn: &Connection, row: &Row<'_>) -> RepoResult<ContentNode> {
    let node_id: NodeId = row.get("node_id")?;
    let alias_path: String = row.get("alias_path")?;
    if !alias_path.starts_with('/') {
        return Err(RepoError::InvalidData(format!(
            "invalid alias path `{alias_path}` in content_nodes.alias_path"
        )));
    }

    Ok(ContentNode {
        node_id,
        site_id: row.get("site_id")?,
        parent_id: row.get("parent_id")?,
        type_id: row.get("type_id")?,
        node_alias: row.get("node_alias")?,
        alias_path,
        node_order: row.get("node_order")?,
        node_level: row.get("node_level")?,
        variants: load_variants(conn, node_id)?,
    })
}
