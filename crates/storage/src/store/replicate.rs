#![forbid(unsafe_code)]

use super::support::{FILE_COLUMNS, ITEM_COLUMNS, file_from_row, insert_file, insert_item, item_from_row};
use super::{AssessmentItem, BlobStore, FileRecord, ReplicationSummary, StoreError};
use ct_core::new_hex_id;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Copies files, tags and assessment items from source nodes onto their copies.
///
/// Runs after the copies exist, since every row it writes points at a final node id.
/// One replicator should serve a whole copy so tag resolution is shared across batches.
pub struct AssociatedObjectReplicator<'c> {
    conn: &'c Connection,
    blobs: Option<&'c dyn BlobStore>,
    /// Source tag id → tag id used on copies.
    tag_remap: HashMap<String, String>,
}

impl<'c> AssociatedObjectReplicator<'c> {
    pub fn new(conn: &'c Connection, blobs: Option<&'c dyn BlobStore>) -> Self {
        Self {
            conn,
            blobs,
            tag_remap: HashMap::new(),
        }
    }

    /// Replicate dependents for each `(source id, copy id)` pair.
    pub fn replicate(
        &mut self,
        node_map: &[(String, String)],
    ) -> Result<ReplicationSummary, StoreError> {
        let mut summary = ReplicationSummary::default();
        for (old_id, new_id) in node_map {
            summary.files += self.copy_node_files(old_id, new_id)?;
        }
        for (old_id, new_id) in node_map {
            self.copy_tags(old_id, new_id, &mut summary)?;
        }
        self.copy_assessment_items(node_map, &mut summary)?;
        debug!(
            nodes = node_map.len(),
            files = summary.files,
            tag_links = summary.tag_links,
            items = summary.assessment_items,
            "associated objects replicated"
        );
        Ok(summary)
    }

    /// Recreate prerequisite links whose both ends were copied. Rows touching a source node
    /// whose other end no longer exists are deleted first.
    ///
    /// Returns `(links copied, dangling rows removed)`.
    pub fn replicate_prerequisites(
        &self,
        node_map: &HashMap<String, String>,
    ) -> Result<(usize, usize), StoreError> {
        let mut removed = 0;
        {
            let mut cleanup = self.conn.prepare_cached(
                "DELETE FROM prerequisites \
                 WHERE (target_node_id = ?1 OR prerequisite_id = ?1) \
                   AND (target_node_id NOT IN (SELECT id FROM nodes) \
                        OR prerequisite_id NOT IN (SELECT id FROM nodes))",
            )?;
            for old_id in node_map.keys() {
                removed += cleanup.execute(params![old_id])?;
            }
        }

        let mut copied = 0;
        let mut select = self.conn.prepare_cached(
            "SELECT prerequisite_id FROM prerequisites WHERE target_node_id = ?1 ORDER BY prerequisite_id",
        )?;
        let mut insert = self.conn.prepare_cached(
            "INSERT OR IGNORE INTO prerequisites(target_node_id, prerequisite_id) VALUES (?1, ?2)",
        )?;
        for (old_id, new_id) in node_map {
            let prerequisites = select
                .query_map(params![old_id], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            for prerequisite in prerequisites {
                if let Some(new_prerequisite) = node_map.get(&prerequisite) {
                    copied += insert.execute(params![new_id, new_prerequisite])?;
                }
            }
        }
        if removed > 0 {
            debug!(removed, "dangling prerequisites removed");
        }
        Ok((copied, removed))
    }

    fn copy_node_files(&self, old_id: &str, new_id: &str) -> Result<usize, StoreError> {
        let files = self.files_where("contentnode_id = ?1", old_id)?;
        for file in &files {
            self.insert_copy(file, Some(new_id.to_string()), None)?;
        }
        Ok(files.len())
    }

    fn insert_copy(
        &self,
        file: &FileRecord,
        contentnode_id: Option<String>,
        assessment_item_id: Option<String>,
    ) -> Result<(), StoreError> {
        if let Some(blobs) = self.blobs {
            blobs.ensure_present(&file.checksum, &file.file_format)?;
        }
        insert_file(
            self.conn,
            &FileRecord {
                id: new_hex_id(),
                contentnode_id,
                assessment_item_id,
                ..file.clone()
            },
        )
    }

    fn files_where(&self, clause: &str, key: &str) -> Result<Vec<FileRecord>, StoreError> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE {clause} ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![key], file_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn copy_tags(
        &mut self,
        old_id: &str,
        new_id: &str,
        summary: &mut ReplicationSummary,
    ) -> Result<(), StoreError> {
        let tags = {
            let mut stmt = self.conn.prepare_cached(
                "SELECT t.id, t.tag_name, t.channel_id FROM node_tags nt \
                 JOIN content_tags t ON t.id = nt.contenttag_id \
                 WHERE nt.contentnode_id = ?1 ORDER BY t.tag_name",
            )?;
            let rows = stmt.query_map(params![old_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        for (tag_id, tag_name, channel_id) in tags {
            let target_tag = self.resolve_tag(&tag_id, &tag_name, channel_id.is_none(), summary)?;
            // Duplicate links are skipped.
            summary.tag_links += self.conn.execute(
                "INSERT OR IGNORE INTO node_tags(contentnode_id, contenttag_id) VALUES (?1, ?2)",
                params![new_id, target_tag],
            )?;
        }
        Ok(())
    }

    /// Global tags are reused as-is. Channel tags map onto the global tag of the same name,
    /// creating it once when missing.
    fn resolve_tag(
        &mut self,
        tag_id: &str,
        tag_name: &str,
        is_global: bool,
        summary: &mut ReplicationSummary,
    ) -> Result<String, StoreError> {
        if let Some(mapped) = self.tag_remap.get(tag_id) {
            return Ok(mapped.clone());
        }
        let mapped = if is_global {
            summary.tags_reused += 1;
            tag_id.to_string()
        } else {
            let existing = self
                .conn
                .query_row(
                    "SELECT id FROM content_tags WHERE tag_name = ?1 AND channel_id IS NULL",
                    params![tag_name],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;
            match existing {
                Some(id) => {
                    summary.tags_reused += 1;
                    id
                }
                None => {
                    let id = new_hex_id();
                    self.conn.execute(
                        "INSERT INTO content_tags(id, tag_name, channel_id) VALUES (?1, ?2, NULL)",
                        params![id, tag_name],
                    )?;
                    summary.tags_created += 1;
                    id
                }
            }
        };
        self.tag_remap.insert(tag_id.to_string(), mapped.clone());
        Ok(mapped)
    }

    fn copy_assessment_items(
        &self,
        node_map: &[(String, String)],
        summary: &mut ReplicationSummary,
    ) -> Result<(), StoreError> {
        // (new node id, assessment_id) → new item id
        let mut item_map: HashMap<(String, String), String> = HashMap::new();
        let mut sources: Vec<(String, String, String)> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for (old_id, new_id) in node_map {
            let items = {
                let mut stmt = self.conn.prepare_cached(&format!(
                    "SELECT {ITEM_COLUMNS} FROM assessment_items WHERE contentnode_id = ?1 \
                     ORDER BY sort_order, id"
                ))?;
                let rows = stmt.query_map(params![old_id], item_from_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            };
            for item in items {
                if !seen.insert(item.id.clone()) {
                    continue;
                }
                let copy = AssessmentItem {
                    id: new_hex_id(),
                    contentnode_id: new_id.clone(),
                    ..item.clone()
                };
                insert_item(self.conn, &copy)?;
                item_map.insert((new_id.clone(), item.assessment_id.clone()), copy.id);
                sources.push((item.id, new_id.clone(), item.assessment_id));
                summary.assessment_items += 1;
            }
        }

        for (old_item_id, new_node_id, assessment_id) in sources {
            let Some(new_item_id) = item_map.get(&(new_node_id, assessment_id)) else {
                continue;
            };
            for file in self.files_where("assessment_item_id = ?1", &old_item_id)? {
                self.insert_copy(&file, None, Some(new_item_id.clone()))?;
                summary.assessment_files += 1;
            }
        }
        Ok(())
    }
}
